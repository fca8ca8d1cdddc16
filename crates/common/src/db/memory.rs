//! In-memory [`Store`] for local development and tests
//!
//! Mirrors the constraints the Postgres schema enforces: unique tenant slugs,
//! one membership per (tenant, user), unique key hashes, one usage row per
//! (tenant, period).

use crate::db::models::{ApiKey, Tenant, TenantUser, UsageStat, UserProfile};
use crate::db::store::{
    ApiKeyChanges, NewApiKey, NewTenant, ProfileChanges, ProfileSeed, Store, TenantChanges,
    UsageDelta,
};
use crate::errors::{AppError, Result};
use crate::tenancy::{Role, SubscriptionStatus};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    profiles: HashMap<Uuid, UserProfile>,
    tenants: HashMap<Uuid, Tenant>,
    members: HashMap<Uuid, TenantUser>,
    api_keys: HashMap<Uuid, ApiKey>,
    usage: HashMap<(Uuid, String), UsageStat>,
}

/// HashMap-backed store guarded by a single async lock
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

fn now() -> DateTime<FixedOffset> {
    Utc::now().fixed_offset()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn usage_row<'a>(tables: &'a mut Tables, tenant_id: Uuid, period: &str) -> &'a mut UsageStat {
    tables
        .usage
        .entry((tenant_id, period.to_string()))
        .or_insert_with(|| UsageStat {
            id: Uuid::new_v4(),
            tenant_id,
            period: period.to_string(),
            request_count: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost_micros: 0,
            updated_at: now(),
        })
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_profile(&self, seed: ProfileSeed) -> Result<UserProfile> {
        let mut tables = self.tables.write().await;
        let at = now();

        let profile = tables
            .profiles
            .entry(seed.id)
            .and_modify(|p| {
                p.email = seed.email.clone();
                p.last_sign_in_at = Some(at);
                p.updated_at = at;
            })
            .or_insert_with(|| UserProfile {
                id: seed.id,
                email: seed.email.clone(),
                full_name: seed.full_name.clone(),
                is_platform_admin: seed.is_platform_admin,
                is_disabled: false,
                last_sign_in_at: Some(at),
                created_at: at,
                updated_at: at,
            });

        Ok(profile.clone())
    }

    async fn find_profile(&self, id: Uuid) -> Result<Option<UserProfile>> {
        Ok(self.tables.read().await.profiles.get(&id).cloned())
    }

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        let tables = self.tables.read().await;
        Ok(tables
            .profiles
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list_profiles(&self, offset: u64, limit: u64) -> Result<(Vec<UserProfile>, u64)> {
        let tables = self.tables.read().await;
        let mut profiles: Vec<UserProfile> = tables.profiles.values().cloned().collect();
        profiles.sort_by_key(|p| p.created_at);

        let total = profiles.len() as u64;
        let page = profiles
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();

        Ok((page, total))
    }

    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> Result<UserProfile> {
        let mut tables = self.tables.write().await;
        let profile = tables
            .profiles
            .get_mut(&id)
            .ok_or_else(|| AppError::UserNotFound { id: id.to_string() })?;

        if let Some(full_name) = changes.full_name {
            profile.full_name = full_name;
        }
        if let Some(is_platform_admin) = changes.is_platform_admin {
            profile.is_platform_admin = is_platform_admin;
        }
        if let Some(is_disabled) = changes.is_disabled {
            profile.is_disabled = is_disabled;
        }
        profile.updated_at = now();

        Ok(profile.clone())
    }

    async fn delete_profile(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        tables.members.retain(|_, m| m.user_id != id);
        Ok(tables.profiles.remove(&id).is_some())
    }

    async fn create_tenant(&self, owner_id: Uuid, tenant: NewTenant) -> Result<(Tenant, TenantUser)> {
        let mut tables = self.tables.write().await;

        if tables.tenants.values().any(|t| t.slug == tenant.slug) {
            return Err(AppError::Duplicate {
                message: format!("tenant slug '{}' is taken", tenant.slug),
            });
        }

        let at = now();
        let limits = tenant.plan.limits();
        let created = Tenant {
            id: Uuid::new_v4(),
            name: tenant.name,
            slug: tenant.slug,
            plan: tenant.plan.as_str().to_string(),
            subscription_status: SubscriptionStatus::Active.as_str().to_string(),
            max_users: limits.max_users,
            max_api_keys: limits.max_api_keys,
            monthly_request_limit: limits.monthly_request_limit,
            is_active: true,
            settings: tenant.settings,
            created_at: at,
            updated_at: at,
        };
        let owner = TenantUser {
            id: Uuid::new_v4(),
            tenant_id: created.id,
            user_id: owner_id,
            role: Role::Owner.as_str().to_string(),
            permissions: serde_json::json!(Role::Owner.default_permissions()),
            created_at: at,
            updated_at: at,
        };

        tables.tenants.insert(created.id, created.clone());
        tables.members.insert(owner.id, owner.clone());

        Ok((created, owner))
    }

    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>> {
        Ok(self.tables.read().await.tenants.get(&id).cloned())
    }

    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>> {
        let tables = self.tables.read().await;
        Ok(tables.tenants.values().find(|t| t.slug == slug).cloned())
    }

    async fn list_tenants(&self, offset: u64, limit: u64) -> Result<(Vec<Tenant>, u64)> {
        let tables = self.tables.read().await;
        let mut tenants: Vec<Tenant> = tables.tenants.values().cloned().collect();
        tenants.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = tenants.len() as u64;
        let page = tenants
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();

        Ok((page, total))
    }

    async fn list_tenants_for_user(&self, user_id: Uuid) -> Result<Vec<(Tenant, TenantUser)>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<(Tenant, TenantUser)> = tables
            .members
            .values()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| tables.tenants.get(&m.tenant_id).map(|t| (t.clone(), m.clone())))
            .collect();
        rows.sort_by_key(|(_, m)| m.created_at);

        Ok(rows)
    }

    async fn update_tenant(&self, id: Uuid, changes: TenantChanges) -> Result<Tenant> {
        let mut tables = self.tables.write().await;

        if let Some(ref slug) = changes.slug {
            if tables.tenants.values().any(|t| t.id != id && &t.slug == slug) {
                return Err(AppError::Duplicate {
                    message: format!("tenant slug '{}' is taken", slug),
                });
            }
        }

        let tenant = tables
            .tenants
            .get_mut(&id)
            .ok_or_else(|| AppError::TenantNotFound { id: id.to_string() })?;

        if let Some(name) = changes.name {
            tenant.name = name;
        }
        if let Some(slug) = changes.slug {
            tenant.slug = slug;
        }
        if let Some(plan) = changes.plan {
            let limits = plan.limits();
            tenant.plan = plan.as_str().to_string();
            tenant.max_users = limits.max_users;
            tenant.max_api_keys = limits.max_api_keys;
            tenant.monthly_request_limit = limits.monthly_request_limit;
        }
        if let Some(status) = changes.subscription_status {
            tenant.subscription_status = status.as_str().to_string();
        }
        if let Some(is_active) = changes.is_active {
            tenant.is_active = is_active;
        }
        if let Some(settings) = changes.settings {
            tenant.settings = settings;
        }
        tenant.updated_at = now();

        Ok(tenant.clone())
    }

    async fn delete_tenant(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        tables.usage.retain(|(tenant_id, _), _| *tenant_id != id);
        tables.api_keys.retain(|_, k| k.tenant_id != id);
        tables.members.retain(|_, m| m.tenant_id != id);
        Ok(tables.tenants.remove(&id).is_some())
    }

    async fn find_membership(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Option<TenantUser>> {
        let tables = self.tables.read().await;
        Ok(tables
            .members
            .values()
            .find(|m| m.tenant_id == tenant_id && m.user_id == user_id)
            .cloned())
    }

    async fn list_members(&self, tenant_id: Uuid) -> Result<Vec<TenantUser>> {
        let tables = self.tables.read().await;
        let mut members: Vec<TenantUser> = tables
            .members
            .values()
            .filter(|m| m.tenant_id == tenant_id)
            .cloned()
            .collect();
        members.sort_by_key(|m| m.created_at);

        Ok(members)
    }

    async fn add_member(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role: Role,
        permissions: Vec<String>,
    ) -> Result<TenantUser> {
        let mut tables = self.tables.write().await;

        if tables
            .members
            .values()
            .any(|m| m.tenant_id == tenant_id && m.user_id == user_id)
        {
            return Err(AppError::Duplicate {
                message: format!("user {} is already a member", user_id),
            });
        }

        let at = now();
        let member = TenantUser {
            id: Uuid::new_v4(),
            tenant_id,
            user_id,
            role: role.as_str().to_string(),
            permissions: serde_json::json!(permissions),
            created_at: at,
            updated_at: at,
        };
        tables.members.insert(member.id, member.clone());

        Ok(member)
    }

    async fn update_member(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role: Role,
        permissions: Vec<String>,
    ) -> Result<TenantUser> {
        let mut tables = self.tables.write().await;
        let member = tables
            .members
            .values_mut()
            .find(|m| m.tenant_id == tenant_id && m.user_id == user_id)
            .ok_or_else(|| AppError::MemberNotFound { user_id: user_id.to_string() })?;

        member.role = role.as_str().to_string();
        member.permissions = serde_json::json!(permissions);
        member.updated_at = now();

        Ok(member.clone())
    }

    async fn remove_member(&self, tenant_id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.members.len();
        tables
            .members
            .retain(|_, m| !(m.tenant_id == tenant_id && m.user_id == user_id));
        Ok(tables.members.len() < before)
    }

    async fn count_members(&self, tenant_id: Uuid) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables.members.values().filter(|m| m.tenant_id == tenant_id).count() as u64)
    }

    async fn create_api_key(&self, key: NewApiKey) -> Result<ApiKey> {
        let mut tables = self.tables.write().await;

        if tables.api_keys.values().any(|k| k.key_hash == key.key_hash) {
            return Err(AppError::Duplicate {
                message: "api key hash collision".to_string(),
            });
        }

        let created = ApiKey {
            id: Uuid::new_v4(),
            tenant_id: key.tenant_id,
            created_by: key.created_by,
            name: key.name,
            key_prefix: key.key_prefix,
            key_hash: key.key_hash,
            permissions: serde_json::json!(key.permissions),
            is_active: true,
            expires_at: key.expires_at.map(|at| at.fixed_offset()),
            last_used_at: None,
            created_at: now(),
        };
        tables.api_keys.insert(created.id, created.clone());

        Ok(created)
    }

    async fn find_api_key(&self, id: Uuid) -> Result<Option<ApiKey>> {
        Ok(self.tables.read().await.api_keys.get(&id).cloned())
    }

    async fn find_api_key_by_hash(&self, hash: &str) -> Result<Option<ApiKey>> {
        let tables = self.tables.read().await;
        Ok(tables.api_keys.values().find(|k| k.key_hash == hash).cloned())
    }

    async fn list_api_keys(&self, tenant_id: Uuid) -> Result<Vec<ApiKey>> {
        let tables = self.tables.read().await;
        let mut keys: Vec<ApiKey> = tables
            .api_keys
            .values()
            .filter(|k| k.tenant_id == tenant_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(keys)
    }

    async fn update_api_key(&self, id: Uuid, changes: ApiKeyChanges) -> Result<ApiKey> {
        let mut tables = self.tables.write().await;
        let key = tables
            .api_keys
            .get_mut(&id)
            .ok_or_else(|| AppError::ApiKeyNotFound { id: id.to_string() })?;

        if let Some(name) = changes.name {
            key.name = name;
        }
        if let Some(is_active) = changes.is_active {
            key.is_active = is_active;
        }
        if let Some(permissions) = changes.permissions {
            key.permissions = serde_json::json!(permissions);
        }

        Ok(key.clone())
    }

    async fn delete_api_key(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.write().await.api_keys.remove(&id).is_some())
    }

    async fn touch_api_key(&self, id: Uuid) -> Result<()> {
        if let Some(key) = self.tables.write().await.api_keys.get_mut(&id) {
            key.last_used_at = Some(now());
        }
        Ok(())
    }

    async fn count_active_api_keys(&self, tenant_id: Uuid) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .api_keys
            .values()
            .filter(|k| k.tenant_id == tenant_id && k.is_active)
            .count() as u64)
    }

    async fn record_usage(&self, tenant_id: Uuid, period: &str, delta: UsageDelta) -> Result<UsageStat> {
        let mut tables = self.tables.write().await;
        let at = now();
        let stat = usage_row(&mut tables, tenant_id, period);

        stat.request_count += delta.requests;
        stat.prompt_tokens += delta.prompt_tokens;
        stat.completion_tokens += delta.completion_tokens;
        stat.cost_micros += delta.cost_micros;
        stat.updated_at = at;

        Ok(stat.clone())
    }

    async fn reserve_request(&self, tenant_id: Uuid, period: &str, limit: i64) -> Result<Option<UsageStat>> {
        let mut tables = self.tables.write().await;
        let stat = usage_row(&mut tables, tenant_id, period);

        if limit > 0 && stat.request_count >= limit {
            return Ok(None);
        }
        stat.request_count += 1;
        stat.updated_at = now();
        Ok(Some(stat.clone()))
    }

    async fn find_usage(&self, tenant_id: Uuid, period: &str) -> Result<Option<UsageStat>> {
        let tables = self.tables.read().await;
        Ok(tables.usage.get(&(tenant_id, period.to_string())).cloned())
    }

    async fn list_usage(&self, tenant_id: Uuid, limit: u64) -> Result<Vec<UsageStat>> {
        let tables = self.tables.read().await;
        let mut stats: Vec<UsageStat> = tables
            .usage
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect();
        stats.sort_by(|a, b| b.period.cmp(&a.period));
        stats.truncate(limit as usize);

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenancy::Plan;
    use tokio_test::assert_ok;

    fn new_tenant(slug: &str) -> NewTenant {
        NewTenant {
            name: slug.to_uppercase(),
            slug: slug.to_string(),
            plan: Plan::Free,
            settings: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_create_tenant_makes_owner() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();

        let (tenant, membership) = store.create_tenant(owner, new_tenant("acme")).await.unwrap();
        assert_eq!(tenant.max_users, 3);
        assert_eq!(membership.role(), Role::Owner);
        assert_eq!(store.count_members(tenant.id).await.unwrap(), 1);

        let mine = store.list_tenants_for_user(owner).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].0.slug, "acme");
    }

    #[tokio::test]
    async fn test_duplicate_slug_conflicts() {
        let store = MemoryStore::new();
        assert_ok!(store.create_tenant(Uuid::new_v4(), new_tenant("acme")).await);

        let err = store
            .create_tenant(Uuid::new_v4(), new_tenant("acme"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_membership_conflicts() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let (tenant, _) = store.create_tenant(owner, new_tenant("acme")).await.unwrap();

        let err = store
            .add_member(tenant.id, owner, Role::Viewer, Role::Viewer.default_permissions())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_usage_accumulates_per_period() {
        let store = MemoryStore::new();
        let tenant_id = Uuid::new_v4();
        let delta = UsageDelta { requests: 1, prompt_tokens: 10, completion_tokens: 5, cost_micros: 42 };

        store.record_usage(tenant_id, "2026-09", delta).await.unwrap();
        store.record_usage(tenant_id, "2026-10", delta).await.unwrap();
        let stat = store.record_usage(tenant_id, "2026-10", delta).await.unwrap();

        assert_eq!(stat.request_count, 2);
        assert_eq!(stat.total_tokens(), 30);
        assert_eq!(stat.cost_micros, 84);

        let history = store.list_usage(tenant_id, 12).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].period, "2026-10");
    }

    #[tokio::test]
    async fn test_reserve_request_stops_at_limit() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let tenant_id = Uuid::new_v4();
        store
            .record_usage(tenant_id, "2026-10", UsageDelta { requests: 7, ..Default::default() })
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move { store.reserve_request(tenant_id, "2026-10", 10).await }));
        }
        let mut granted = 0;
        for task in tasks {
            if task.await.unwrap().unwrap().is_some() {
                granted += 1;
            }
        }

        assert_eq!(granted, 3);
        let stat = store.find_usage(tenant_id, "2026-10").await.unwrap().unwrap();
        assert_eq!(stat.request_count, 10);

        // Non-positive limits never reject
        let stat = store.reserve_request(tenant_id, "2026-10", 0).await.unwrap().unwrap();
        assert_eq!(stat.request_count, 11);
    }

    #[tokio::test]
    async fn test_delete_tenant_cascades() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let (tenant, _) = store.create_tenant(owner, new_tenant("acme")).await.unwrap();
        store
            .record_usage(tenant.id, "2026-10", UsageDelta { requests: 1, ..Default::default() })
            .await
            .unwrap();

        assert!(store.delete_tenant(tenant.id).await.unwrap());
        assert!(store.find_membership(tenant.id, owner).await.unwrap().is_none());
        assert!(store.find_usage(tenant.id, "2026-10").await.unwrap().is_none());
        assert!(!store.delete_tenant(tenant.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_profile_upsert_keeps_admin_flag() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let seed = ProfileSeed {
            id,
            email: "ops@example.com".into(),
            full_name: None,
            is_platform_admin: true,
        };

        store.upsert_profile(seed.clone()).await.unwrap();
        let again = store
            .upsert_profile(ProfileSeed { is_platform_admin: false, ..seed })
            .await
            .unwrap();
        assert!(again.is_platform_admin);
    }
}
