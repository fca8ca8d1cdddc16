//! Repository pattern for database operations
//!
//! SeaORM-backed [`Store`] used in production. Multi-row writes run in a
//! transaction; counter increments use single upsert statements.

use crate::errors::{AppError, Result};
use crate::db::DbPool;
use crate::db::models::*;
use crate::db::store::{
    ApiKeyChanges, NewApiKey, NewTenant, ProfileChanges, ProfileSeed, Store, TenantChanges,
    UsageDelta,
};
use crate::tenancy::{Role, SubscriptionStatus};
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, Statement,
    TransactionTrait,
};
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

/// Map unique-constraint violations to 409, everything else to a database error
fn conflict_or(err: DbErr, message: impl Into<String>) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => AppError::Duplicate {
            message: message.into(),
        },
        _ => AppError::Database(err),
    }
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }
}

#[async_trait]
impl Store for Repository {
    // ========================================================================
    // Health Check
    // ========================================================================

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Profile Operations
    // ========================================================================

    async fn upsert_profile(&self, seed: ProfileSeed) -> Result<UserProfile> {
        let now = chrono::Utc::now();

        if let Some(existing) = UserProfileEntity::find_by_id(seed.id)
            .one(self.write_conn())
            .await?
        {
            let mut profile: UserProfileActiveModel = existing.into();
            profile.email = Set(seed.email);
            profile.last_sign_in_at = Set(Some(now.into()));
            profile.updated_at = Set(now.into());
            return profile.update(self.write_conn()).await.map_err(Into::into);
        }

        let profile = UserProfileActiveModel {
            id: Set(seed.id),
            email: Set(seed.email),
            full_name: Set(seed.full_name),
            is_platform_admin: Set(seed.is_platform_admin),
            is_disabled: Set(false),
            last_sign_in_at: Set(Some(now.into())),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        match profile.insert(self.write_conn()).await {
            Ok(profile) => {
                tracing::info!(user_id = %profile.id, "Profile created");
                Ok(profile)
            }
            // Lost a race with a concurrent first request for the same user
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                UserProfileEntity::find_by_id(seed.id)
                    .one(self.write_conn())
                    .await?
                    .ok_or_else(|| AppError::UserNotFound { id: seed.id.to_string() })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_profile(&self, id: Uuid) -> Result<Option<UserProfile>> {
        UserProfileEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        UserProfileEntity::find()
            .filter(UserProfileColumn::Email.eq(email.to_lowercase()))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_profiles(&self, offset: u64, limit: u64) -> Result<(Vec<UserProfile>, u64)> {
        let total = UserProfileEntity::find().count(self.read_conn()).await?;
        let profiles = UserProfileEntity::find()
            .order_by_asc(UserProfileColumn::CreatedAt)
            .offset(offset)
            .limit(limit)
            .all(self.read_conn())
            .await?;

        Ok((profiles, total))
    }

    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> Result<UserProfile> {
        let mut profile: UserProfileActiveModel = UserProfileEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::UserNotFound { id: id.to_string() })?
            .into();

        if let Some(full_name) = changes.full_name {
            profile.full_name = Set(full_name);
        }
        if let Some(is_platform_admin) = changes.is_platform_admin {
            profile.is_platform_admin = Set(is_platform_admin);
        }
        if let Some(is_disabled) = changes.is_disabled {
            profile.is_disabled = Set(is_disabled);
        }
        profile.updated_at = Set(chrono::Utc::now().into());

        profile.update(self.write_conn()).await.map_err(Into::into)
    }

    async fn delete_profile(&self, id: Uuid) -> Result<bool> {
        let txn = self.write_conn().begin().await?;

        TenantUserEntity::delete_many()
            .filter(TenantUserColumn::UserId.eq(id))
            .exec(&txn)
            .await?;

        let result = UserProfileEntity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;

        Ok(result.rows_affected > 0)
    }

    // ========================================================================
    // Tenant Operations
    // ========================================================================

    async fn create_tenant(&self, owner_id: Uuid, tenant: NewTenant) -> Result<(Tenant, TenantUser)> {
        let now = chrono::Utc::now();
        let limits = tenant.plan.limits();
        let slug = tenant.slug.clone();

        let txn = self.write_conn().begin().await?;

        let created = TenantActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(tenant.name),
            slug: Set(tenant.slug),
            plan: Set(tenant.plan.as_str().to_string()),
            subscription_status: Set(SubscriptionStatus::Active.as_str().to_string()),
            max_users: Set(limits.max_users),
            max_api_keys: Set(limits.max_api_keys),
            monthly_request_limit: Set(limits.monthly_request_limit),
            is_active: Set(true),
            settings: Set(tenant.settings),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&txn)
        .await
        .map_err(|e| conflict_or(e, format!("tenant slug '{}' is taken", slug)))?;

        let owner = TenantUserActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(created.id),
            user_id: Set(owner_id),
            role: Set(Role::Owner.as_str().to_string()),
            permissions: Set(serde_json::json!(Role::Owner.default_permissions())),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        Ok((created, owner))
    }

    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>> {
        TenantEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>> {
        TenantEntity::find()
            .filter(TenantColumn::Slug.eq(slug))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_tenants(&self, offset: u64, limit: u64) -> Result<(Vec<Tenant>, u64)> {
        let total = TenantEntity::find().count(self.read_conn()).await?;
        let tenants = TenantEntity::find()
            .order_by_desc(TenantColumn::CreatedAt)
            .offset(offset)
            .limit(limit)
            .all(self.read_conn())
            .await?;

        Ok((tenants, total))
    }

    async fn list_tenants_for_user(&self, user_id: Uuid) -> Result<Vec<(Tenant, TenantUser)>> {
        let rows = TenantUserEntity::find()
            .filter(TenantUserColumn::UserId.eq(user_id))
            .order_by_asc(TenantUserColumn::CreatedAt)
            .find_also_related(TenantEntity)
            .all(self.read_conn())
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(membership, tenant)| tenant.map(|t| (t, membership)))
            .collect())
    }

    async fn update_tenant(&self, id: Uuid, changes: TenantChanges) -> Result<Tenant> {
        let mut tenant: TenantActiveModel = TenantEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::TenantNotFound { id: id.to_string() })?
            .into();

        if let Some(name) = changes.name {
            tenant.name = Set(name);
        }
        let slug = changes.slug.clone();
        if let Some(slug) = changes.slug {
            tenant.slug = Set(slug);
        }
        if let Some(plan) = changes.plan {
            let limits = plan.limits();
            tenant.plan = Set(plan.as_str().to_string());
            tenant.max_users = Set(limits.max_users);
            tenant.max_api_keys = Set(limits.max_api_keys);
            tenant.monthly_request_limit = Set(limits.monthly_request_limit);
        }
        if let Some(status) = changes.subscription_status {
            tenant.subscription_status = Set(status.as_str().to_string());
        }
        if let Some(is_active) = changes.is_active {
            tenant.is_active = Set(is_active);
        }
        if let Some(settings) = changes.settings {
            tenant.settings = Set(settings);
        }
        tenant.updated_at = Set(chrono::Utc::now().into());

        tenant.update(self.write_conn()).await.map_err(|e| {
            conflict_or(e, format!("tenant slug '{}' is taken", slug.unwrap_or_default()))
        })
    }

    async fn delete_tenant(&self, id: Uuid) -> Result<bool> {
        let txn = self.write_conn().begin().await?;

        UsageStatEntity::delete_many()
            .filter(UsageStatColumn::TenantId.eq(id))
            .exec(&txn)
            .await?;
        ApiKeyEntity::delete_many()
            .filter(ApiKeyColumn::TenantId.eq(id))
            .exec(&txn)
            .await?;
        TenantUserEntity::delete_many()
            .filter(TenantUserColumn::TenantId.eq(id))
            .exec(&txn)
            .await?;

        let result = TenantEntity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;

        Ok(result.rows_affected > 0)
    }

    // ========================================================================
    // Membership Operations
    // ========================================================================

    async fn find_membership(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Option<TenantUser>> {
        TenantUserEntity::find()
            .filter(TenantUserColumn::TenantId.eq(tenant_id))
            .filter(TenantUserColumn::UserId.eq(user_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_members(&self, tenant_id: Uuid) -> Result<Vec<TenantUser>> {
        TenantUserEntity::find()
            .filter(TenantUserColumn::TenantId.eq(tenant_id))
            .order_by_asc(TenantUserColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn add_member(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role: Role,
        permissions: Vec<String>,
    ) -> Result<TenantUser> {
        let now = chrono::Utc::now();

        TenantUserActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            user_id: Set(user_id),
            role: Set(role.as_str().to_string()),
            permissions: Set(serde_json::json!(permissions)),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.write_conn())
        .await
        .map_err(|e| conflict_or(e, format!("user {} is already a member", user_id)))
    }

    async fn update_member(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role: Role,
        permissions: Vec<String>,
    ) -> Result<TenantUser> {
        let mut member: TenantUserActiveModel = self
            .find_membership(tenant_id, user_id)
            .await?
            .ok_or_else(|| AppError::MemberNotFound { user_id: user_id.to_string() })?
            .into();

        member.role = Set(role.as_str().to_string());
        member.permissions = Set(serde_json::json!(permissions));
        member.updated_at = Set(chrono::Utc::now().into());

        member.update(self.write_conn()).await.map_err(Into::into)
    }

    async fn remove_member(&self, tenant_id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = TenantUserEntity::delete_many()
            .filter(TenantUserColumn::TenantId.eq(tenant_id))
            .filter(TenantUserColumn::UserId.eq(user_id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn count_members(&self, tenant_id: Uuid) -> Result<u64> {
        TenantUserEntity::find()
            .filter(TenantUserColumn::TenantId.eq(tenant_id))
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // API Key Operations
    // ========================================================================

    async fn create_api_key(&self, key: NewApiKey) -> Result<ApiKey> {
        let now = chrono::Utc::now();

        ApiKeyActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(key.tenant_id),
            created_by: Set(key.created_by),
            name: Set(key.name),
            key_prefix: Set(key.key_prefix),
            key_hash: Set(key.key_hash),
            permissions: Set(serde_json::json!(key.permissions)),
            is_active: Set(true),
            expires_at: Set(key.expires_at.map(Into::into)),
            last_used_at: Set(None),
            created_at: Set(now.into()),
        }
        .insert(self.write_conn())
        .await
        .map_err(Into::into)
    }

    async fn find_api_key(&self, id: Uuid) -> Result<Option<ApiKey>> {
        ApiKeyEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_api_key_by_hash(&self, hash: &str) -> Result<Option<ApiKey>> {
        ApiKeyEntity::find()
            .filter(ApiKeyColumn::KeyHash.eq(hash))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_api_keys(&self, tenant_id: Uuid) -> Result<Vec<ApiKey>> {
        ApiKeyEntity::find()
            .filter(ApiKeyColumn::TenantId.eq(tenant_id))
            .order_by_desc(ApiKeyColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn update_api_key(&self, id: Uuid, changes: ApiKeyChanges) -> Result<ApiKey> {
        let mut key: ApiKeyActiveModel = ApiKeyEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::ApiKeyNotFound { id: id.to_string() })?
            .into();

        if let Some(name) = changes.name {
            key.name = Set(name);
        }
        if let Some(is_active) = changes.is_active {
            key.is_active = Set(is_active);
        }
        if let Some(permissions) = changes.permissions {
            key.permissions = Set(serde_json::json!(permissions));
        }

        key.update(self.write_conn()).await.map_err(Into::into)
    }

    async fn delete_api_key(&self, id: Uuid) -> Result<bool> {
        let result = ApiKeyEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn touch_api_key(&self, id: Uuid) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE api_keys SET last_used_at = NOW() WHERE id = $1",
            vec![id.into()],
        );

        self.write_conn().execute(stmt).await?;
        Ok(())
    }

    async fn count_active_api_keys(&self, tenant_id: Uuid) -> Result<u64> {
        ApiKeyEntity::find()
            .filter(ApiKeyColumn::TenantId.eq(tenant_id))
            .filter(ApiKeyColumn::IsActive.eq(true))
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Usage Operations
    // ========================================================================

    async fn record_usage(&self, tenant_id: Uuid, period: &str, delta: UsageDelta) -> Result<UsageStat> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO usage_stats (
                id, tenant_id, period, request_count, prompt_tokens,
                completion_tokens, cost_micros, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (tenant_id, period) DO UPDATE SET
                request_count = usage_stats.request_count + EXCLUDED.request_count,
                prompt_tokens = usage_stats.prompt_tokens + EXCLUDED.prompt_tokens,
                completion_tokens = usage_stats.completion_tokens + EXCLUDED.completion_tokens,
                cost_micros = usage_stats.cost_micros + EXCLUDED.cost_micros,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
            vec![
                Uuid::new_v4().into(),
                tenant_id.into(),
                period.into(),
                delta.requests.into(),
                delta.prompt_tokens.into(),
                delta.completion_tokens.into(),
                delta.cost_micros.into(),
            ],
        );

        UsageStatEntity::find()
            .from_raw_sql(stmt)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::Internal {
                message: "usage upsert returned no row".to_string(),
            })
    }

    async fn reserve_request(&self, tenant_id: Uuid, period: &str, limit: i64) -> Result<Option<UsageStat>> {
        // The conflict branch only updates while under the limit; no row comes back otherwise
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO usage_stats (
                id, tenant_id, period, request_count, prompt_tokens,
                completion_tokens, cost_micros, updated_at
            )
            VALUES ($1, $2, $3, 1, 0, 0, 0, NOW())
            ON CONFLICT (tenant_id, period) DO UPDATE SET
                request_count = usage_stats.request_count + 1,
                updated_at = EXCLUDED.updated_at
            WHERE $4::BIGINT <= 0 OR usage_stats.request_count < $4::BIGINT
            RETURNING *
            "#,
            vec![Uuid::new_v4().into(), tenant_id.into(), period.into(), limit.into()],
        );

        UsageStatEntity::find()
            .from_raw_sql(stmt)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_usage(&self, tenant_id: Uuid, period: &str) -> Result<Option<UsageStat>> {
        UsageStatEntity::find()
            .filter(UsageStatColumn::TenantId.eq(tenant_id))
            .filter(UsageStatColumn::Period.eq(period))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_usage(&self, tenant_id: Uuid, limit: u64) -> Result<Vec<UsageStat>> {
        UsageStatEntity::find()
            .filter(UsageStatColumn::TenantId.eq(tenant_id))
            .order_by_desc(UsageStatColumn::Period)
            .limit(limit)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }
}
