//! Data-access seam
//!
//! Handlers talk to persistence only through [`Store`]. The SeaORM
//! [`Repository`](super::Repository) backs production; [`MemoryStore`](super::MemoryStore)
//! backs local development and tests.

use crate::db::models::{ApiKey, Tenant, TenantUser, UsageStat, UserProfile};
use crate::errors::Result;
use crate::tenancy::{Plan, Role, SubscriptionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Fields required to create a tenant
#[derive(Debug, Clone)]
pub struct NewTenant {
    pub name: String,
    pub slug: String,
    pub plan: Plan,
    pub settings: serde_json::Value,
}

/// Partial tenant update; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct TenantChanges {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub plan: Option<Plan>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub is_active: Option<bool>,
    pub settings: Option<serde_json::Value>,
}

/// Identity facts used to create or refresh a profile
#[derive(Debug, Clone)]
pub struct ProfileSeed {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub is_platform_admin: bool,
}

/// Partial profile update
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub full_name: Option<Option<String>>,
    pub is_platform_admin: Option<bool>,
    pub is_disabled: Option<bool>,
}

/// Fields required to persist a new API key
#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub tenant_id: Uuid,
    pub created_by: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub key_hash: String,
    pub permissions: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Partial API key update
#[derive(Debug, Clone, Default)]
pub struct ApiKeyChanges {
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub permissions: Option<Vec<String>>,
}

/// Amounts added to a usage period
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageDelta {
    pub requests: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_micros: i64,
}

/// Persistence operations for tenants, members, keys, usage and profiles
#[async_trait]
pub trait Store: Send + Sync {
    /// Check connectivity
    async fn ping(&self) -> Result<()>;

    // Profiles
    /// Create the profile on first sight, otherwise bump `last_sign_in_at`
    async fn upsert_profile(&self, seed: ProfileSeed) -> Result<UserProfile>;
    async fn find_profile(&self, id: Uuid) -> Result<Option<UserProfile>>;
    async fn find_profile_by_email(&self, email: &str) -> Result<Option<UserProfile>>;
    async fn list_profiles(&self, offset: u64, limit: u64) -> Result<(Vec<UserProfile>, u64)>;
    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> Result<UserProfile>;
    /// Deletes the profile and its memberships
    async fn delete_profile(&self, id: Uuid) -> Result<bool>;

    // Tenants
    /// Create a tenant and its owner membership atomically
    async fn create_tenant(&self, owner_id: Uuid, tenant: NewTenant) -> Result<(Tenant, TenantUser)>;
    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>>;
    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>>;
    async fn list_tenants(&self, offset: u64, limit: u64) -> Result<(Vec<Tenant>, u64)>;
    async fn list_tenants_for_user(&self, user_id: Uuid) -> Result<Vec<(Tenant, TenantUser)>>;
    async fn update_tenant(&self, id: Uuid, changes: TenantChanges) -> Result<Tenant>;
    /// Deletes the tenant with its members, keys and usage
    async fn delete_tenant(&self, id: Uuid) -> Result<bool>;

    // Memberships
    async fn find_membership(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Option<TenantUser>>;
    async fn list_members(&self, tenant_id: Uuid) -> Result<Vec<TenantUser>>;
    async fn add_member(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role: Role,
        permissions: Vec<String>,
    ) -> Result<TenantUser>;
    async fn update_member(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role: Role,
        permissions: Vec<String>,
    ) -> Result<TenantUser>;
    async fn remove_member(&self, tenant_id: Uuid, user_id: Uuid) -> Result<bool>;
    async fn count_members(&self, tenant_id: Uuid) -> Result<u64>;

    // API keys
    async fn create_api_key(&self, key: NewApiKey) -> Result<ApiKey>;
    async fn find_api_key(&self, id: Uuid) -> Result<Option<ApiKey>>;
    async fn find_api_key_by_hash(&self, hash: &str) -> Result<Option<ApiKey>>;
    async fn list_api_keys(&self, tenant_id: Uuid) -> Result<Vec<ApiKey>>;
    async fn update_api_key(&self, id: Uuid, changes: ApiKeyChanges) -> Result<ApiKey>;
    async fn delete_api_key(&self, id: Uuid) -> Result<bool>;
    async fn touch_api_key(&self, id: Uuid) -> Result<()>;
    async fn count_active_api_keys(&self, tenant_id: Uuid) -> Result<u64>;

    // Usage
    /// Add `delta` to the tenant's counters for `period`, creating the row if needed
    async fn record_usage(&self, tenant_id: Uuid, period: &str, delta: UsageDelta) -> Result<UsageStat>;
    /// Count one request against `period` if the count stays within `limit`
    ///
    /// Check and increment happen atomically. Returns `None` once the quota is
    /// spent; a `limit` of zero or less never rejects.
    async fn reserve_request(&self, tenant_id: Uuid, period: &str, limit: i64) -> Result<Option<UsageStat>>;
    async fn find_usage(&self, tenant_id: Uuid, period: &str) -> Result<Option<UsageStat>>;
    /// Most recent periods first
    async fn list_usage(&self, tenant_id: Uuid, limit: u64) -> Result<Vec<UsageStat>>;
}
