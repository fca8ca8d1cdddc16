//! SeaORM entity models
//!
//! Database entities for RelayForge

mod api_key;
mod tenant;
mod tenant_user;
mod usage_stat;
mod user_profile;

pub use tenant::{
    Entity as TenantEntity,
    Model as Tenant,
    ActiveModel as TenantActiveModel,
    Column as TenantColumn,
};

pub use tenant_user::{
    Entity as TenantUserEntity,
    Model as TenantUser,
    ActiveModel as TenantUserActiveModel,
    Column as TenantUserColumn,
};

pub use api_key::{
    Entity as ApiKeyEntity,
    Model as ApiKey,
    ActiveModel as ApiKeyActiveModel,
    Column as ApiKeyColumn,
};

pub use usage_stat::{
    Entity as UsageStatEntity,
    Model as UsageStat,
    ActiveModel as UsageStatActiveModel,
    Column as UsageStatColumn,
};

pub use user_profile::{
    Entity as UserProfileEntity,
    Model as UserProfile,
    ActiveModel as UserProfileActiveModel,
    Column as UserProfileColumn,
};
