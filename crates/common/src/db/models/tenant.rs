//! Tenant entity

use crate::tenancy::{Plan, SubscriptionStatus};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tenants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    #[sea_orm(column_type = "Text", unique)]
    pub slug: String,

    #[sea_orm(column_type = "Text")]
    pub plan: String,

    #[sea_orm(column_type = "Text")]
    pub subscription_status: String,

    /// Zero means unlimited
    pub max_users: i32,

    /// Zero means unlimited
    pub max_api_keys: i32,

    /// Zero means unlimited
    pub monthly_request_limit: i64,

    pub is_active: bool,

    #[sea_orm(column_type = "JsonBinary")]
    pub settings: serde_json::Value,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn plan(&self) -> Plan {
        Plan::parse(&self.plan).unwrap_or(Plan::Free)
    }

    pub fn subscription(&self) -> SubscriptionStatus {
        SubscriptionStatus::parse(&self.subscription_status).unwrap_or(SubscriptionStatus::Canceled)
    }

    /// Active flag set and subscription in good standing
    pub fn can_use_services(&self) -> bool {
        self.is_active && self.subscription().allows_usage()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::tenant_user::Entity")]
    Members,

    #[sea_orm(has_many = "super::api_key::Entity")]
    ApiKeys,

    #[sea_orm(has_many = "super::usage_stat::Entity")]
    UsageStats,
}

impl Related<super::tenant_user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Members.def()
    }
}

impl Related<super::api_key::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ApiKeys.def()
    }
}

impl Related<super::usage_stat::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UsageStats.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
