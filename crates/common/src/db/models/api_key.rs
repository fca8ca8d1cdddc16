//! Tenant API key entity
//!
//! Only the SHA-256 hash of a key is stored. `key_prefix` keeps enough of
//! the raw key to tell keys apart in listings.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub created_by: Uuid,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    #[sea_orm(column_type = "Text")]
    pub key_prefix: String,

    #[sea_orm(column_type = "Text", unique)]
    #[serde(skip_serializing)]
    pub key_hash: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub permissions: serde_json::Value,

    pub is_active: bool,

    pub expires_at: Option<DateTimeWithTimeZone>,

    pub last_used_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn is_expired(&self) -> bool {
        use chrono::Utc;
        self.expires_at
            .map(|at| at < Utc::now().fixed_offset())
            .unwrap_or(false)
    }

    /// Active and not past its expiry
    pub fn is_usable(&self) -> bool {
        self.is_active && !self.is_expired()
    }

    pub fn permission_list(&self) -> Vec<String> {
        serde_json::from_value(self.permissions.clone()).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tenant::Entity",
        from = "Column::TenantId",
        to = "super::tenant::Column::Id"
    )]
    Tenant,
}

impl Related<super::tenant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
