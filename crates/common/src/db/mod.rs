//! Database layer for RelayForge
//!
//! Provides:
//! - SeaORM entity models
//! - The [`Store`] seam with a Postgres and an in-memory implementation
//! - Connection pool management

mod memory;
pub mod models;
mod repository;
mod store;

pub use memory::MemoryStore;
pub use repository::Repository;
pub use store::{
    ApiKeyChanges, NewApiKey, NewTenant, ProfileChanges, ProfileSeed, Store, TenantChanges,
    UsageDelta,
};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema,
};
use std::time::Duration;
use tracing::info;

/// Primary connection plus an optional read replica
#[derive(Clone)]
pub struct DbPool {
    /// Writes and read-after-write
    pub primary: DatabaseConnection,

    /// Plain reads when configured
    pub replica: Option<DatabaseConnection>,
}

async fn connect(url: &str, config: &DatabaseConfig, role: &str) -> Result<DatabaseConnection> {
    info!(role, "Connecting to database");

    let mut options = ConnectOptions::new(url);
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(false);

    Database::connect(options)
        .await
        .map_err(|e| AppError::DatabaseConnection {
            message: format!("Failed to connect to {}: {}", role, e),
        })
}

async fn ping_one(conn: &DatabaseConnection, role: &str) -> Result<()> {
    conn.execute_unprepared("SELECT 1")
        .await
        .map(|_| ())
        .map_err(|e| AppError::DatabaseConnection {
            message: format!("{} ping failed: {}", role, e),
        })
}

/// Composite uniqueness the store relies on for duplicate detection and upserts
fn unique_indexes() -> Vec<IndexCreateStatement> {
    vec![
        Index::create()
            .name("uq_tenant_users_tenant_user")
            .table(models::TenantUserEntity)
            .col(models::TenantUserColumn::TenantId)
            .col(models::TenantUserColumn::UserId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("uq_usage_stats_tenant_period")
            .table(models::UsageStatEntity)
            .col(models::UsageStatColumn::TenantId)
            .col(models::UsageStatColumn::Period)
            .unique()
            .if_not_exists()
            .to_owned(),
    ]
}

impl DbPool {
    /// Connect the primary and, when configured, the read replica
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let primary = connect(&config.url, config, "primary").await?;

        let replica = match config.read_url {
            Some(ref read_url) => Some(connect(read_url, config, "replica").await?),
            None => None,
        };

        info!(replica = replica.is_some(), "Database connections established");

        Ok(Self { primary, replica })
    }

    /// Replica if available, otherwise primary
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    pub async fn ping(&self) -> Result<()> {
        ping_one(&self.primary, "primary").await?;
        if let Some(ref replica) = self.replica {
            ping_one(replica, "replica").await?;
        }
        Ok(())
    }

    /// Create missing tables and indexes; existing ones are left alone
    pub async fn ensure_schema(&self) -> Result<()> {
        let conn = self.write();
        let backend = conn.get_database_backend();
        let schema = Schema::new(backend);

        async fn create<E: EntityTrait>(
            conn: &DatabaseConnection,
            schema: &Schema,
            entity: E,
        ) -> Result<()> {
            let mut statement = schema.create_table_from_entity(entity);
            statement.if_not_exists();
            conn.execute(conn.get_database_backend().build(&statement)).await?;
            Ok(())
        }

        // Parents before children
        create(conn, &schema, models::UserProfileEntity).await?;
        create(conn, &schema, models::TenantEntity).await?;
        create(conn, &schema, models::TenantUserEntity).await?;
        create(conn, &schema, models::ApiKeyEntity).await?;
        create(conn, &schema, models::UsageStatEntity).await?;

        for index in unique_indexes() {
            conn.execute(backend.build(&index)).await?;
        }

        info!("Database schema ready");
        Ok(())
    }
}
