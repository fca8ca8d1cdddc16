//! RelayForge Common Library
//!
//! Shared code for the RelayForge services including:
//! - Database models and the data-access seam
//! - Tenancy rules (roles, permissions, plans)
//! - Authentication against the hosted identity provider
//! - AI provider integrations and the provider router
//! - Error types, response envelopes and configuration
//! - Metrics and observability

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod providers;
pub mod response;
pub mod tenancy;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{MemoryStore, Repository, Store};
pub use errors::{AppError, Result};
pub use providers::{ProviderRegistry, ProviderRouter};
pub use response::ApiResponse;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
