//! API handlers module

pub mod admin;
pub mod ai;
pub mod api_keys;
pub mod auth;
pub mod debug;
pub mod health;
pub mod members;
pub mod tenants;
pub mod usage;
