//! Process-wide provider registry
//!
//! Built once at startup from configuration. Definitions can be listed and
//! providers toggled at runtime; each entry owns its circuit breaker.

use super::{create_provider, CircuitBreaker, CircuitState, Provider};
use crate::config::{ProviderConfig, ProviderKind, RouterConfig};
use crate::errors::{AppError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// A provider definition with its client and breaker
#[derive(Clone)]
pub struct RegisteredProvider {
    pub config: ProviderConfig,
    pub client: Arc<dyn Provider>,
    pub breaker: Arc<CircuitBreaker>,
}

/// Public view of a registered provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub kind: ProviderKind,
    pub model: String,
    pub enabled: bool,
    pub quality: f64,
    pub avg_latency_ms: u64,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    pub max_output_tokens: u32,
    pub features: Vec<String>,
    pub priority: u32,
    pub circuit: CircuitState,
    pub consecutive_failures: u32,
}

impl From<&RegisteredProvider> for ProviderStatus {
    fn from(entry: &RegisteredProvider) -> Self {
        let c = &entry.config;
        Self {
            name: c.name.clone(),
            kind: c.kind,
            model: c.model.clone(),
            enabled: c.enabled,
            quality: c.quality,
            avg_latency_ms: c.avg_latency_ms,
            input_cost_per_1k: c.input_cost_per_1k,
            output_cost_per_1k: c.output_cost_per_1k,
            max_output_tokens: c.max_output_tokens,
            features: c.features.clone(),
            priority: c.priority,
            circuit: entry.breaker.state(),
            consecutive_failures: entry.breaker.consecutive_failures(),
        }
    }
}

pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, RegisteredProvider>>,
    failure_threshold: u32,
    cooldown: std::time::Duration,
}

impl ProviderRegistry {
    pub fn new(router: &RouterConfig) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            failure_threshold: router.failure_threshold,
            cooldown: router.cooldown(),
        }
    }

    /// Build clients for every configured provider
    pub fn from_config(router: &RouterConfig, providers: &[ProviderConfig]) -> Result<Self> {
        let registry = Self::new(router);
        let mut map = HashMap::with_capacity(providers.len());

        for config in providers {
            let client = create_provider(config)?;
            map.insert(config.name.clone(), registry.entry(config.clone(), client));
            info!(provider = %config.name, kind = ?config.kind, model = %config.model, "Provider registered");
        }

        Ok(Self {
            providers: RwLock::new(map),
            ..registry
        })
    }

    fn entry(&self, config: ProviderConfig, client: Arc<dyn Provider>) -> RegisteredProvider {
        RegisteredProvider {
            breaker: Arc::new(CircuitBreaker::new(&config.name, self.failure_threshold, self.cooldown)),
            config,
            client,
        }
    }

    /// Add or replace a provider
    pub async fn register(&self, config: ProviderConfig, client: Arc<dyn Provider>) {
        let entry = self.entry(config, client);
        self.providers
            .write()
            .await
            .insert(entry.config.name.clone(), entry);
    }

    pub async fn get(&self, name: &str) -> Option<RegisteredProvider> {
        self.providers.read().await.get(name).cloned()
    }

    /// All entries, ordered by name
    pub async fn snapshot(&self) -> Vec<RegisteredProvider> {
        let mut entries: Vec<RegisteredProvider> =
            self.providers.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.config.name.cmp(&b.config.name));
        entries
    }

    pub async fn list(&self) -> Vec<ProviderStatus> {
        self.snapshot().await.iter().map(ProviderStatus::from).collect()
    }

    pub async fn status(&self, name: &str) -> Result<ProviderStatus> {
        self.get(name)
            .await
            .map(|entry| ProviderStatus::from(&entry))
            .ok_or_else(|| AppError::ProviderNotFound { name: name.to_string() })
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<ProviderStatus> {
        let mut providers = self.providers.write().await;
        let entry = providers
            .get_mut(name)
            .ok_or_else(|| AppError::ProviderNotFound { name: name.to_string() })?;

        entry.config.enabled = enabled;
        info!(provider = %name, enabled, "Provider toggled");
        Ok(ProviderStatus::from(&*entry))
    }

    pub async fn reset_circuit(&self, name: &str) -> Result<ProviderStatus> {
        let entry = self
            .get(name)
            .await
            .ok_or_else(|| AppError::ProviderNotFound { name: name.to_string() })?;
        entry.breaker.reset();
        Ok(ProviderStatus::from(&entry))
    }

    pub async fn is_empty(&self) -> bool {
        self.providers.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ProviderRegistry {
        ProviderRegistry::from_config(
            &RouterConfig::default(),
            &[ProviderConfig::mock("beta"), ProviderConfig::mock("alpha")],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let names: Vec<String> = registry().list().await.into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_toggle() {
        let registry = registry();
        let status = registry.set_enabled("alpha", false).await.unwrap();
        assert!(!status.enabled);
        assert!(!registry.get("alpha").await.unwrap().config.enabled);

        let err = registry.set_enabled("gamma", false).await.unwrap_err();
        assert!(matches!(err, AppError::ProviderNotFound { .. }));
    }

    #[tokio::test]
    async fn test_reset_circuit() {
        let registry = registry();
        let entry = registry.get("beta").await.unwrap();
        for _ in 0..RouterConfig::default().failure_threshold {
            entry.breaker.record_failure();
        }
        assert_eq!(registry.status("beta").await.unwrap().circuit, CircuitState::Open);

        let status = registry.reset_circuit("beta").await.unwrap();
        assert_eq!(status.circuit, CircuitState::Closed);
    }
}
