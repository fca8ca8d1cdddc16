//! Configuration management for RelayForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - `config/default`, `config/<APP_ENV>` and `config/local` files
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Hosted identity provider configuration
    pub identity: IdentityConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Provider router configuration
    #[serde(default)]
    pub router: RouterConfig,

    /// Upstream AI providers
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Mount the session/cookie diagnostic endpoints
    #[serde(default)]
    pub debug_endpoints: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Create missing tables on startup
    #[serde(default = "default_enabled")]
    pub auto_migrate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    /// Base URL of the hosted identity provider (e.g. https://project.example.co)
    pub url: String,

    /// Public (anon) key sent as the `apikey` header
    #[serde(default)]
    pub anon_key: String,

    /// HS256 secret for local access-token verification.
    /// When absent, tokens are verified remotely.
    pub jwt_secret: Option<String>,

    /// Expected `aud` claim
    #[serde(default = "default_jwt_audience")]
    pub jwt_audience: String,

    /// HTTP timeout in seconds
    #[serde(default = "default_identity_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Prefix every issued API key carries
    #[serde(default = "default_api_key_prefix")]
    pub api_key_prefix: String,

    /// Cookie name prefix; cookies are `<prefix>-access-token`, `<prefix>-refresh-token`
    #[serde(default = "default_cookie_prefix")]
    pub cookie_prefix: String,

    /// Mark session cookies `Secure`
    #[serde(default = "default_cookie_secure")]
    pub cookie_secure: bool,

    /// Optional cookie domain
    pub cookie_domain: Option<String>,

    /// Tenant ID header name
    #[serde(default = "default_tenant_header")]
    pub tenant_header: String,

    /// Request ID header name
    #[serde(default = "default_request_id_header")]
    pub request_id_header: String,

    /// Emails promoted to platform admin when their profile is first created
    #[serde(default)]
    pub bootstrap_admins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    /// Attempts per provider before falling back to the next one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound for a single retry delay in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Consecutive failures that open a provider's circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open circuit rejects calls before probing again
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Completion tokens assumed when the request does not set `max_tokens`
    #[serde(default = "default_completion_tokens")]
    pub default_completion_tokens: u32,
}

/// Kind of upstream integration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible `/chat/completions`
    Openai,
    /// Anthropic `/messages`
    Anthropic,
    /// Deterministic local provider
    Mock,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Unique provider name used in preferences and exclusions
    pub name: String,

    pub kind: ProviderKind,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// API key for the provider
    pub api_key: Option<String>,

    /// Model to use
    pub model: String,

    /// USD per 1K prompt tokens
    #[serde(default)]
    pub input_cost_per_1k: f64,

    /// USD per 1K completion tokens
    #[serde(default)]
    pub output_cost_per_1k: f64,

    /// Relative answer quality, 0.0 - 1.0
    #[serde(default = "default_quality")]
    pub quality: f64,

    /// Typical end-to-end latency in milliseconds
    #[serde(default = "default_avg_latency")]
    pub avg_latency_ms: u64,

    /// Largest completion the model produces
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Feature tags, e.g. `chat`, `json_mode`, `long_context`, `vision`
    #[serde(default)]
    pub features: Vec<String>,

    /// Lower wins ties
    #[serde(default = "default_priority")]
    pub priority: u32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Expose Prometheus metrics on /metrics
    #[serde(default = "default_enabled")]
    pub metrics_enabled: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (per client)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 60 }
fn default_max_concurrent() -> usize { 100 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_jwt_audience() -> String { "authenticated".to_string() }
fn default_identity_timeout() -> u64 { 10 }
fn default_api_key_prefix() -> String { "rfk_".to_string() }
fn default_cookie_prefix() -> String { "rf".to_string() }
fn default_cookie_secure() -> bool { true }
fn default_tenant_header() -> String { "X-Tenant-ID".to_string() }
fn default_request_id_header() -> String { "X-Request-ID".to_string() }
fn default_max_attempts() -> u32 { 2 }
fn default_initial_backoff() -> u64 { 200 }
fn default_max_backoff() -> u64 { 2_000 }
fn default_failure_threshold() -> u32 { 5 }
fn default_cooldown() -> u64 { 30 }
fn default_completion_tokens() -> u32 { 512 }
fn default_quality() -> f64 { 0.5 }
fn default_avg_latency() -> u64 { 2_000 }
fn default_max_output_tokens() -> u32 { 4_096 }
fn default_priority() -> u32 { 100 }
fn default_provider_timeout() -> u64 { 60 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "relayforge".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            max_concurrent_requests: default_max_concurrent(),
            debug_endpoints: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key_prefix: default_api_key_prefix(),
            cookie_prefix: default_cookie_prefix(),
            cookie_secure: default_cookie_secure(),
            cookie_domain: None,
            tenant_header: default_tenant_header(),
            request_id_header: default_request_id_header(),
            bootstrap_admins: Vec::new(),
        }
    }
}

impl AuthConfig {
    pub fn access_cookie(&self) -> String {
        format!("{}-access-token", self.cookie_prefix)
    }

    pub fn refresh_cookie(&self) -> String {
        format!("{}-refresh-token", self.cookie_prefix)
    }

    pub fn code_verifier_cookie(&self) -> String {
        format!("{}-code-verifier", self.cookie_prefix)
    }

    /// Case-insensitive membership in `bootstrap_admins`
    pub fn is_bootstrap_admin(&self, email: &str) -> bool {
        self.bootstrap_admins
            .iter()
            .any(|admin| admin.eq_ignore_ascii_case(email))
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown(),
            default_completion_tokens: default_completion_tokens(),
        }
    }
}

impl RouterConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl ProviderConfig {
    /// Minimal mock provider definition
    pub fn mock(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ProviderKind::Mock,
            api_base: None,
            api_key: None,
            model: format!("{}-model", name),
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
            quality: default_quality(),
            avg_latency_ms: 10,
            max_output_tokens: default_max_output_tokens(),
            features: vec!["chat".to_string()],
            priority: default_priority(),
            enabled: true,
            timeout_secs: default_provider_timeout(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_enabled: default_enabled(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject provider tables that cannot be routed to
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::Message(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
            if !(0.0..=1.0).contains(&provider.quality) {
                return Err(ConfigError::Message(format!(
                    "provider '{}' quality must be within 0.0..=1.0",
                    provider.name
                )));
            }
            if provider.kind != ProviderKind::Mock && provider.api_key.is_none() {
                return Err(ConfigError::Message(format!(
                    "provider '{}' requires an api_key",
                    provider.name
                )));
            }
        }
        if self.router.max_attempts == 0 {
            return Err(ConfigError::Message("router.max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/relayforge".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
                auto_migrate: default_enabled(),
            },
            identity: IdentityConfig {
                url: "http://localhost:54321".to_string(),
                anon_key: String::new(),
                jwt_secret: None,
                jwt_audience: default_jwt_audience(),
                timeout_secs: default_identity_timeout(),
            },
            auth: AuthConfig::default(),
            router: RouterConfig::default(),
            providers: Vec::new(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.api_key_prefix, "rfk_");
        assert_eq!(config.router.max_attempts, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cookie_names() {
        let auth = AuthConfig::default();
        assert_eq!(auth.access_cookie(), "rf-access-token");
        assert_eq!(auth.refresh_cookie(), "rf-refresh-token");
        assert_eq!(auth.code_verifier_cookie(), "rf-code-verifier");
    }

    #[test]
    fn test_duplicate_provider_rejected() {
        let mut config = AppConfig::default();
        config.providers = vec![ProviderConfig::mock("a"), ProviderConfig::mock("a")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_remote_provider_requires_key() {
        let mut config = AppConfig::default();
        let mut provider = ProviderConfig::mock("openai");
        provider.kind = ProviderKind::Openai;
        config.providers = vec![provider];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bootstrap_admin_matching() {
        let auth = AuthConfig {
            bootstrap_admins: vec!["Ops@Example.com".into()],
            ..AuthConfig::default()
        };
        assert!(auth.is_bootstrap_admin("ops@example.com"));
        assert!(!auth.is_bootstrap_admin("dev@example.com"));
    }
}
