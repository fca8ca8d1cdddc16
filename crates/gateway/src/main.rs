//! RelayForge API Gateway
//!
//! The entry point for all external API requests.
//! Handles:
//! - Session glue and request authentication
//! - Tenant, member and API key management
//! - AI provider routing with usage metering
//! - Rate limiting and observability (logging, metrics)

mod app;
mod extract;
mod handlers;
mod middleware;


use anyhow::Context;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use relayforge_common::{
    auth::HostedIdentityClient,
    config::AppConfig,
    db::{DbPool, MemoryStore, Repository, Store},
    metrics::{self, LATENCY_BUCKETS, METRICS_PREFIX, PROVIDER_BUCKETS},
    providers::{ProviderRegistry, ProviderRouter},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::{create_router, AppState};
use crate::middleware::rate_limit::create_rate_limiter;

/// Database URL that selects the in-process store
const MEMORY_DATABASE_URL: &str = "memory://";

/// How often idle rate-limit buckets are dropped
const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;

    init_tracing(&config);

    info!(
        version = relayforge_common::VERSION,
        service = %config.observability.service_name,
        "Starting RelayForge API Gateway"
    );

    let config = Arc::new(config);

    // Initialize metrics
    let metrics_handle = if config.observability.metrics_enabled {
        let handle = install_prometheus()?;
        metrics::register_metrics();
        Some(handle)
    } else {
        None
    };

    let store = connect_store(&config).await?;

    let identity = Arc::new(
        HostedIdentityClient::new(&config.identity).context("failed to build identity client")?,
    );

    let registry = Arc::new(
        ProviderRegistry::from_config(&config.router, &config.providers)
            .context("failed to build provider registry")?,
    );
    if registry.is_empty().await {
        warn!("No AI providers configured; routing requests will be rejected");
    }
    let router = Arc::new(ProviderRouter::new(registry, config.router.clone()));

    let mut state = AppState::new(config.clone(), store, identity, router);

    if config.rate_limit.enabled {
        let limiter = create_rate_limiter(config.rate_limit.requests_per_second, config.rate_limit.burst);

        let sweeper = limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(LIMITER_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                sweeper.retain_recent();
            }
        });

        state = state.with_limiter(limiter);
    }

    if let Some(handle) = metrics_handle {
        state = state.with_metrics(handle);
    }

    // Build the router
    let app = create_router(state);

    // Start the server
    let ip = config
        .server
        .host
        .parse::<IpAddr>()
        .with_context(|| format!("invalid server.host '{}'", config.server.host))?;
    let addr = SocketAddr::new(ip, config.server.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn install_prometheus() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_request_duration_seconds", METRICS_PREFIX)),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_route_duration_seconds", METRICS_PREFIX)),
            PROVIDER_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_provider_duration_seconds", METRICS_PREFIX)),
            PROVIDER_BUCKETS,
        )?
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    Ok(handle)
}

async fn connect_store(config: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    if config.database.url == MEMORY_DATABASE_URL {
        warn!("Using the in-memory store; data is lost on restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    info!("Connecting to database...");
    let pool = DbPool::new(&config.database)
        .await
        .context("failed to connect to database")?;

    if config.database.auto_migrate {
        pool.ensure_schema()
            .await
            .context("failed to prepare database schema")?;
    }

    Ok(Arc::new(Repository::new(pool)))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
