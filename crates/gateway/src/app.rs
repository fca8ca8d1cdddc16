//! Application state and route table

use crate::handlers::{admin, ai, api_keys, auth, debug, health, members, tenants, usage};
use crate::middleware::{metrics::track_metrics, rate_limit::{rate_limit, KeyedRateLimiter}};
use axum::{
    extract::FromRef,
    http::HeaderName,
    middleware::from_fn_with_state,
    routing::get,
    routing::post,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use relayforge_common::{
    auth::{AuthState, IdentityProvider},
    config::AppConfig,
    db::Store,
    errors::AppError,
    providers::ProviderRouter,
};
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub auth: AuthState,
    pub router: Arc<ProviderRouter>,
    pub limiter: Option<Arc<KeyedRateLimiter>>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn Store>,
        identity: Arc<dyn IdentityProvider>,
        router: Arc<ProviderRouter>,
    ) -> Self {
        let auth = AuthState {
            identity,
            store: store.clone(),
            config: Arc::new(config.auth.clone()),
        };

        Self {
            config,
            store,
            auth,
            router,
            limiter: None,
            metrics: None,
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<KeyedRateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

async fn api_not_found() -> AppError {
    AppError::NotFound {
        resource_type: "route".to_string(),
        id: "requested path".to_string(),
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let config = state.config.clone();

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id_header = HeaderName::from_bytes(config.auth.request_id_header.to_lowercase().as_bytes())
        .unwrap_or_else(|_| HeaderName::from_static("x-request-id"));
    let request_id = SetRequestIdLayer::new(request_id_header.clone(), MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::new(request_id_header);

    let mut api_routes = Router::new()
        // Session glue
        .route("/auth/callback", get(auth::callback))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/signout", post(auth::signout))
        .route("/auth/me", get(auth::me))

        // AI routing
        .route("/ai/route", post(ai::route))
        .route("/ai/blog", post(ai::blog))
        .route("/ai/providers", get(ai::providers))

        // Tenants
        .route("/tenants", get(tenants::list).post(tenants::create))
        .route(
            "/tenants/{id}",
            get(tenants::get).patch(tenants::update).delete(tenants::delete),
        )

        // Members
        .route("/tenants/{id}/members", get(members::list).post(members::add))
        .route(
            "/tenants/{id}/members/{user_id}",
            axum::routing::patch(members::update).delete(members::remove),
        )

        // API keys
        .route("/tenants/{id}/api-keys", get(api_keys::list).post(api_keys::create))
        .route(
            "/tenants/{id}/api-keys/{key_id}",
            get(api_keys::get).patch(api_keys::update).delete(api_keys::revoke),
        )

        // Usage
        .route("/tenants/{id}/usage", get(usage::current))
        .route("/tenants/{id}/usage/history", get(usage::history))

        // Platform administration
        .route("/admin/users", get(admin::list_users))
        .route(
            "/admin/users/{id}",
            get(admin::get_user).patch(admin::update_user).delete(admin::delete_user),
        )
        .route("/admin/tenants", get(admin::list_tenants))
        .route("/admin/providers", get(admin::list_providers))
        .route(
            "/admin/providers/{name}",
            get(admin::get_provider).patch(admin::update_provider),
        );

    if config.server.debug_endpoints {
        api_routes = api_routes
            .route("/debug/session", get(debug::session))
            .route("/debug/cookies", get(debug::cookies));
    }

    let mut api_routes = api_routes.fallback(api_not_found);

    if state.limiter.is_some() {
        api_routes = api_routes.layer(from_fn_with_state(state.clone(), rate_limit));
    }

    let mut app = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .nest("/api", api_routes);

    if let Some(handle) = state.metrics.clone() {
        app = app.route("/metrics", get(move || std::future::ready(handle.render())));
    }

    // Compose the app
    app.layer(axum::middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(ConcurrencyLimitLayer::new(config.server.max_concurrent_requests))
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}
