//! AI routing handlers
//!
//! Every routed request is billed to a tenant: the key's tenant for API
//! keys, otherwise `tenant_id` from the body or the tenant header.

use axum::{extract::State, http::HeaderMap};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::extract::ApiJson;
use relayforge_common::{
    auth::{authorize_tenant, AuthContext},
    db::{models::Tenant, UsageDelta},
    errors::{AppError, Result},
    metrics,
    providers::{
        Preferences, ProviderStatus, QualityPreference, RouteOptions, RouteRequest, RouteResponse,
        TokenUsage,
    },
    response::ApiResponse,
    tenancy::{current_period, permissions},
};

/// Pick the tenant a request is billed to
fn resolve_tenant(auth: &AuthContext, body: Option<Uuid>, headers: &HeaderMap, header_name: &str) -> Result<Uuid> {
    if let Some(key_tenant) = auth.api_key_tenant() {
        return match body {
            Some(id) if id != key_tenant => Err(AppError::TenantMismatch),
            _ => Ok(key_tenant),
        };
    }

    if let Some(id) = body {
        return Ok(id);
    }

    match headers.get(header_name).and_then(|v| v.to_str().ok()) {
        Some(raw) => Uuid::parse_str(raw.trim()).map_err(|_| AppError::InvalidFormat {
            message: format!("{} must be a UUID", header_name),
        }),
        None => Err(AppError::MissingField { field: "tenant_id".to_string() }),
    }
}

/// Authorize the caller and reserve one request from the tenant's quota
///
/// The reservation is atomic in the store, so concurrent callers cannot push
/// the period past `monthly_request_limit`.
async fn admit(state: &AppState, auth: &AuthContext, tenant_id: Uuid) -> Result<Tenant> {
    let access = authorize_tenant(state.store.as_ref(), auth, tenant_id, permissions::AI_ROUTE).await?;
    let tenant = access.tenant;

    if !tenant.can_use_services() {
        return Err(AppError::TenantInactive { id: tenant_id.to_string() });
    }

    let reserved = state
        .store
        .reserve_request(tenant_id, &current_period(), tenant.monthly_request_limit)
        .await?;

    if reserved.is_none() {
        metrics::record_quota_rejection(&tenant_id.to_string());
        return Err(AppError::QuotaExceeded {
            tenant_id: tenant_id.to_string(),
            limit: tenant.monthly_request_limit,
        });
    }

    Ok(tenant)
}

/// Add tokens and cost for a served request; the request itself was counted by `admit`
async fn meter(state: &AppState, tenant_id: Uuid, usage: &TokenUsage, cost_usd: f64) {
    let delta = UsageDelta {
        requests: 0,
        prompt_tokens: usage.prompt_tokens as i64,
        completion_tokens: usage.completion_tokens as i64,
        cost_micros: (cost_usd * 1_000_000.0).round() as i64,
    };

    // The completion was already served; a metering failure must not fail the request
    if let Err(e) = state.store.record_usage(tenant_id, &current_period(), delta).await {
        tracing::error!(error = %e, tenant_id = %tenant_id, "Failed to record usage");
    }
}

/// Hand back the request reserved by `admit` when routing fails
async fn release(state: &AppState, tenant_id: Uuid) {
    let delta = UsageDelta { requests: -1, ..UsageDelta::default() };
    if let Err(e) = state.store.record_usage(tenant_id, &current_period(), delta).await {
        tracing::error!(error = %e, tenant_id = %tenant_id, "Failed to release reserved request");
    }
}

/// Route through the provider router, metering on success and releasing the
/// reservation on failure
async fn dispatch(state: &AppState, tenant_id: Uuid, request: &RouteRequest) -> Result<RouteResponse> {
    match state.router.route(request).await {
        Ok(response) => {
            meter(state, tenant_id, &response.usage, response.cost_usd).await;
            Ok(response)
        }
        Err(e) => {
            release(state, tenant_id).await;
            Err(e)
        }
    }
}

/// Route a request to the best available provider
pub async fn route(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    ApiJson(request): ApiJson<RouteRequest>,
) -> Result<ApiResponse<RouteResponse>> {
    request.check()?;

    let tenant_id = resolve_tenant(&auth, request.tenant_id, &headers, &state.config.auth.tenant_header)?;
    admit(&state, &auth, tenant_id).await?;

    let response = dispatch(&state, tenant_id, &request).await?;

    tracing::info!(
        request_id = %auth.request_id,
        tenant_id = %tenant_id,
        provider = %response.provider,
        "AI request served"
    );

    Ok(ApiResponse::ok(response))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlogLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl BlogLength {
    fn target_words(&self) -> u32 {
        match self {
            BlogLength::Short => 400,
            BlogLength::Medium => 800,
            BlogLength::Long => 1500,
        }
    }

    /// Completion budget with headroom for Markdown
    fn max_tokens(&self) -> u32 {
        self.target_words() * 2
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct BlogRequest {
    #[validate(length(max = 500))]
    #[serde(default)]
    pub topic: String,

    #[validate(length(max = 20))]
    #[serde(default)]
    pub keywords: Vec<String>,

    #[validate(length(max = 50))]
    pub tone: Option<String>,

    #[serde(default)]
    pub length: BlogLength,

    #[validate(length(max = 200))]
    pub audience: Option<String>,

    pub tenant_id: Option<Uuid>,

    pub preferences: Option<Preferences>,
}

impl BlogRequest {
    /// A blank topic is a missing field; everything else goes through the validators
    fn check(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(AppError::MissingField { field: "topic".to_string() });
        }
        self.validate()?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct BlogResponse {
    pub title: String,
    pub content: String,
    pub word_count: usize,
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    pub cost_usd: f64,
}

const BLOG_SYSTEM_PROMPT: &str = "You are an experienced content writer. Write well-structured, \
    accurate blog posts in Markdown. Start with a single level-one heading as the title.";

fn blog_prompt(request: &BlogRequest) -> String {
    let mut prompt = format!(
        "Write a blog post about: {}\n\nTarget length: about {} words.\nTone: {}.",
        request.topic.trim(),
        request.length.target_words(),
        request.tone.as_deref().unwrap_or("informative"),
    );

    if let Some(ref audience) = request.audience {
        prompt.push_str(&format!("\nAudience: {}.", audience));
    }
    if !request.keywords.is_empty() {
        prompt.push_str(&format!("\nWork in these keywords naturally: {}.", request.keywords.join(", ")));
    }
    prompt.push_str("\nUse subheadings and end with a short conclusion.");
    prompt
}

/// First Markdown heading, or `fallback`
pub fn extract_title(content: &str, fallback: &str) -> String {
    content
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| fallback.trim().to_string())
}

/// Generate a blog post through the router
pub async fn blog(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    ApiJson(request): ApiJson<BlogRequest>,
) -> Result<ApiResponse<BlogResponse>> {
    request.check()?;

    let tenant_id = resolve_tenant(&auth, request.tenant_id, &headers, &state.config.auth.tenant_header)?;
    admit(&state, &auth, tenant_id).await?;

    let mut preferences = request.preferences.clone().unwrap_or_default();
    preferences.quality.get_or_insert(QualityPreference::High);

    let mut route_request = RouteRequest::new(blog_prompt(&request));
    route_request.preferences = preferences;
    route_request.options = RouteOptions {
        temperature: Some(0.7),
        max_tokens: Some(request.length.max_tokens()),
        system_prompt: Some(BLOG_SYSTEM_PROMPT.to_string()),
    };
    route_request.tenant_id = Some(tenant_id);

    let response = dispatch(&state, tenant_id, &route_request).await?;

    tracing::info!(tenant_id = %tenant_id, provider = %response.provider, "Blog post generated");

    Ok(ApiResponse::ok(BlogResponse {
        title: extract_title(&response.content, &request.topic),
        word_count: response.content.split_whitespace().count(),
        content: response.content,
        provider: response.provider,
        model: response.model,
        usage: response.usage,
        cost_usd: response.cost_usd,
    }))
}

/// List provider definitions and their circuit state
pub async fn providers(State(state): State<AppState>, _auth: AuthContext) -> ApiResponse<Vec<ProviderStatus>> {
    ApiResponse::ok(state.router.registry().list().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use relayforge_common::auth::AuthMethod;

    fn user_ctx() -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            email: "dev@example.com".to_string(),
            is_platform_admin: false,
            method: AuthMethod::Bearer,
            scopes: Vec::new(),
            request_id: "req-1".to_string(),
            access_token: None,
        }
    }

    #[test]
    fn test_resolve_tenant_order() {
        let auth = user_ctx();
        let body = Uuid::new_v4();
        let header = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert("x-tenant-id", HeaderValue::from_str(&header.to_string()).unwrap());

        assert_eq!(resolve_tenant(&auth, Some(body), &headers, "X-Tenant-ID").unwrap(), body);
        assert_eq!(resolve_tenant(&auth, None, &headers, "X-Tenant-ID").unwrap(), header);

        let err = resolve_tenant(&auth, None, &HeaderMap::new(), "X-Tenant-ID").unwrap_err();
        assert!(matches!(err, AppError::MissingField { .. }));
    }

    #[test]
    fn test_resolve_tenant_api_key() {
        let key_tenant = Uuid::new_v4();
        let auth = AuthContext {
            method: AuthMethod::ApiKey { key_id: Uuid::new_v4(), tenant_id: key_tenant },
            ..user_ctx()
        };

        assert_eq!(resolve_tenant(&auth, None, &HeaderMap::new(), "X-Tenant-ID").unwrap(), key_tenant);
        assert!(matches!(
            resolve_tenant(&auth, Some(Uuid::new_v4()), &HeaderMap::new(), "X-Tenant-ID"),
            Err(AppError::TenantMismatch)
        ));
    }

    #[test]
    fn test_extract_title() {
        assert_eq!(extract_title("# Rust in 2026\n\nBody", "fallback"), "Rust in 2026");
        assert_eq!(extract_title("Intro\n## Section\n", "fallback"), "Section");
        assert_eq!(extract_title("No headings here", " Topic "), "Topic");
        assert_eq!(extract_title("#\n", "Topic"), "Topic");
    }

    fn blog_request(topic: &str) -> BlogRequest {
        BlogRequest {
            topic: topic.to_string(),
            keywords: vec!["cdn".into(), "latency".into()],
            tone: None,
            length: BlogLength::Short,
            audience: Some("platform engineers".to_string()),
            tenant_id: None,
            preferences: None,
        }
    }

    #[test]
    fn test_blog_check_codes() {
        assert!(matches!(blog_request("  ").check(), Err(AppError::MissingField { field }) if field == "topic"));
        assert!(matches!(blog_request(&"x".repeat(501)).check(), Err(AppError::Validation { .. })));
        assert!(blog_request("Edge caching").check().is_ok());
    }

    #[test]
    fn test_blog_prompt_mentions_inputs() {
        let request = blog_request("Edge caching");
        let prompt = blog_prompt(&request);
        assert!(prompt.contains("Edge caching"));
        assert!(prompt.contains("about 400 words"));
        assert!(prompt.contains("cdn, latency"));
        assert!(prompt.contains("platform engineers"));
        assert!(prompt.contains("informative"));
    }
}
