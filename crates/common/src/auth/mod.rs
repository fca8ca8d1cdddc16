//! Authentication and authorization utilities
//!
//! Provides:
//! - Identity provider client (token verification, session exchange)
//! - API key generation and hashing
//! - The [`AuthContext`] request extractor
//! - Tenant access checks

pub mod access;
pub mod identity;

pub use access::{authorize_tenant, require_platform_admin, TenantAccess};
pub use identity::{issue_access_token, HostedIdentityClient, IdentityProvider, IdentityUser, Session};

use crate::config::AuthConfig;
use crate::db::{models::ApiKey, ProfileSeed, Store};
use crate::errors::{AppError, Result};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Number of leading characters of a raw key kept for display
pub const KEY_PREFIX_LEN: usize = 12;

/// How the caller authenticated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethod {
    /// Access token in the Authorization header
    Bearer,
    /// Access token in the session cookie
    Cookie,
    /// Tenant API key
    ApiKey { key_id: Uuid, tenant_id: Uuid },
}

/// Extracted authentication context available to handlers
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Profile ID; the issuing user for API keys
    pub user_id: Uuid,

    pub email: String,

    pub is_platform_admin: bool,

    pub method: AuthMethod,

    /// Permissions carried by an API key; empty for user sessions
    pub scopes: Vec<String>,

    /// Request ID for tracing
    pub request_id: String,

    /// Raw access token for user sessions
    pub access_token: Option<String>,
}

impl AuthContext {
    /// Tenant an API key is bound to
    pub fn api_key_tenant(&self) -> Option<Uuid> {
        match self.method {
            AuthMethod::ApiKey { tenant_id, .. } => Some(tenant_id),
            _ => None,
        }
    }

    pub fn is_api_key(&self) -> bool {
        matches!(self.method, AuthMethod::ApiKey { .. })
    }

    /// Require a user session, rejecting API keys
    pub fn require_user(&self) -> Result<()> {
        if self.is_api_key() {
            Err(AppError::Forbidden {
                message: "This endpoint requires a user session".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Everything the [`AuthContext`] extractor needs from application state
#[derive(Clone)]
pub struct AuthState {
    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn Store>,
    pub config: Arc<AuthConfig>,
}

/// Hash an API key for storage
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Validate an API key against a stored hash
pub fn validate_api_key(api_key: &str, stored_hash: &str) -> bool {
    hash_api_key(api_key) == stored_hash
}

/// Generate a new API key carrying `prefix`
pub fn generate_api_key(prefix: &str) -> String {
    let random_bytes: [u8; 24] = rand::random();
    format!("{}{}", prefix, hex::encode(random_bytes))
}

/// Display prefix of a raw key
pub fn key_prefix(api_key: &str) -> String {
    api_key.chars().take(KEY_PREFIX_LEN).collect()
}

/// Extract the token from a `Bearer` Authorization header
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Request ID from the configured header, or a fresh one
pub fn request_id(headers: &HeaderMap, config: &AuthConfig) -> String {
    headers
        .get(config.request_id_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Credential found on the request
enum Credential {
    ApiKey(String),
    Token { token: String, method: AuthMethod },
}

fn find_credential(headers: &HeaderMap, config: &AuthConfig) -> Option<Credential> {
    if let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer)
    {
        return Some(if token.starts_with(&config.api_key_prefix) {
            Credential::ApiKey(token.to_string())
        } else {
            Credential::Token {
                token: token.to_string(),
                method: AuthMethod::Bearer,
            }
        });
    }

    CookieJar::from_headers(headers)
        .get(&config.access_cookie())
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
        .map(|token| Credential::Token {
            token,
            method: AuthMethod::Cookie,
        })
}

impl AuthState {
    /// Resolve the caller from request headers
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext> {
        let request_id = request_id(headers, &self.config);

        match find_credential(headers, &self.config) {
            Some(Credential::ApiKey(raw)) => self.authenticate_api_key(&raw, request_id).await,
            Some(Credential::Token { token, method }) => {
                self.authenticate_token(token, method, request_id).await
            }
            None => Err(AppError::Unauthorized {
                message: "Authentication required".to_string(),
            }),
        }
    }

    async fn authenticate_api_key(&self, raw: &str, request_id: String) -> Result<AuthContext> {
        let key = self
            .store
            .find_api_key_by_hash(&hash_api_key(raw))
            .await?
            .ok_or(AppError::InvalidApiKey)?;

        if !key.is_active {
            return Err(AppError::InvalidApiKey);
        }
        if key.is_expired() {
            return Err(AppError::ExpiredToken);
        }

        let scopes = self.issuer_scopes(&key).await?;

        if let Err(e) = self.store.touch_api_key(key.id).await {
            warn!(key_id = %key.id, error = %e, "Failed to record API key use");
        }

        debug!(key_id = %key.id, tenant_id = %key.tenant_id, "Authenticated API key");

        Ok(AuthContext {
            user_id: key.created_by,
            email: String::new(),
            is_platform_admin: false,
            scopes,
            method: AuthMethod::ApiKey {
                key_id: key.id,
                tenant_id: key.tenant_id,
            },
            request_id,
            access_token: None,
        })
    }

    /// Key scopes the issuer can still grant
    ///
    /// A key stops working once its issuer can no longer act in the key's
    /// tenant. Demoting the issuer narrows the key.
    async fn issuer_scopes(&self, key: &ApiKey) -> Result<Vec<String>> {
        let issuer = self
            .store
            .find_profile(key.created_by)
            .await?
            .filter(|p| !p.is_disabled);

        let Some(issuer) = issuer else {
            warn!(key_id = %key.id, issuer = %key.created_by, "API key issuer is gone or disabled");
            return Err(AppError::InvalidApiKey);
        };

        if issuer.is_platform_admin {
            return Ok(key.permission_list());
        }

        let Some(membership) = self.store.find_membership(key.tenant_id, issuer.id).await? else {
            warn!(key_id = %key.id, issuer = %issuer.id, "API key issuer left the tenant");
            return Err(AppError::InvalidApiKey);
        };

        Ok(key
            .permission_list()
            .into_iter()
            .filter(|p| membership.has_permission(p))
            .collect())
    }

    async fn authenticate_token(
        &self,
        token: String,
        method: AuthMethod,
        request_id: String,
    ) -> Result<AuthContext> {
        let user = self.identity.verify(&token).await?;

        let profile = self
            .store
            .upsert_profile(ProfileSeed {
                id: user.id,
                is_platform_admin: self.config.is_bootstrap_admin(&user.email),
                email: user.email,
                full_name: user.full_name,
            })
            .await?;

        if profile.is_disabled {
            return Err(AppError::Forbidden {
                message: "Account is disabled".to_string(),
            });
        }

        Ok(AuthContext {
            user_id: profile.id,
            email: profile.email,
            is_platform_admin: profile.is_platform_admin,
            method,
            scopes: Vec::new(),
            request_id,
            access_token: Some(token),
        })
    }
}

/// Axum extractor for AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    AuthState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        if let Some(ctx) = parts.extensions.get::<AuthContext>() {
            return Ok(ctx.clone());
        }

        let auth = AuthState::from_ref(state);
        let ctx = auth.authenticate(&parts.headers).await?;
        parts.extensions.insert(ctx.clone());
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::db::{MemoryStore, NewApiKey, NewTenant, ProfileChanges};
    use crate::tenancy::{Plan, Role};
    use axum::http::HeaderValue;

    fn state(store: Arc<MemoryStore>) -> AuthState {
        let identity = HostedIdentityClient::new(&IdentityConfig {
            url: "http://unused".to_string(),
            anon_key: String::new(),
            jwt_secret: Some("secret".to_string()),
            jwt_audience: "authenticated".to_string(),
            timeout_secs: 1,
        })
        .unwrap();

        AuthState {
            identity: Arc::new(identity),
            store,
            config: Arc::new(AuthConfig {
                bootstrap_admins: vec!["root@example.com".to_string()],
                ..AuthConfig::default()
            }),
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", token)).unwrap());
        headers
    }

    /// Tenant with a profiled owner
    async fn seed_tenant(store: &MemoryStore) -> (Uuid, Uuid) {
        let owner = Uuid::new_v4();
        store
            .upsert_profile(ProfileSeed {
                id: owner,
                email: "owner@example.com".to_string(),
                full_name: None,
                is_platform_admin: false,
            })
            .await
            .unwrap();
        let (tenant, _) = store
            .create_tenant(
                owner,
                NewTenant {
                    name: "Acme".to_string(),
                    slug: "acme".to_string(),
                    plan: Plan::Free,
                    settings: serde_json::json!({}),
                },
            )
            .await
            .unwrap();
        (tenant.id, owner)
    }

    async fn issue_key(store: &MemoryStore, tenant_id: Uuid, issuer: Uuid, permissions: &[&str]) -> String {
        let raw = generate_api_key("rfk_");
        store
            .create_api_key(NewApiKey {
                tenant_id,
                created_by: issuer,
                name: "ci".to_string(),
                key_prefix: key_prefix(&raw),
                key_hash: hash_api_key(&raw),
                permissions: permissions.iter().map(|p| p.to_string()).collect(),
                expires_at: None,
            })
            .await
            .unwrap();
        raw
    }

    #[test]
    fn test_hash_api_key() {
        let key = "rfk_test_12345";
        let hash = hash_api_key(key);
        assert!(validate_api_key(key, &hash));
        assert!(!validate_api_key("wrong_key", &hash));
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn test_generate_api_key() {
        let key = generate_api_key("rfk_");
        assert!(key.starts_with("rfk_"));
        assert_eq!(key.len(), 4 + 48);
        assert_ne!(key, generate_api_key("rfk_"));
        assert_eq!(key_prefix(&key).len(), KEY_PREFIX_LEN);
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer rfk_123"), Some("rfk_123"));
        assert_eq!(extract_bearer("rfk_123"), None);
        assert_eq!(extract_bearer("Basic abc"), None);
        assert_eq!(extract_bearer("Bearer "), None);
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let auth = state(Arc::new(MemoryStore::new()));
        let err = auth.authenticate(&HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn test_bearer_creates_profile_and_promotes_bootstrap_admin() {
        let store = Arc::new(MemoryStore::new());
        let auth = state(store.clone());
        let user_id = Uuid::new_v4();
        let token = issue_access_token("secret", "authenticated", user_id, "root@example.com", 60).unwrap();

        let ctx = auth.authenticate(&bearer(&token)).await.unwrap();
        assert_eq!(ctx.user_id, user_id);
        assert!(ctx.is_platform_admin);
        assert_eq!(ctx.method, AuthMethod::Bearer);
        assert!(store.find_profile(user_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cookie_session() {
        let auth = state(Arc::new(MemoryStore::new()));
        let token = issue_access_token("secret", "authenticated", Uuid::new_v4(), "dev@example.com", 60).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_str(&format!("rf-access-token={}", token)).unwrap(),
        );

        let ctx = auth.authenticate(&headers).await.unwrap();
        assert_eq!(ctx.method, AuthMethod::Cookie);
        assert!(!ctx.is_platform_admin);
    }

    #[tokio::test]
    async fn test_disabled_profile_forbidden() {
        let store = Arc::new(MemoryStore::new());
        let auth = state(store.clone());
        let user_id = Uuid::new_v4();
        let token = issue_access_token("secret", "authenticated", user_id, "dev@example.com", 60).unwrap();

        auth.authenticate(&bearer(&token)).await.unwrap();
        store
            .update_profile(user_id, crate::db::ProfileChanges { is_disabled: Some(true), ..Default::default() })
            .await
            .unwrap();

        let err = auth.authenticate(&bearer(&token)).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_api_key_authentication() {
        let store = Arc::new(MemoryStore::new());
        let auth = state(store.clone());
        let raw = generate_api_key("rfk_");
        let (tenant_id, issuer) = seed_tenant(&store).await;

        let key = store
            .create_api_key(NewApiKey {
                tenant_id,
                created_by: issuer,
                name: "ci".to_string(),
                key_prefix: key_prefix(&raw),
                key_hash: hash_api_key(&raw),
                permissions: vec!["ai:route".to_string()],
                expires_at: None,
            })
            .await
            .unwrap();

        let ctx = auth.authenticate(&bearer(&raw)).await.unwrap();
        assert_eq!(ctx.api_key_tenant(), Some(tenant_id));
        assert_eq!(ctx.scopes, vec!["ai:route".to_string()]);
        assert!(ctx.require_user().is_err());

        let touched = store.find_api_key(key.id).await.unwrap().unwrap();
        assert!(touched.last_used_at.is_some());

        let unknown = auth.authenticate(&bearer("rfk_nope")).await.unwrap_err();
        assert!(matches!(unknown, AppError::InvalidApiKey));
    }

    #[tokio::test]
    async fn test_api_key_dies_with_issuer_membership() {
        let store = Arc::new(MemoryStore::new());
        let auth = state(store.clone());
        let (tenant_id, owner) = seed_tenant(&store).await;
        let raw = issue_key(&store, tenant_id, owner, &["ai:route"]).await;

        assert!(auth.authenticate(&bearer(&raw)).await.is_ok());

        store.remove_member(tenant_id, owner).await.unwrap();
        let err = auth.authenticate(&bearer(&raw)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidApiKey));
    }

    #[tokio::test]
    async fn test_api_key_dies_with_disabled_issuer() {
        let store = Arc::new(MemoryStore::new());
        let auth = state(store.clone());
        let (tenant_id, owner) = seed_tenant(&store).await;
        let raw = issue_key(&store, tenant_id, owner, &["ai:route"]).await;

        store
            .update_profile(owner, ProfileChanges { is_disabled: Some(true), ..Default::default() })
            .await
            .unwrap();

        let err = auth.authenticate(&bearer(&raw)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidApiKey));
    }

    #[tokio::test]
    async fn test_api_key_narrowed_by_issuer_demotion() {
        let store = Arc::new(MemoryStore::new());
        let auth = state(store.clone());
        let (tenant_id, owner) = seed_tenant(&store).await;
        let raw = issue_key(&store, tenant_id, owner, &["ai:route", "members:write"]).await;

        store
            .update_member(tenant_id, owner, Role::Member, Role::Member.default_permissions())
            .await
            .unwrap();

        let ctx = auth.authenticate(&bearer(&raw)).await.unwrap();
        assert_eq!(ctx.scopes, vec!["ai:route".to_string()]);
    }
}
