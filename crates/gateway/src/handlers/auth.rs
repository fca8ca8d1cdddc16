//! Session glue around the hosted identity provider
//!
//! Exchanges codes and refresh tokens for sessions and mirrors the session
//! into HttpOnly cookies.

use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use cookie::{time::Duration, Cookie, SameSite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::extract::ApiQuery;
use relayforge_common::{
    auth::{extract_bearer, AuthContext, IdentityUser, Session},
    config::AuthConfig,
    db::{models::UserProfile, ProfileSeed},
    errors::{AppError, Result},
    response::ApiResponse,
};

/// Refresh cookies outlive access tokens; the provider enforces the real expiry
const REFRESH_COOKIE_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub next: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Serialize)]
pub struct SessionView {
    pub user: IdentityUser,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
        Self {
            user: session.user,
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            expires_in: session.expires_in,
        }
    }
}

#[derive(Serialize)]
pub struct MembershipView {
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub tenant_slug: String,
    pub role: String,
    pub permissions: Vec<String>,
}

#[derive(Serialize)]
pub struct MeResponse {
    pub profile: UserProfile,
    pub memberships: Vec<MembershipView>,
}

fn session_cookie(config: &AuthConfig, name: String, value: String, max_age: Duration) -> Cookie<'static> {
    let mut cookie = Cookie::build((name, value))
        .http_only(true)
        .secure(config.cookie_secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(max_age)
        .build();

    if let Some(ref domain) = config.cookie_domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}

fn removal_cookie(config: &AuthConfig, name: String) -> Cookie<'static> {
    let mut cookie = Cookie::build((name, "")).path("/").build();
    if let Some(ref domain) = config.cookie_domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}

/// Mirror a session into the access and refresh cookies
fn set_session_cookies(jar: CookieJar, config: &AuthConfig, session: &Session) -> CookieJar {
    let access_ttl = Duration::seconds(session.expires_in.max(60));

    jar.add(session_cookie(
        config,
        config.access_cookie(),
        session.access_token.clone(),
        access_ttl,
    ))
    .add(session_cookie(
        config,
        config.refresh_cookie(),
        session.refresh_token.clone(),
        Duration::days(REFRESH_COOKIE_DAYS),
    ))
}

fn clear_session_cookies(jar: CookieJar, config: &AuthConfig) -> CookieJar {
    jar.remove(removal_cookie(config, config.access_cookie()))
        .remove(removal_cookie(config, config.refresh_cookie()))
        .remove(removal_cookie(config, config.code_verifier_cookie()))
}

/// Only same-site relative paths are valid redirect targets
pub fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.contains('\\')
                && !path.contains("://") =>
        {
            path
        }
        _ => "/",
    }
}

async fn record_sign_in(state: &AppState, user: &IdentityUser) -> Result<UserProfile> {
    state
        .store
        .upsert_profile(ProfileSeed {
            id: user.id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            is_platform_admin: state.config.auth.is_bootstrap_admin(&user.email),
        })
        .await
}

/// Exchange an authorization code for a session and redirect into the app
pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiQuery(params): ApiQuery<CallbackParams>,
) -> Result<(CookieJar, Redirect)> {
    if let Some(error) = params.error {
        return Err(AppError::Unauthorized {
            message: params.error_description.unwrap_or(error),
        });
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::MissingField { field: "code".to_string() })?;

    let config = &state.config.auth;
    let verifier = jar
        .get(&config.code_verifier_cookie())
        .map(|c| c.value().to_string());

    let session = state
        .auth
        .identity
        .exchange_code(&code, verifier.as_deref())
        .await?;

    let profile = record_sign_in(&state, &session.user).await?;
    if profile.is_disabled {
        return Err(AppError::Forbidden {
            message: "Account is disabled".to_string(),
        });
    }

    tracing::info!(user_id = %profile.id, "Session established");

    let jar = set_session_cookies(jar, config, &session)
        .remove(removal_cookie(config, config.code_verifier_cookie()));

    Ok((jar, Redirect::to(safe_next(params.next.as_deref()))))
}

/// Trade the refresh token (cookie or body) for a new session
pub async fn refresh(State(state): State<AppState>, jar: CookieJar, body: Bytes) -> Response {
    let config = &state.config.auth;

    let from_body = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<RefreshRequest>(&body) {
            Ok(request) => request.refresh_token,
            Err(e) => {
                return AppError::Validation {
                    message: e.to_string(),
                    field: None,
                }
                .into_response()
            }
        }
    };

    let Some(refresh_token) = from_body
        .or_else(|| jar.get(&config.refresh_cookie()).map(|c| c.value().to_string()))
        .filter(|t| !t.is_empty())
    else {
        return AppError::Unauthorized {
            message: "No refresh token".to_string(),
        }
        .into_response();
    };

    match state.auth.identity.refresh(&refresh_token).await {
        Ok(session) => {
            let jar = set_session_cookies(jar, config, &session);
            (jar, ApiResponse::ok(SessionView::from(session))).into_response()
        }
        // A rejected refresh token is dead; drop the cookies with it
        Err(e @ AppError::Unauthorized { .. }) => {
            (clear_session_cookies(jar, config), e).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Revoke the session at the provider and clear cookies
pub async fn signout(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> (CookieJar, ApiResponse<serde_json::Value>) {
    let config = &state.config.auth;

    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer)
        .filter(|t| !t.starts_with(&config.api_key_prefix))
        .map(String::from)
        .or_else(|| jar.get(&config.access_cookie()).map(|c| c.value().to_string()));

    let mut revoked = false;
    if let Some(token) = token {
        match state.auth.identity.sign_out(&token).await {
            Ok(()) => revoked = true,
            Err(e) => tracing::warn!(error = %e, "Sign-out at identity provider failed"),
        }
    }

    (
        clear_session_cookies(jar, config),
        ApiResponse::ok(serde_json::json!({ "signed_out": true, "revoked": revoked })),
    )
}

/// Current profile and tenant memberships
pub async fn me(State(state): State<AppState>, auth: AuthContext) -> Result<ApiResponse<MeResponse>> {
    auth.require_user()?;

    let profile = state
        .store
        .find_profile(auth.user_id)
        .await?
        .ok_or_else(|| AppError::UserNotFound { id: auth.user_id.to_string() })?;

    let memberships = state
        .store
        .list_tenants_for_user(auth.user_id)
        .await?
        .into_iter()
        .map(|(tenant, member)| MembershipView {
            tenant_id: tenant.id,
            tenant_name: tenant.name,
            tenant_slug: tenant.slug,
            permissions: member.permission_list(),
            role: member.role,
        })
        .collect();

    Ok(ApiResponse::ok(MeResponse { profile, memberships }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_next() {
        assert_eq!(safe_next(Some("/dashboard?tab=keys")), "/dashboard?tab=keys");
        assert_eq!(safe_next(Some("https://evil.example")), "/");
        assert_eq!(safe_next(Some("//evil.example")), "/");
        assert_eq!(safe_next(Some("/\\evil.example")), "/");
        assert_eq!(safe_next(Some("dashboard")), "/");
        assert_eq!(safe_next(None), "/");
    }

    #[test]
    fn test_session_cookie_attributes() {
        let config = AuthConfig {
            cookie_domain: Some("example.com".to_string()),
            ..AuthConfig::default()
        };
        let cookie = session_cookie(&config, "rf-access-token".into(), "tok".into(), Duration::seconds(60));

        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.domain(), Some("example.com"));
    }
}
