//! Session and cookie diagnostics
//!
//! Mounted only when `server.debug_endpoints` is set. Cookie values are
//! never echoed back.

use axum::extract::State;
use axum_extra::extract::CookieJar;
use serde::Serialize;
use uuid::Uuid;

use crate::app::AppState;
use relayforge_common::{
    auth::{AuthContext, AuthMethod},
    errors::Result,
    response::ApiResponse,
};

#[derive(Serialize)]
pub struct SessionInfo {
    pub user_id: Uuid,
    pub email: String,
    pub is_platform_admin: bool,
    pub method: AuthMethod,
    pub scopes: Vec<String>,
    pub request_id: String,
    pub has_access_token: bool,
}

#[derive(Serialize)]
pub struct CookieInfo {
    pub name: String,
    pub length: usize,
    pub redacted: String,
}

#[derive(Serialize)]
pub struct CookieReport {
    pub cookies: Vec<CookieInfo>,
    pub has_access_cookie: bool,
    pub has_refresh_cookie: bool,
    pub has_code_verifier: bool,
}

/// Keep at most the first four characters
pub fn redact(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    if value.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}

pub async fn session(auth: AuthContext) -> ApiResponse<SessionInfo> {
    ApiResponse::ok(SessionInfo {
        user_id: auth.user_id,
        email: auth.email,
        is_platform_admin: auth.is_platform_admin,
        method: auth.method,
        scopes: auth.scopes,
        request_id: auth.request_id,
        has_access_token: auth.access_token.is_some(),
    })
}

pub async fn cookies(
    State(state): State<AppState>,
    auth: AuthContext,
    jar: CookieJar,
) -> Result<ApiResponse<CookieReport>> {
    auth.require_user()?;
    let config = &state.config.auth;

    let mut cookies: Vec<CookieInfo> = jar
        .iter()
        .map(|c| CookieInfo {
            name: c.name().to_string(),
            length: c.value().len(),
            redacted: redact(c.value()),
        })
        .collect();
    cookies.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(ApiResponse::ok(CookieReport {
        has_access_cookie: jar.get(&config.access_cookie()).is_some(),
        has_refresh_cookie: jar.get(&config.refresh_cookie()).is_some(),
        has_code_verifier: jar.get(&config.code_verifier_cookie()).is_some(),
        cookies,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact() {
        assert_eq!(redact("eyJhbGciOiJIUzI1NiJ9"), "eyJh****");
        assert_eq!(redact("abc"), "****");
        assert_eq!(redact(""), "****");
    }
}
