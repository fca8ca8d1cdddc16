//! Hosted identity provider client
//!
//! Performs the four exchanges the service relies on: access-token
//! verification, authorization-code exchange (PKCE), refresh and sign-out.
//! Session cookies themselves are managed by the gateway.

use crate::config::IdentityConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// User facts extracted from a verified token or session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityUser {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
}

/// A session issued by the identity provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub user: IdentityUser,
}

/// Access-token claims
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: String,

    #[serde(default)]
    pub email: Option<String>,

    /// Audience
    pub aud: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    #[serde(default)]
    pub user_metadata: Option<serde_json::Value>,
}

impl AccessClaims {
    fn into_user(self) -> Result<IdentityUser> {
        let id = Uuid::parse_str(&self.sub).map_err(|_| AppError::Unauthorized {
            message: "Access token subject is not a user".to_string(),
        })?;

        Ok(IdentityUser {
            id,
            email: self.email.unwrap_or_default().to_lowercase(),
            full_name: full_name_of(self.user_metadata.as_ref()),
        })
    }
}

fn full_name_of(metadata: Option<&serde_json::Value>) -> Option<String> {
    metadata
        .and_then(|m| m.get("full_name").or_else(|| m.get("name")))
        .and_then(|v| v.as_str())
        .map(String::from)
}

/// Operations against the hosted identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify an access token and return its user
    async fn verify(&self, access_token: &str) -> Result<IdentityUser>;

    /// Exchange an authorization code (and PKCE verifier) for a session
    async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> Result<Session>;

    /// Trade a refresh token for a new session
    async fn refresh(&self, refresh_token: &str) -> Result<Session>;

    /// Revoke the session owning `access_token`
    async fn sign_out(&self, access_token: &str) -> Result<()>;
}

#[derive(Deserialize)]
struct RawUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Option<serde_json::Value>,
}

impl From<RawUser> for IdentityUser {
    fn from(raw: RawUser) -> Self {
        Self {
            id: raw.id,
            email: raw.email.unwrap_or_default().to_lowercase(),
            full_name: full_name_of(raw.user_metadata.as_ref()),
        }
    }
}

#[derive(Deserialize)]
struct RawSession {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: i64,
    user: RawUser,
}

/// Client for a GoTrue-style hosted auth service
pub struct HostedIdentityClient {
    client: Client,
    base_url: String,
    anon_key: String,
    audience: String,
    decoding_key: Option<DecodingKey>,
}

impl HostedIdentityClient {
    pub fn new(config: &IdentityConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to build identity HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            audience: config.jwt_audience.clone(),
            decoding_key: config
                .jwt_secret
                .as_deref()
                .map(|secret| DecodingKey::from_secret(secret.as_bytes())),
        })
    }

    fn verify_locally(&self, key: &DecodingKey, token: &str) -> Result<IdentityUser> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.audience.as_str()]);

        let claims = decode::<AccessClaims>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                _ => AppError::Unauthorized {
                    message: "Invalid access token".to_string(),
                },
            })?;

        claims.into_user()
    }

    async fn token_grant(&self, grant_type: &str, body: serde_json::Value, rejected: &str) -> Result<Session> {
        let url = format!("{}/auth/v1/token?grant_type={}", self.base_url, grant_type);

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::IdentityProvider {
                message: format!("Token request failed: {}", e),
            })?;

        let status = response.status();
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            debug!(grant_type, %status, detail = %detail, "Identity provider rejected grant");
            return Err(AppError::Unauthorized {
                message: rejected.to_string(),
            });
        }
        if !status.is_success() {
            return Err(AppError::IdentityProvider {
                message: format!("Token endpoint returned {}", status),
            });
        }

        let raw: RawSession = response.json().await.map_err(|e| AppError::IdentityProvider {
            message: format!("Malformed session response: {}", e),
        })?;

        Ok(Session {
            access_token: raw.access_token,
            refresh_token: raw.refresh_token,
            expires_in: raw.expires_in,
            user: raw.user.into(),
        })
    }
}

#[async_trait]
impl IdentityProvider for HostedIdentityClient {
    #[instrument(skip_all)]
    async fn verify(&self, access_token: &str) -> Result<IdentityUser> {
        if let Some(ref key) = self.decoding_key {
            return self.verify_locally(key, access_token);
        }

        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::IdentityProvider {
                message: format!("User lookup failed: {}", e),
            })?;

        match response.status() {
            status if status.is_success() => {
                let raw: RawUser = response.json().await.map_err(|e| AppError::IdentityProvider {
                    message: format!("Malformed user response: {}", e),
                })?;
                Ok(raw.into())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AppError::Unauthorized {
                message: "Invalid access token".to_string(),
            }),
            status => Err(AppError::IdentityProvider {
                message: format!("User endpoint returned {}", status),
            }),
        }
    }

    #[instrument(skip_all)]
    async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> Result<Session> {
        let body = serde_json::json!({
            "auth_code": code,
            "code_verifier": code_verifier.unwrap_or_default(),
        });
        self.token_grant("pkce", body, "Invalid or expired authorization code").await
    }

    #[instrument(skip_all)]
    async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        let body = serde_json::json!({ "refresh_token": refresh_token });
        self.token_grant("refresh_token", body, "Invalid refresh token").await
    }

    #[instrument(skip_all)]
    async fn sign_out(&self, access_token: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/auth/v1/logout", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::IdentityProvider {
                message: format!("Sign-out request failed: {}", e),
            })?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Identity provider refused sign-out");
            return Err(AppError::IdentityProvider {
                message: format!("Logout endpoint returned {}", response.status()),
            });
        }

        Ok(())
    }
}

/// Sign an HS256 access token the way the identity provider does
pub fn issue_access_token(
    secret: &str,
    audience: &str,
    user_id: Uuid,
    email: &str,
    ttl_secs: i64,
) -> Result<String> {
    let now = Utc::now();
    let claims = AccessClaims {
        sub: user_id.to_string(),
        email: Some(email.to_string()),
        aud: audience.to_string(),
        exp: (now + Duration::seconds(ttl_secs)).timestamp(),
        iat: now.timestamp(),
        user_metadata: None,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal {
        message: format!("Failed to sign token: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str, secret: Option<&str>) -> IdentityConfig {
        IdentityConfig {
            url: url.to_string(),
            anon_key: "anon".to_string(),
            jwt_secret: secret.map(String::from),
            jwt_audience: "authenticated".to_string(),
            timeout_secs: 5,
        }
    }

    fn session_body(user_id: Uuid) -> serde_json::Value {
        serde_json::json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "token_type": "bearer",
            "expires_in": 3600,
            "user": {
                "id": user_id,
                "email": "Dev@Example.com",
                "user_metadata": { "full_name": "Dev Example" }
            }
        })
    }

    #[test]
    fn test_local_verification_roundtrip() {
        let client = HostedIdentityClient::new(&config("http://unused", Some("secret"))).unwrap();
        let user_id = Uuid::new_v4();
        let token = issue_access_token("secret", "authenticated", user_id, "a@b.io", 60).unwrap();

        let key = client.decoding_key.as_ref().unwrap();
        let user = client.verify_locally(key, &token).unwrap();
        assert_eq!(user.id, user_id);
        assert_eq!(user.email, "a@b.io");
    }

    #[tokio::test]
    async fn test_local_verification_rejects_wrong_secret_and_audience() {
        let client = HostedIdentityClient::new(&config("http://unused", Some("secret"))).unwrap();
        let user_id = Uuid::new_v4();

        let forged = issue_access_token("other", "authenticated", user_id, "a@b.io", 60).unwrap();
        assert!(matches!(client.verify(&forged).await, Err(AppError::Unauthorized { .. })));

        let wrong_aud = issue_access_token("secret", "service", user_id, "a@b.io", 60).unwrap();
        assert!(client.verify(&wrong_aud).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_token() {
        let client = HostedIdentityClient::new(&config("http://unused", Some("secret"))).unwrap();
        let token = issue_access_token("secret", "authenticated", Uuid::new_v4(), "a@b.io", -600).unwrap();

        assert!(matches!(client.verify(&token).await, Err(AppError::ExpiredToken)));
    }

    #[tokio::test]
    async fn test_remote_verification() {
        let server = MockServer::start().await;
        let user_id = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("authorization", "Bearer good"))
            .and(header("apikey", "anon"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": user_id,
                "email": "User@Example.com"
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("authorization", "Bearer bad"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = HostedIdentityClient::new(&config(&server.uri(), None)).unwrap();

        let user = client.verify("good").await.unwrap();
        assert_eq!(user.id, user_id);
        assert_eq!(user.email, "user@example.com");

        assert!(matches!(client.verify("bad").await, Err(AppError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let server = MockServer::start().await;
        let user_id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "pkce"))
            .and(body_json(serde_json::json!({ "auth_code": "abc", "code_verifier": "v" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_body(user_id)))
            .expect(1)
            .mount(&server)
            .await;

        let client = HostedIdentityClient::new(&config(&server.uri(), None)).unwrap();
        let session = client.exchange_code("abc", Some("v")).await.unwrap();

        assert_eq!(session.access_token, "at-1");
        assert_eq!(session.refresh_token, "rt-1");
        assert_eq!(session.user.id, user_id);
        assert_eq!(session.user.full_name.as_deref(), Some("Dev Example"));
    }

    #[tokio::test]
    async fn test_refresh_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;

        let client = HostedIdentityClient::new(&config(&server.uri(), None)).unwrap();
        let err = client.refresh("stale").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn test_upstream_failure_is_bad_gateway() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = HostedIdentityClient::new(&config(&server.uri(), None)).unwrap();
        let err = client.sign_out("at-1").await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
    }
}
