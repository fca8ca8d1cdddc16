//! Tenant API key handlers
//!
//! The raw key is returned once, from `create`. Only its SHA-256 hash and
//! display prefix are stored.

use axum::{extract::State, http::StatusCode};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::extract::{ApiJson, ApiPath};
use relayforge_common::{
    auth::{authorize_tenant, generate_api_key, hash_api_key, key_prefix, AuthContext},
    db::{models::ApiKey, ApiKeyChanges, NewApiKey, Store},
    errors::{AppError, Result},
    response::ApiResponse,
    tenancy::{ensure_grantable, normalize_permissions, permissions, within_limit},
};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateApiKeyRequest {
    #[validate(length(max = 100))]
    #[serde(default)]
    pub name: String,

    /// Defaults to `ai:route`
    pub permissions: Option<Vec<String>>,

    #[validate(range(min = 1, max = 3650))]
    pub expires_in_days: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateApiKeyRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub permissions: Option<Vec<String>>,
}

/// Creation response; `key` is never shown again
#[derive(Serialize)]
pub struct CreatedApiKey {
    #[serde(flatten)]
    pub api_key: ApiKey,
    pub key: String,
}

async fn load_key(store: &dyn Store, tenant_id: Uuid, key_id: Uuid) -> Result<ApiKey> {
    store
        .find_api_key(key_id)
        .await?
        .filter(|k| k.tenant_id == tenant_id)
        .ok_or_else(|| AppError::ApiKeyNotFound { id: key_id.to_string() })
}

/// List a tenant's keys
pub async fn list(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(tenant_id): ApiPath<Uuid>,
) -> Result<ApiResponse<Vec<ApiKey>>> {
    authorize_tenant(state.store.as_ref(), &auth, tenant_id, permissions::API_KEYS_READ).await?;

    let keys = state.store.list_api_keys(tenant_id).await?;
    Ok(ApiResponse::ok(keys))
}

/// Issue a key
pub async fn create(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(tenant_id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<CreateApiKeyRequest>,
) -> Result<(StatusCode, ApiResponse<CreatedApiKey>)> {
    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::MissingField { field: "name".to_string() });
    }
    request.validate()?;

    let store = state.store.as_ref();
    let access = authorize_tenant(store, &auth, tenant_id, permissions::API_KEYS_WRITE).await?;

    let granted = normalize_permissions(
        request
            .permissions
            .unwrap_or_else(|| vec![permissions::AI_ROUTE.to_string()]),
    )?;
    if granted.is_empty() {
        return Err(AppError::Validation {
            message: "an API key needs at least one permission".to_string(),
            field: Some("permissions".to_string()),
        });
    }
    ensure_grantable(&granted, &access.permissions)?;

    let active = store.count_active_api_keys(tenant_id).await?;
    if !within_limit(active, access.tenant.max_api_keys as i64) {
        return Err(AppError::PlanLimitReached {
            message: format!("plan allows {} active API keys", access.tenant.max_api_keys),
        });
    }

    let raw = generate_api_key(&state.config.auth.api_key_prefix);
    let api_key = store
        .create_api_key(NewApiKey {
            tenant_id,
            created_by: auth.user_id,
            name,
            key_prefix: key_prefix(&raw),
            key_hash: hash_api_key(&raw),
            permissions: granted,
            expires_at: request.expires_in_days.map(|days| Utc::now() + Duration::days(days)),
        })
        .await?;

    tracing::info!(
        tenant_id = %tenant_id,
        key_id = %api_key.id,
        prefix = %api_key.key_prefix,
        created_by = %auth.user_id,
        "API key issued"
    );

    Ok(ApiResponse::with_status(
        CreatedApiKey { api_key, key: raw },
        StatusCode::CREATED,
    ))
}

/// Get one key
pub async fn get(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath((tenant_id, key_id)): ApiPath<(Uuid, Uuid)>,
) -> Result<ApiResponse<ApiKey>> {
    authorize_tenant(state.store.as_ref(), &auth, tenant_id, permissions::API_KEYS_READ).await?;

    let key = load_key(state.store.as_ref(), tenant_id, key_id).await?;
    Ok(ApiResponse::ok(key))
}

/// Rename, toggle or re-scope a key
pub async fn update(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath((tenant_id, key_id)): ApiPath<(Uuid, Uuid)>,
    ApiJson(request): ApiJson<UpdateApiKeyRequest>,
) -> Result<ApiResponse<ApiKey>> {
    request.validate()?;

    let store = state.store.as_ref();
    let access = authorize_tenant(store, &auth, tenant_id, permissions::API_KEYS_WRITE).await?;
    let existing = load_key(store, tenant_id, key_id).await?;

    let permissions = match request.permissions {
        Some(perms) => {
            let perms = normalize_permissions(perms)?;
            ensure_grantable(&perms, &access.permissions)?;
            Some(perms)
        }
        None => None,
    };

    // Re-activating counts against the plan cap again
    if request.is_active == Some(true) && !existing.is_active {
        let active = store.count_active_api_keys(tenant_id).await?;
        if !within_limit(active, access.tenant.max_api_keys as i64) {
            return Err(AppError::PlanLimitReached {
                message: format!("plan allows {} active API keys", access.tenant.max_api_keys),
            });
        }
    }

    let key = store
        .update_api_key(
            key_id,
            ApiKeyChanges {
                name: request.name.map(|n| n.trim().to_string()),
                is_active: request.is_active,
                permissions,
            },
        )
        .await?;

    tracing::info!(tenant_id = %tenant_id, key_id = %key_id, "API key updated");

    Ok(ApiResponse::ok(key))
}

/// Revoke (delete) a key
pub async fn revoke(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath((tenant_id, key_id)): ApiPath<(Uuid, Uuid)>,
) -> Result<ApiResponse<serde_json::Value>> {
    let store = state.store.as_ref();
    authorize_tenant(store, &auth, tenant_id, permissions::API_KEYS_WRITE).await?;
    load_key(store, tenant_id, key_id).await?;

    store.delete_api_key(key_id).await?;

    tracing::info!(tenant_id = %tenant_id, key_id = %key_id, revoked_by = %auth.user_id, "API key revoked");

    Ok(ApiResponse::ok(serde_json::json!({ "revoked": true, "id": key_id })))
}

