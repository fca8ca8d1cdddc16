//! Platform administration handlers
//!
//! Every endpoint requires a platform admin user session.

use axum::extract::State;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use relayforge_common::{
    auth::{require_platform_admin, AuthContext},
    db::{
        models::{Tenant, UserProfile},
        ProfileChanges,
    },
    errors::{AppError, Result},
    providers::ProviderStatus,
    response::{ApiResponse, Page, PageParams},
    tenancy::Role,
};

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(max = 200))]
    pub full_name: Option<String>,
    pub is_platform_admin: Option<bool>,
    pub is_disabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProviderRequest {
    pub enabled: Option<bool>,
    /// Close the circuit and clear the failure count
    #[serde(default)]
    pub reset_circuit: bool,
}

#[derive(Serialize)]
pub struct UserMembership {
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub role: String,
}

#[derive(Serialize)]
pub struct UserDetail {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub memberships: Vec<UserMembership>,
}

/// Paginated user profiles
pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiQuery(params): ApiQuery<PageParams>,
) -> Result<ApiResponse<Page<UserProfile>>> {
    require_platform_admin(&auth)?;

    let (page, per_page) = params.normalized();
    let (items, total) = state.store.list_profiles(params.offset(), per_page).await?;

    Ok(ApiResponse::ok(Page { items, total, page, per_page }))
}

/// One user with their memberships
pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(user_id): ApiPath<Uuid>,
) -> Result<ApiResponse<UserDetail>> {
    require_platform_admin(&auth)?;

    let profile = state
        .store
        .find_profile(user_id)
        .await?
        .ok_or_else(|| AppError::UserNotFound { id: user_id.to_string() })?;

    let memberships = state
        .store
        .list_tenants_for_user(user_id)
        .await?
        .into_iter()
        .map(|(tenant, member)| UserMembership {
            tenant_id: tenant.id,
            tenant_name: tenant.name,
            role: member.role,
        })
        .collect();

    Ok(ApiResponse::ok(UserDetail { profile, memberships }))
}

/// Rename, promote, demote, disable or enable a user
pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(user_id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<UpdateUserRequest>,
) -> Result<ApiResponse<UserProfile>> {
    require_platform_admin(&auth)?;
    request.validate()?;

    if user_id == auth.user_id
        && (request.is_platform_admin == Some(false) || request.is_disabled == Some(true))
    {
        return Err(AppError::Forbidden {
            message: "Platform admins cannot demote or disable themselves".to_string(),
        });
    }

    let profile = state
        .store
        .update_profile(
            user_id,
            ProfileChanges {
                full_name: request.full_name.map(|n| Some(n.trim().to_string()).filter(|n| !n.is_empty())),
                is_platform_admin: request.is_platform_admin,
                is_disabled: request.is_disabled,
            },
        )
        .await?;

    tracing::info!(
        user_id = %user_id,
        admin_id = %auth.user_id,
        is_platform_admin = profile.is_platform_admin,
        is_disabled = profile.is_disabled,
        "User updated by platform admin"
    );

    Ok(ApiResponse::ok(profile))
}

/// Delete a user and their memberships
pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(user_id): ApiPath<Uuid>,
) -> Result<ApiResponse<serde_json::Value>> {
    require_platform_admin(&auth)?;

    if user_id == auth.user_id {
        return Err(AppError::Forbidden {
            message: "Platform admins cannot delete their own account".to_string(),
        });
    }

    // Refuse to orphan a tenant
    for (tenant, member) in state.store.list_tenants_for_user(user_id).await? {
        if member.role() != Role::Owner {
            continue;
        }
        let owners = state
            .store
            .list_members(tenant.id)
            .await?
            .iter()
            .filter(|m| m.role() == Role::Owner)
            .count();
        if owners <= 1 {
            tracing::warn!(user_id = %user_id, tenant_id = %tenant.id, "Refusing to delete sole owner");
            return Err(AppError::LastOwner);
        }
    }

    if !state.store.delete_profile(user_id).await? {
        return Err(AppError::UserNotFound { id: user_id.to_string() });
    }

    tracing::info!(user_id = %user_id, admin_id = %auth.user_id, "User deleted by platform admin");

    Ok(ApiResponse::ok(serde_json::json!({ "deleted": true, "id": user_id })))
}

/// Paginated tenants across the platform
pub async fn list_tenants(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiQuery(params): ApiQuery<PageParams>,
) -> Result<ApiResponse<Page<Tenant>>> {
    require_platform_admin(&auth)?;

    let (page, per_page) = params.normalized();
    let (items, total) = state.store.list_tenants(params.offset(), per_page).await?;

    Ok(ApiResponse::ok(Page { items, total, page, per_page }))
}

/// Registry view
pub async fn list_providers(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<ApiResponse<Vec<ProviderStatus>>> {
    require_platform_admin(&auth)?;
    Ok(ApiResponse::ok(state.router.registry().list().await))
}

pub async fn get_provider(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(name): ApiPath<String>,
) -> Result<ApiResponse<ProviderStatus>> {
    require_platform_admin(&auth)?;
    Ok(ApiResponse::ok(state.router.registry().status(&name).await?))
}

/// Enable or disable a provider, optionally resetting its circuit
pub async fn update_provider(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(name): ApiPath<String>,
    ApiJson(request): ApiJson<UpdateProviderRequest>,
) -> Result<ApiResponse<ProviderStatus>> {
    require_platform_admin(&auth)?;

    let registry = state.router.registry();
    let mut status = registry.status(&name).await?;

    if let Some(enabled) = request.enabled {
        status = registry.set_enabled(&name, enabled).await?;
    }
    if request.reset_circuit {
        status = registry.reset_circuit(&name).await?;
    }

    tracing::info!(
        provider = %name,
        enabled = status.enabled,
        admin_id = %auth.user_id,
        "Provider updated"
    );

    Ok(ApiResponse::ok(status))
}
