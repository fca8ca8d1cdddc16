//! Tenant management handlers

use axum::{extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::extract::{ApiJson, ApiPath};
use relayforge_common::{
    auth::{authorize_tenant, AuthContext},
    db::{models::Tenant, NewTenant, TenantChanges},
    errors::{AppError, Result},
    response::ApiResponse,
    tenancy::{permissions, slugify, validate_slug, Plan, SubscriptionStatus},
};

/// Request to create a tenant
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTenantRequest {
    #[validate(length(max = 100))]
    #[serde(default)]
    pub name: String,

    /// Derived from `name` when omitted
    pub slug: Option<String>,

    pub plan: Option<Plan>,

    pub settings: Option<serde_json::Value>,
}

/// Partial tenant update
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTenantRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,

    pub slug: Option<String>,

    pub settings: Option<serde_json::Value>,

    /// Platform admin only
    pub plan: Option<Plan>,

    /// Platform admin only
    pub subscription_status: Option<SubscriptionStatus>,

    /// Platform admin only
    pub is_active: Option<bool>,
}

/// Tenant as seen by the caller
#[derive(Serialize)]
pub struct TenantView {
    #[serde(flatten)]
    pub tenant: Tenant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub permissions: Vec<String>,
}

/// List the caller's tenants
pub async fn list(State(state): State<AppState>, auth: AuthContext) -> Result<ApiResponse<Vec<TenantView>>> {
    auth.require_user()?;

    let tenants = state
        .store
        .list_tenants_for_user(auth.user_id)
        .await?
        .into_iter()
        .map(|(tenant, member)| TenantView {
            tenant,
            permissions: member.permission_list(),
            role: Some(member.role),
        })
        .collect();

    Ok(ApiResponse::ok(tenants))
}

/// Create a tenant; the caller becomes its owner
pub async fn create(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiJson(request): ApiJson<CreateTenantRequest>,
) -> Result<(StatusCode, ApiResponse<TenantView>)> {
    auth.require_user()?;

    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::MissingField { field: "name".to_string() });
    }
    request.validate()?;

    let slug = request.slug.unwrap_or_else(|| slugify(&name));
    validate_slug(&slug)?;

    let plan = request.plan.unwrap_or(Plan::Free);
    if plan != Plan::Free && !auth.is_platform_admin {
        return Err(AppError::Forbidden {
            message: "Only platform admins can assign a paid plan".to_string(),
        });
    }

    let (tenant, owner) = state
        .store
        .create_tenant(
            auth.user_id,
            NewTenant {
                name,
                slug,
                plan,
                settings: request.settings.unwrap_or_else(|| serde_json::json!({})),
            },
        )
        .await?;

    tracing::info!(
        tenant_id = %tenant.id,
        slug = %tenant.slug,
        owner_id = %auth.user_id,
        "Tenant created"
    );

    Ok(ApiResponse::with_status(
        TenantView {
            tenant,
            permissions: owner.permission_list(),
            role: Some(owner.role),
        },
        StatusCode::CREATED,
    ))
}

/// Get a tenant
pub async fn get(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(tenant_id): ApiPath<Uuid>,
) -> Result<ApiResponse<TenantView>> {
    let access = authorize_tenant(state.store.as_ref(), &auth, tenant_id, permissions::TENANT_READ).await?;

    Ok(ApiResponse::ok(TenantView {
        role: access.membership.map(|m| m.role),
        tenant: access.tenant,
        permissions: access.permissions,
    }))
}

/// Update a tenant
pub async fn update(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(tenant_id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<UpdateTenantRequest>,
) -> Result<ApiResponse<TenantView>> {
    request.validate()?;

    let access = authorize_tenant(state.store.as_ref(), &auth, tenant_id, permissions::TENANT_WRITE).await?;

    let billing_change = request.plan.is_some()
        || request.subscription_status.is_some()
        || request.is_active.is_some();
    if billing_change && (!auth.is_platform_admin || auth.is_api_key()) {
        return Err(AppError::Forbidden {
            message: "Plan, subscription and activation are managed by platform admins".to_string(),
        });
    }

    if let Some(ref slug) = request.slug {
        validate_slug(slug)?;
    }

    let changes = TenantChanges {
        name: request.name.map(|n| n.trim().to_string()),
        slug: request.slug,
        plan: request.plan,
        subscription_status: request.subscription_status,
        is_active: request.is_active,
        settings: request.settings,
    };

    let tenant = state.store.update_tenant(tenant_id, changes).await?;

    tracing::info!(tenant_id = %tenant_id, user_id = %auth.user_id, "Tenant updated");

    Ok(ApiResponse::ok(TenantView {
        tenant,
        role: access.membership.map(|m| m.role),
        permissions: access.permissions,
    }))
}

/// Delete a tenant with its members, keys and usage
pub async fn delete(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(tenant_id): ApiPath<Uuid>,
) -> Result<ApiResponse<serde_json::Value>> {
    auth.require_user()?;
    authorize_tenant(state.store.as_ref(), &auth, tenant_id, permissions::TENANT_DELETE).await?;

    if !state.store.delete_tenant(tenant_id).await? {
        return Err(AppError::TenantNotFound { id: tenant_id.to_string() });
    }

    tracing::info!(tenant_id = %tenant_id, user_id = %auth.user_id, "Tenant deleted");

    Ok(ApiResponse::ok(serde_json::json!({ "deleted": true, "id": tenant_id })))
}
