//! Tenant membership handlers
//!
//! Only owners grant or revoke the owner role, and a tenant always keeps at
//! least one owner. Callers never hand out permissions they lack.

use axum::{extract::State, http::StatusCode};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::extract::{ApiJson, ApiPath};
use relayforge_common::{
    auth::{authorize_tenant, AuthContext, TenantAccess},
    db::{models::TenantUser, Store},
    errors::{AppError, Result},
    response::ApiResponse,
    tenancy::{ensure_grantable, normalize_permissions, permissions, within_limit, Role},
};

#[derive(Debug, Deserialize, Validate)]
pub struct AddMemberRequest {
    /// Existing user by id
    pub user_id: Option<Uuid>,

    /// Existing user by email, when `user_id` is absent
    #[validate(email)]
    pub email: Option<String>,

    #[serde(default = "default_role")]
    pub role: Role,

    /// Defaults to the role's permission set
    pub permissions: Option<Vec<String>>,
}

fn default_role() -> Role {
    Role::Member
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRequest {
    pub role: Option<Role>,
    pub permissions: Option<Vec<String>>,
}

#[derive(Serialize)]
pub struct MemberView {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub role: String,
    pub permissions: Vec<String>,
    pub joined_at: DateTime<FixedOffset>,
}

impl MemberView {
    async fn load(store: &dyn Store, member: TenantUser) -> Result<Self> {
        let profile = store.find_profile(member.user_id).await?;
        Ok(Self {
            user_id: member.user_id,
            email: profile.as_ref().map(|p| p.email.clone()),
            full_name: profile.and_then(|p| p.full_name),
            permissions: member.permission_list(),
            role: member.role,
            joined_at: member.created_at,
        })
    }
}

/// Owners (and platform admins acting as such) may manage the owner role
fn can_manage_owners(auth: &AuthContext, access: &TenantAccess) -> bool {
    if auth.is_api_key() {
        return false;
    }
    auth.is_platform_admin
        || access
            .membership
            .as_ref()
            .map(|m| m.role() == Role::Owner)
            .unwrap_or(false)
}

fn require_owner_rights(auth: &AuthContext, access: &TenantAccess) -> Result<()> {
    if can_manage_owners(auth, access) {
        Ok(())
    } else {
        Err(AppError::Forbidden {
            message: "Only owners can grant or revoke the owner role".to_string(),
        })
    }
}

/// Fail if `user_id` is the only owner left
async fn ensure_other_owner(store: &dyn Store, tenant_id: Uuid, user_id: Uuid) -> Result<()> {
    let other_owners = store
        .list_members(tenant_id)
        .await?
        .iter()
        .filter(|m| m.user_id != user_id && m.role() == Role::Owner)
        .count();

    if other_owners == 0 {
        Err(AppError::LastOwner)
    } else {
        Ok(())
    }
}

fn resolve_permissions(role: Role, requested: Option<Vec<String>>) -> Result<Vec<String>> {
    match requested {
        Some(perms) => normalize_permissions(perms),
        None => Ok(role.default_permissions()),
    }
}

/// List a tenant's members
pub async fn list(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(tenant_id): ApiPath<Uuid>,
) -> Result<ApiResponse<Vec<MemberView>>> {
    authorize_tenant(state.store.as_ref(), &auth, tenant_id, permissions::MEMBERS_READ).await?;

    let members = state.store.list_members(tenant_id).await?;
    let mut views = Vec::with_capacity(members.len());
    for member in members {
        views.push(MemberView::load(state.store.as_ref(), member).await?);
    }

    Ok(ApiResponse::ok(views))
}

/// Add an existing user to a tenant
pub async fn add(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(tenant_id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<AddMemberRequest>,
) -> Result<(StatusCode, ApiResponse<MemberView>)> {
    request.validate()?;

    let store = state.store.as_ref();
    let access = authorize_tenant(store, &auth, tenant_id, permissions::MEMBERS_WRITE).await?;

    if request.role == Role::Owner {
        require_owner_rights(&auth, &access)?;
    }

    let profile = match (request.user_id, request.email.as_deref()) {
        (Some(user_id), _) => store
            .find_profile(user_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound { id: user_id.to_string() })?,
        (None, Some(email)) => store
            .find_profile_by_email(&email.to_lowercase())
            .await?
            .ok_or_else(|| AppError::UserNotFound { id: email.to_string() })?,
        (None, None) => {
            return Err(AppError::MissingField { field: "user_id".to_string() });
        }
    };

    if profile.is_disabled {
        return Err(AppError::Validation {
            message: "Cannot add a disabled user".to_string(),
            field: Some("user_id".to_string()),
        });
    }

    let current = store.count_members(tenant_id).await?;
    if !within_limit(current, access.tenant.max_users as i64) {
        return Err(AppError::PlanLimitReached {
            message: format!("plan allows {} members", access.tenant.max_users),
        });
    }

    let granted = resolve_permissions(request.role, request.permissions)?;
    ensure_grantable(&granted, &access.permissions)?;

    let member = store
        .add_member(tenant_id, profile.id, request.role, granted)
        .await?;

    tracing::info!(
        tenant_id = %tenant_id,
        user_id = %profile.id,
        role = %request.role,
        added_by = %auth.user_id,
        "Member added"
    );

    Ok(ApiResponse::with_status(
        MemberView::load(store, member).await?,
        StatusCode::CREATED,
    ))
}

/// Change a member's role or permissions
pub async fn update(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath((tenant_id, user_id)): ApiPath<(Uuid, Uuid)>,
    ApiJson(request): ApiJson<UpdateMemberRequest>,
) -> Result<ApiResponse<MemberView>> {
    let store = state.store.as_ref();
    let access = authorize_tenant(store, &auth, tenant_id, permissions::MEMBERS_WRITE).await?;

    let target = store
        .find_membership(tenant_id, user_id)
        .await?
        .ok_or_else(|| AppError::MemberNotFound { user_id: user_id.to_string() })?;

    let current_role = target.role();
    let role = request.role.unwrap_or(current_role);

    if current_role == Role::Owner || role == Role::Owner {
        require_owner_rights(&auth, &access)?;
    }
    if current_role == Role::Owner && role != Role::Owner {
        ensure_other_owner(store, tenant_id, user_id).await?;
    }

    // A role change without explicit permissions resets them to the role defaults
    let granted = match request.permissions {
        Some(perms) => normalize_permissions(perms)?,
        None if role != current_role => role.default_permissions(),
        None => target.permission_list(),
    };
    let added: Vec<String> = granted
        .iter()
        .filter(|p| !target.has_permission(p))
        .cloned()
        .collect();
    ensure_grantable(&added, &access.permissions)?;

    let member = store.update_member(tenant_id, user_id, role, granted).await?;

    tracing::info!(
        tenant_id = %tenant_id,
        user_id = %user_id,
        role = %role,
        updated_by = %auth.user_id,
        "Member updated"
    );

    Ok(ApiResponse::ok(MemberView::load(store, member).await?))
}

/// Remove a member; any member may remove themselves
pub async fn remove(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath((tenant_id, user_id)): ApiPath<(Uuid, Uuid)>,
) -> Result<ApiResponse<serde_json::Value>> {
    let store = state.store.as_ref();

    let leaving = !auth.is_api_key() && auth.user_id == user_id;
    let required = if leaving { permissions::TENANT_READ } else { permissions::MEMBERS_WRITE };
    let access = authorize_tenant(store, &auth, tenant_id, required).await?;

    let target = store
        .find_membership(tenant_id, user_id)
        .await?
        .ok_or_else(|| AppError::MemberNotFound { user_id: user_id.to_string() })?;

    if target.role() == Role::Owner {
        if !leaving {
            require_owner_rights(&auth, &access)?;
        }
        ensure_other_owner(store, tenant_id, user_id).await?;
    }

    store.remove_member(tenant_id, user_id).await?;

    tracing::info!(
        tenant_id = %tenant_id,
        user_id = %user_id,
        removed_by = %auth.user_id,
        "Member removed"
    );

    Ok(ApiResponse::ok(serde_json::json!({ "removed": true, "user_id": user_id })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_permissions_defaults_to_role() {
        let perms = resolve_permissions(Role::Viewer, None).unwrap();
        assert_eq!(perms, Role::Viewer.default_permissions());

        let perms = resolve_permissions(Role::Member, Some(vec!["ai:route".into()])).unwrap();
        assert_eq!(perms, vec!["ai:route".to_string()]);

        assert!(resolve_permissions(Role::Member, Some(vec!["billing:write".into()])).is_err());
    }
}
