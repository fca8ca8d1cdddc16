//! Tenant-scoped authorization

use super::AuthContext;
use crate::db::models::{Tenant, TenantUser};
use crate::db::Store;
use crate::errors::{AppError, Result};
use crate::tenancy::permissions;
use tracing::debug;
use uuid::Uuid;

/// Outcome of a successful tenant access check
#[derive(Debug, Clone)]
pub struct TenantAccess {
    pub tenant: Tenant,
    /// Caller's membership; `None` for API keys and non-member platform admins
    pub membership: Option<TenantUser>,
    /// Effective permissions within the tenant
    pub permissions: Vec<String>,
}

impl TenantAccess {
    pub fn has(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Check that the caller may exercise `permission` on `tenant_id`
///
/// Platform admins pass every check. API keys must belong to the tenant and
/// carry the permission. Users need a membership granting it.
pub async fn authorize_tenant(
    store: &dyn Store,
    auth: &AuthContext,
    tenant_id: Uuid,
    permission: &str,
) -> Result<TenantAccess> {
    if let Some(key_tenant) = auth.api_key_tenant() {
        if key_tenant != tenant_id {
            return Err(AppError::TenantMismatch);
        }
    }

    let tenant = store
        .find_tenant(tenant_id)
        .await?
        .ok_or_else(|| AppError::TenantNotFound { id: tenant_id.to_string() })?;

    if auth.is_api_key() {
        if !auth.scopes.iter().any(|s| s == permission) {
            return Err(AppError::InsufficientPermissions {
                permission: permission.to_string(),
            });
        }
        return Ok(TenantAccess {
            tenant,
            membership: None,
            permissions: auth.scopes.clone(),
        });
    }

    let membership = store.find_membership(tenant_id, auth.user_id).await?;

    if auth.is_platform_admin {
        debug!(user_id = %auth.user_id, %tenant_id, permission, "Platform admin access");
        return Ok(TenantAccess {
            tenant,
            membership,
            permissions: permissions::ALL.iter().map(|p| p.to_string()).collect(),
        });
    }

    let membership = membership.ok_or_else(|| AppError::Forbidden {
        message: "Not a member of this tenant".to_string(),
    })?;

    if !membership.has_permission(permission) {
        return Err(AppError::InsufficientPermissions {
            permission: permission.to_string(),
        });
    }

    Ok(TenantAccess {
        tenant,
        permissions: membership.permission_list(),
        membership: Some(membership),
    })
}

/// Require a platform admin user session
pub fn require_platform_admin(auth: &AuthContext) -> Result<()> {
    if auth.is_platform_admin && !auth.is_api_key() {
        Ok(())
    } else {
        Err(AppError::Forbidden {
            message: "Platform admin access required".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthMethod;
    use crate::db::{MemoryStore, NewTenant};
    use crate::tenancy::{Plan, Role};

    fn user(id: Uuid, admin: bool) -> AuthContext {
        AuthContext {
            user_id: id,
            email: "u@example.com".to_string(),
            is_platform_admin: admin,
            method: AuthMethod::Bearer,
            scopes: Vec::new(),
            request_id: "req".to_string(),
            access_token: None,
        }
    }

    async fn seeded() -> (MemoryStore, Uuid, Uuid) {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let (tenant, _) = store
            .create_tenant(
                owner,
                NewTenant {
                    name: "Acme".into(),
                    slug: "acme".into(),
                    plan: Plan::Free,
                    settings: serde_json::json!({}),
                },
            )
            .await
            .unwrap();
        (store, tenant.id, owner)
    }

    #[tokio::test]
    async fn test_member_permissions() {
        let (store, tenant_id, owner) = seeded().await;
        let viewer = Uuid::new_v4();
        store
            .add_member(tenant_id, viewer, Role::Viewer, Role::Viewer.default_permissions())
            .await
            .unwrap();

        let access = authorize_tenant(&store, &user(owner, false), tenant_id, permissions::TENANT_DELETE)
            .await
            .unwrap();
        assert!(access.membership.is_some());

        assert!(authorize_tenant(&store, &user(viewer, false), tenant_id, permissions::TENANT_READ)
            .await
            .is_ok());
        let err = authorize_tenant(&store, &user(viewer, false), tenant_id, permissions::TENANT_WRITE)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientPermissions { .. }));
    }

    #[tokio::test]
    async fn test_outsider_and_admin() {
        let (store, tenant_id, _) = seeded().await;
        let outsider = Uuid::new_v4();

        let err = authorize_tenant(&store, &user(outsider, false), tenant_id, permissions::TENANT_READ)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));

        let access = authorize_tenant(&store, &user(outsider, true), tenant_id, permissions::TENANT_DELETE)
            .await
            .unwrap();
        assert!(access.membership.is_none());
        assert!(access.has(permissions::TENANT_DELETE));
    }

    #[tokio::test]
    async fn test_api_key_scope_and_tenant() {
        let (store, tenant_id, owner) = seeded().await;
        let key = AuthContext {
            method: AuthMethod::ApiKey { key_id: Uuid::new_v4(), tenant_id },
            scopes: vec![permissions::AI_ROUTE.to_string()],
            ..user(owner, false)
        };

        assert!(authorize_tenant(&store, &key, tenant_id, permissions::AI_ROUTE).await.is_ok());
        assert!(authorize_tenant(&store, &key, tenant_id, permissions::TENANT_READ).await.is_err());

        let err = authorize_tenant(&store, &key, Uuid::new_v4(), permissions::AI_ROUTE)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TenantMismatch));
    }

    #[test]
    fn test_require_platform_admin() {
        assert!(require_platform_admin(&user(Uuid::new_v4(), true)).is_ok());
        assert!(require_platform_admin(&user(Uuid::new_v4(), false)).is_err());
    }
}
