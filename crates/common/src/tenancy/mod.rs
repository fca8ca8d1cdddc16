//! Tenancy domain rules
//!
//! Roles and their default permission sets, subscription plans and their
//! caps, slug validation, and usage periods.

use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Permission strings stored on memberships and API keys
pub mod permissions {
    pub const TENANT_READ: &str = "tenant:read";
    pub const TENANT_WRITE: &str = "tenant:write";
    pub const TENANT_DELETE: &str = "tenant:delete";
    pub const MEMBERS_READ: &str = "members:read";
    pub const MEMBERS_WRITE: &str = "members:write";
    pub const API_KEYS_READ: &str = "api_keys:read";
    pub const API_KEYS_WRITE: &str = "api_keys:write";
    pub const AI_ROUTE: &str = "ai:route";
    pub const USAGE_READ: &str = "usage:read";

    pub const ALL: &[&str] = &[
        TENANT_READ,
        TENANT_WRITE,
        TENANT_DELETE,
        MEMBERS_READ,
        MEMBERS_WRITE,
        API_KEYS_READ,
        API_KEYS_WRITE,
        AI_ROUTE,
        USAGE_READ,
    ];

    pub fn is_known(permission: &str) -> bool {
        ALL.contains(&permission)
    }
}

/// Membership role within a tenant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
            Role::Viewer => "viewer",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            "viewer" => Ok(Role::Viewer),
            other => Err(AppError::InvalidFormat {
                message: format!("unknown role '{}'", other),
            }),
        }
    }

    /// Permissions granted when no explicit set is supplied
    pub fn default_permissions(&self) -> Vec<String> {
        use permissions::*;

        let granted: &[&str] = match self {
            Role::Owner => ALL,
            Role::Admin => &[
                TENANT_READ,
                TENANT_WRITE,
                MEMBERS_READ,
                MEMBERS_WRITE,
                API_KEYS_READ,
                API_KEYS_WRITE,
                AI_ROUTE,
                USAGE_READ,
            ],
            Role::Member => &[
                TENANT_READ,
                MEMBERS_READ,
                API_KEYS_READ,
                API_KEYS_WRITE,
                AI_ROUTE,
                USAGE_READ,
            ],
            Role::Viewer => &[TENANT_READ, MEMBERS_READ, USAGE_READ],
        };

        granted.iter().map(|p| p.to_string()).collect()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription plan
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Starter,
    Pro,
    Enterprise,
}

/// Caps derived from a plan. Zero means unlimited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    pub max_users: i32,
    pub max_api_keys: i32,
    pub monthly_request_limit: i64,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Starter => "starter",
            Plan::Pro => "pro",
            Plan::Enterprise => "enterprise",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "free" => Ok(Plan::Free),
            "starter" => Ok(Plan::Starter),
            "pro" => Ok(Plan::Pro),
            "enterprise" => Ok(Plan::Enterprise),
            other => Err(AppError::InvalidFormat {
                message: format!("unknown plan '{}'", other),
            }),
        }
    }

    pub fn limits(&self) -> PlanLimits {
        match self {
            Plan::Free => PlanLimits { max_users: 3, max_api_keys: 2, monthly_request_limit: 1_000 },
            Plan::Starter => PlanLimits { max_users: 10, max_api_keys: 5, monthly_request_limit: 10_000 },
            Plan::Pro => PlanLimits { max_users: 50, max_api_keys: 20, monthly_request_limit: 100_000 },
            Plan::Enterprise => PlanLimits { max_users: 0, max_api_keys: 0, monthly_request_limit: 0 },
        }
    }
}

/// Billing state of a tenant's subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "active" => Ok(SubscriptionStatus::Active),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            other => Err(AppError::InvalidFormat {
                message: format!("unknown subscription status '{}'", other),
            }),
        }
    }

    /// Whether the subscription entitles the tenant to route AI requests
    pub fn allows_usage(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

fn slug_regex() -> &'static Regex {
    static SLUG: OnceLock<Regex> = OnceLock::new();
    SLUG.get_or_init(|| {
        Regex::new(r"^[a-z0-9](?:[a-z0-9-]{1,46}[a-z0-9])$").expect("slug pattern is valid")
    })
}

/// Validate a tenant slug (3-48 chars, lowercase alphanumerics and inner dashes)
pub fn validate_slug(slug: &str) -> Result<()> {
    if slug_regex().is_match(slug) {
        Ok(())
    } else {
        Err(AppError::Validation {
            message: format!("invalid slug '{}'", slug),
            field: Some("slug".to_string()),
        })
    }
}

/// Derive a slug from a display name
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches('-');
    slug.chars().take(48).collect::<String>().trim_end_matches('-').to_string()
}

/// Usage aggregation period (`YYYY-MM`) containing `at`
pub fn period_of(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// Current usage period
pub fn current_period() -> String {
    period_of(Utc::now())
}

/// Validate a user-supplied period string
pub fn validate_period(period: &str) -> Result<()> {
    let valid = period.len() == 7
        && period.as_bytes()[4] == b'-'
        && period[..4].chars().all(|c| c.is_ascii_digit())
        && matches!(period[5..].parse::<u32>(), Ok(1..=12));
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation {
            message: format!("invalid period '{}', expected YYYY-MM", period),
            field: Some("period".to_string()),
        })
    }
}

/// Ensure every permission is known, deduplicating in place
pub fn normalize_permissions(requested: Vec<String>) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(requested.len());
    for permission in requested {
        if !permissions::is_known(&permission) {
            return Err(AppError::Validation {
                message: format!("unknown permission '{}'", permission),
                field: Some("permissions".to_string()),
            });
        }
        if !out.contains(&permission) {
            out.push(permission);
        }
    }
    Ok(out)
}

/// Fail on the first permission in `requested` that `held` lacks
///
/// Callers can only hand out permissions they hold themselves, whether to an
/// API key or to a member.
pub fn ensure_grantable(requested: &[String], held: &[String]) -> Result<()> {
    match requested.iter().find(|p| !held.contains(p)) {
        Some(missing) => Err(AppError::InsufficientPermissions {
            permission: missing.clone(),
        }),
        None => Ok(()),
    }
}

/// Whether `limit` (0 = unlimited) allows one more after `current`
pub fn within_limit(current: u64, limit: i64) -> bool {
    limit <= 0 || (current as i64) < limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_owner_has_every_permission() {
        let owner = Role::Owner.default_permissions();
        for permission in permissions::ALL {
            assert!(owner.contains(&permission.to_string()));
        }
    }

    #[test]
    fn test_admin_cannot_delete_tenant() {
        let admin = Role::Admin.default_permissions();
        assert!(!admin.contains(&permissions::TENANT_DELETE.to_string()));
        assert!(admin.contains(&permissions::MEMBERS_WRITE.to_string()));
    }

    #[test]
    fn test_viewer_is_read_only() {
        let viewer = Role::Viewer.default_permissions();
        assert!(viewer.iter().all(|p| p.ends_with(":read")));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("admin").unwrap(), Role::Admin);
        assert!(Role::parse("superuser").is_err());
    }

    #[test]
    fn test_plan_limits() {
        assert_eq!(Plan::Free.limits().max_users, 3);
        assert_eq!(Plan::Enterprise.limits().monthly_request_limit, 0);
        assert_eq!(Plan::parse("pro").unwrap(), Plan::Pro);
    }

    #[test]
    fn test_subscription_usage() {
        assert!(SubscriptionStatus::Trialing.allows_usage());
        assert!(!SubscriptionStatus::PastDue.allows_usage());
        assert!(!SubscriptionStatus::Canceled.allows_usage());
    }

    #[test]
    fn test_slug_validation() {
        assert!(validate_slug("acme").is_ok());
        assert!(validate_slug("acme-labs-2").is_ok());
        assert!(validate_slug("ab").is_err());
        assert!(validate_slug("-acme").is_err());
        assert!(validate_slug("Acme").is_err());
        assert!(validate_slug("acme_labs").is_err());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Acme Labs, Inc."), "acme-labs-inc");
        assert_eq!(slugify("  --Hello__World-- "), "hello-world");
        assert!(validate_slug(&slugify("Northwind Traders")).is_ok());
    }

    #[test]
    fn test_period() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(period_of(at), "2026-03");
        assert!(validate_period("2026-03").is_ok());
        assert!(validate_period("2026-13").is_err());
        assert!(validate_period("26-03").is_err());
    }

    #[test]
    fn test_normalize_permissions() {
        let perms = normalize_permissions(vec![
            "ai:route".into(),
            "ai:route".into(),
            "usage:read".into(),
        ])
        .unwrap();
        assert_eq!(perms, vec!["ai:route".to_string(), "usage:read".to_string()]);
        assert!(normalize_permissions(vec!["root".into()]).is_err());
    }

    #[test]
    fn test_ensure_grantable() {
        let admin = Role::Admin.default_permissions();
        assert!(ensure_grantable(&Role::Member.default_permissions(), &admin).is_ok());
        assert!(ensure_grantable(&[], &[]).is_ok());

        let err = ensure_grantable(&Role::Owner.default_permissions(), &admin).unwrap_err();
        assert!(matches!(err, AppError::InsufficientPermissions { ref permission } if permission == permissions::TENANT_DELETE));
    }

    #[test]
    fn test_within_limit() {
        assert!(within_limit(2, 3));
        assert!(!within_limit(3, 3));
        assert!(within_limit(1_000_000, 0));
    }
}
