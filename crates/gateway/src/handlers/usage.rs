//! Tenant usage statistics

use axum::extract::State;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::extract::{ApiPath, ApiQuery};
use relayforge_common::{
    auth::{authorize_tenant, AuthContext},
    db::models::UsageStat,
    errors::Result,
    response::ApiResponse,
    tenancy::{current_period, permissions, validate_period},
};

const DEFAULT_HISTORY: u64 = 12;
const MAX_HISTORY: u64 = 36;

#[derive(Debug, Deserialize)]
pub struct UsageParams {
    /// `YYYY-MM`; defaults to the current month
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct UsageView {
    pub period: String,
    pub request_count: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cost_usd: f64,
}

impl UsageView {
    fn empty(period: String) -> Self {
        Self {
            period,
            request_count: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            cost_usd: 0.0,
        }
    }
}

impl From<UsageStat> for UsageView {
    fn from(stat: UsageStat) -> Self {
        Self {
            total_tokens: stat.total_tokens(),
            cost_usd: stat.cost_usd(),
            request_count: stat.request_count,
            prompt_tokens: stat.prompt_tokens,
            completion_tokens: stat.completion_tokens,
            period: stat.period,
        }
    }
}

#[derive(Serialize)]
pub struct UsageSummary {
    pub tenant_id: Uuid,
    #[serde(flatten)]
    pub usage: UsageView,
    /// Zero means unlimited
    pub monthly_request_limit: i64,
    /// `None` when unlimited
    pub remaining_requests: Option<i64>,
}

#[derive(Serialize)]
pub struct UsageHistory {
    pub tenant_id: Uuid,
    pub periods: Vec<UsageView>,
}

/// Usage for one period
pub async fn current(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(tenant_id): ApiPath<Uuid>,
    ApiQuery(params): ApiQuery<UsageParams>,
) -> Result<ApiResponse<UsageSummary>> {
    let access = authorize_tenant(state.store.as_ref(), &auth, tenant_id, permissions::USAGE_READ).await?;

    let period = match params.period {
        Some(period) => {
            validate_period(&period)?;
            period
        }
        None => current_period(),
    };

    let usage = state
        .store
        .find_usage(tenant_id, &period)
        .await?
        .map(UsageView::from)
        .unwrap_or_else(|| UsageView::empty(period));

    let limit = access.tenant.monthly_request_limit;
    let remaining_requests = (limit > 0).then(|| (limit - usage.request_count).max(0));

    Ok(ApiResponse::ok(UsageSummary {
        tenant_id,
        usage,
        monthly_request_limit: limit,
        remaining_requests,
    }))
}

/// Most recent periods first
pub async fn history(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(tenant_id): ApiPath<Uuid>,
    ApiQuery(params): ApiQuery<HistoryParams>,
) -> Result<ApiResponse<UsageHistory>> {
    authorize_tenant(state.store.as_ref(), &auth, tenant_id, permissions::USAGE_READ).await?;

    let limit = params.limit.unwrap_or(DEFAULT_HISTORY).clamp(1, MAX_HISTORY);
    let periods = state
        .store
        .list_usage(tenant_id, limit)
        .await?
        .into_iter()
        .map(UsageView::from)
        .collect();

    Ok(ApiResponse::ok(UsageHistory { tenant_id, periods }))
}
