//! Provider selection and dispatch
//!
//! A request is matched against every registered provider, the survivors are
//! scored, and dispatch walks the ranking: each candidate gets up to
//! `max_attempts` tries with exponential backoff before the next one is used.

use super::registry::{ProviderRegistry, RegisteredProvider};
use super::{estimate_tokens, ChatMessage, CompletionRequest, TokenUsage};
use crate::config::{ProviderConfig, RouterConfig};
use crate::errors::{AppError, Result};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Preference bonus for providers the caller named
const PREFERRED_BONUS: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostPreference {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreference {
    Basic,
    Standard,
    High,
}

fn cost_weight(pref: Option<CostPreference>) -> f64 {
    match pref {
        Some(CostPreference::Low) => 0.7,
        Some(CostPreference::Medium) => 0.4,
        Some(CostPreference::High) => 0.1,
        None => 0.3,
    }
}

fn quality_weight(pref: Option<QualityPreference>) -> f64 {
    match pref {
        Some(QualityPreference::High) => 0.7,
        Some(QualityPreference::Standard) => 0.4,
        Some(QualityPreference::Basic) => 0.1,
        None => 0.3,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub cost: Option<CostPreference>,
    #[serde(default)]
    pub quality: Option<QualityPreference>,
    #[serde(default)]
    pub preferred_providers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Constraints {
    /// Upper bound on estimated cost in USD
    #[validate(range(min = 0.0))]
    pub max_cost: Option<f64>,
    #[validate(range(min = 1))]
    pub max_tokens: Option<u32>,
    #[validate(range(min = 1))]
    pub max_response_time_ms: Option<u64>,
    #[serde(default)]
    pub required_features: Vec<String>,
    #[serde(default)]
    pub excluded_providers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct RouteOptions {
    #[validate(range(min = 0.0, max = 2.0))]
    pub temperature: Option<f32>,
    #[validate(range(min = 1))]
    pub max_tokens: Option<u32>,
    #[validate(length(max = 8000))]
    pub system_prompt: Option<String>,
}

/// Unified routing request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RouteRequest {
    #[validate(length(max = 32000))]
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub context: Vec<ChatMessage>,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    #[validate(nested)]
    pub constraints: Constraints,
    #[serde(default)]
    #[validate(nested)]
    pub options: RouteOptions,
    /// Tenant billed for the request; implied by API keys
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
}

impl RouteRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: Vec::new(),
            preferences: Preferences::default(),
            constraints: Constraints::default(),
            options: RouteOptions::default(),
            tenant_id: None,
        }
    }

    /// Reject a blank prompt as a missing field, then run the validators
    pub fn check(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(AppError::MissingField { field: "prompt".to_string() });
        }
        self.validate()?;
        Ok(())
    }

    /// Completion cap from options and constraints, whichever is tighter
    fn requested_max_tokens(&self) -> Option<u32> {
        match (self.options.max_tokens, self.constraints.max_tokens) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn prompt_tokens(&self) -> u32 {
        estimate_tokens(&self.prompt)
            + self.context.iter().map(|m| estimate_tokens(&m.content)).sum::<u32>()
            + self
                .options
                .system_prompt
                .as_deref()
                .map(estimate_tokens)
                .unwrap_or(0)
    }
}

/// One try against one provider
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub provider: String,
    pub attempt: u32,
    pub success: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A ranked candidate
#[derive(Debug, Clone, Serialize)]
pub struct CandidateScore {
    pub provider: String,
    pub score: f64,
    pub estimated_cost_usd: f64,
}

/// Normalized routing result
#[derive(Debug, Clone, Serialize)]
pub struct RouteResponse {
    pub id: Uuid,
    pub provider: String,
    pub model: String,
    pub content: String,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub attempts: Vec<AttemptRecord>,
    pub candidates: Vec<CandidateScore>,
}

/// Cost in USD for the given token counts
pub fn cost_of(config: &ProviderConfig, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    prompt_tokens as f64 / 1000.0 * config.input_cost_per_1k
        + completion_tokens as f64 / 1000.0 * config.output_cost_per_1k
}

pub struct ProviderRouter {
    registry: Arc<ProviderRegistry>,
    config: RouterConfig,
}

impl ProviderRouter {
    pub fn new(registry: Arc<ProviderRegistry>, config: RouterConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    fn completion_budget(&self, request: &RouteRequest, provider: &ProviderConfig) -> u32 {
        request
            .requested_max_tokens()
            .unwrap_or(self.config.default_completion_tokens)
            .min(provider.max_output_tokens)
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.config.max_backoff_ms))
            .with_multiplier(2.0)
            .with_randomization_factor(0.1)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Filter and rank providers for `request`
    pub async fn rank(&self, request: &RouteRequest) -> Result<Vec<(RegisteredProvider, CandidateScore)>> {
        let entries = self.registry.snapshot().await;
        if entries.is_empty() {
            return Err(AppError::NoEligibleProvider {
                reason: "no providers are configured".to_string(),
            });
        }

        let prompt_tokens = request.prompt_tokens();
        let requested = request.requested_max_tokens();
        let constraints = &request.constraints;

        let mut eligible = Vec::new();
        for entry in entries {
            let c = &entry.config;
            let cost = cost_of(c, prompt_tokens, self.completion_budget(request, c));

            let admitted = c.enabled
                && !constraints.excluded_providers.iter().any(|p| p == &c.name)
                && constraints
                    .required_features
                    .iter()
                    .all(|f| c.features.iter().any(|have| have == f))
                && requested.map_or(true, |t| c.max_output_tokens >= t)
                && constraints.max_cost.map_or(true, |max| cost <= max)
                && constraints
                    .max_response_time_ms
                    .map_or(true, |max| c.avg_latency_ms <= max);

            if admitted {
                eligible.push((entry, cost));
            } else {
                debug!(provider = %c.name, "Provider filtered out");
            }
        }

        if eligible.is_empty() {
            return Err(AppError::NoEligibleProvider {
                reason: "constraints exclude every provider".to_string(),
            });
        }

        let available: Vec<(RegisteredProvider, f64)> = eligible
            .into_iter()
            .filter(|(entry, _)| entry.breaker.can_attempt())
            .collect();

        if available.is_empty() {
            return Err(AppError::CircuitBreakerOpen {
                service: "every eligible provider".to_string(),
            });
        }

        let max_cost = available.iter().map(|(_, cost)| *cost).fold(0.0_f64, f64::max);
        let cw = cost_weight(request.preferences.cost);
        let qw = quality_weight(request.preferences.quality);

        let mut ranked: Vec<(RegisteredProvider, CandidateScore)> = available
            .into_iter()
            .map(|(entry, cost)| {
                let cost_score = if max_cost > 0.0 { 1.0 - cost / max_cost } else { 1.0 };
                let preferred = request
                    .preferences
                    .preferred_providers
                    .iter()
                    .any(|p| p == &entry.config.name);
                let score = cw * cost_score
                    + qw * entry.config.quality
                    + if preferred { PREFERRED_BONUS } else { 0.0 };

                let candidate = CandidateScore {
                    provider: entry.config.name.clone(),
                    score,
                    estimated_cost_usd: cost,
                };
                (entry, candidate)
            })
            .collect();

        ranked.sort_by(|(a, sa), (b, sb)| {
            sb.score
                .total_cmp(&sa.score)
                .then(a.config.priority.cmp(&b.config.priority))
                .then(a.config.name.cmp(&b.config.name))
        });

        Ok(ranked)
    }

    /// Route a request, falling back through the ranking
    #[instrument(skip_all, fields(prompt_len = request.prompt.len()))]
    pub async fn route(&self, request: &RouteRequest) -> Result<RouteResponse> {
        let started = Instant::now();

        let ranked = match self.rank(request).await {
            Ok(ranked) => ranked,
            Err(e) => {
                crate::metrics::record_route("rejected", "none", started.elapsed().as_secs_f64(), 0.0);
                return Err(e);
            }
        };
        let candidates: Vec<CandidateScore> = ranked.iter().map(|(_, c)| c.clone()).collect();

        let mut messages = request.context.clone();
        messages.push(ChatMessage::user(request.prompt.clone()));

        let mut attempts = Vec::new();
        let mut last_error = String::from("no attempt was made");

        for (entry, _) in &ranked {
            let provider = &entry.config;
            let completion_request = CompletionRequest {
                messages: messages.clone(),
                system_prompt: request.options.system_prompt.clone(),
                temperature: request.options.temperature,
                max_tokens: self.completion_budget(request, provider),
            };

            let timeout = request
                .constraints
                .max_response_time_ms
                .map(Duration::from_millis)
                .map_or(provider.timeout(), |cap| cap.min(provider.timeout()));

            let mut backoff = self.backoff();

            for attempt in 1..=self.config.max_attempts {
                let Some(permit) = entry.breaker.try_acquire() else {
                    last_error = format!("circuit open for {}", provider.name);
                    attempts.push(AttemptRecord {
                        provider: provider.name.clone(),
                        attempt,
                        success: false,
                        latency_ms: 0,
                        error: Some(last_error.clone()),
                    });
                    break;
                };

                let attempt_start = Instant::now();
                let result = match tokio::time::timeout(timeout, entry.client.complete(&completion_request)).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::ProviderTimeout {
                        provider: provider.name.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                };
                let elapsed = attempt_start.elapsed();

                match result {
                    Ok(completion) => {
                        permit.success();
                        crate::metrics::record_provider_attempt(&provider.name, "success", elapsed.as_secs_f64());
                        attempts.push(AttemptRecord {
                            provider: provider.name.clone(),
                            attempt,
                            success: true,
                            latency_ms: elapsed.as_millis() as u64,
                            error: None,
                        });

                        let usage = if completion.usage.total_tokens > 0 {
                            completion.usage
                        } else {
                            TokenUsage::new(request.prompt_tokens(), estimate_tokens(&completion.content))
                        };
                        let cost_usd = cost_of(provider, usage.prompt_tokens, usage.completion_tokens);
                        let latency = started.elapsed();

                        crate::metrics::record_route("success", &provider.name, latency.as_secs_f64(), cost_usd);
                        info!(
                            provider = %provider.name,
                            model = %completion.model,
                            attempts = attempts.len(),
                            total_tokens = usage.total_tokens,
                            cost_usd,
                            latency_ms = latency.as_millis() as u64,
                            "Request routed"
                        );

                        return Ok(RouteResponse {
                            id: Uuid::new_v4(),
                            provider: provider.name.clone(),
                            model: completion.model,
                            content: completion.content,
                            usage,
                            cost_usd,
                            latency_ms: latency.as_millis() as u64,
                            attempts,
                            candidates,
                        });
                    }
                    Err(e) => {
                        let retryable = e.is_retryable();
                        if retryable {
                            permit.failure();
                        } else {
                            // Provider answered; the request itself was rejected
                            permit.success();
                        }
                        crate::metrics::record_provider_attempt(&provider.name, "error", elapsed.as_secs_f64());

                        warn!(
                            provider = %provider.name,
                            attempt,
                            max_attempts = self.config.max_attempts,
                            retryable,
                            error = %e,
                            "Provider attempt failed"
                        );

                        last_error = e.to_string();
                        attempts.push(AttemptRecord {
                            provider: provider.name.clone(),
                            attempt,
                            success: false,
                            latency_ms: elapsed.as_millis() as u64,
                            error: Some(last_error.clone()),
                        });

                        if !retryable || attempt == self.config.max_attempts {
                            break;
                        }
                        if let Some(delay) = backoff.next_backoff() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        crate::metrics::record_route("failed", "none", started.elapsed().as_secs_f64(), 0.0);
        Err(AppError::RoutingFailed { message: last_error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CircuitState, MockProvider};
    use axum::http::StatusCode;

    fn router_config() -> RouterConfig {
        RouterConfig {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            failure_threshold: 5,
            cooldown_secs: 60,
            default_completion_tokens: 100,
        }
    }

    fn provider(name: &str, input: f64, output: f64, quality: f64) -> ProviderConfig {
        ProviderConfig {
            input_cost_per_1k: input,
            output_cost_per_1k: output,
            quality,
            ..ProviderConfig::mock(name)
        }
    }

    async fn router(providers: Vec<(ProviderConfig, MockProvider)>) -> (ProviderRouter, Vec<Arc<MockProvider>>) {
        let registry = Arc::new(ProviderRegistry::new(&router_config()));
        let mut mocks = Vec::new();
        for (config, mock) in providers {
            let mock = Arc::new(mock);
            registry.register(config, mock.clone()).await;
            mocks.push(mock);
        }
        (ProviderRouter::new(registry, router_config()), mocks)
    }

    fn ok(name: &str) -> MockProvider {
        MockProvider::new(name, &format!("{}-model", name))
    }

    fn ranking(ranked: &[(RegisteredProvider, CandidateScore)]) -> Vec<String> {
        ranked.iter().map(|(_, c)| c.provider.clone()).collect()
    }

    #[tokio::test]
    async fn test_cost_preference_orders_cheapest_first() {
        let (router, _) = router(vec![
            (provider("premium", 10.0, 30.0, 0.9), ok("premium")),
            (provider("budget", 0.1, 0.2, 0.5), ok("budget")),
        ])
        .await;

        let mut request = RouteRequest::new("Summarize this");
        request.preferences.cost = Some(CostPreference::Low);

        let ranked = router.rank(&request).await.unwrap();
        assert_eq!(ranking(&ranked), vec!["budget", "premium"]);
    }

    #[tokio::test]
    async fn test_quality_preference_orders_best_first() {
        let (router, _) = router(vec![
            (provider("premium", 1.0, 2.0, 0.95), ok("premium")),
            (provider("budget", 0.9, 1.8, 0.4), ok("budget")),
        ])
        .await;

        let mut request = RouteRequest::new("Write a proof");
        request.preferences.quality = Some(QualityPreference::High);
        request.preferences.cost = Some(CostPreference::High);

        let ranked = router.rank(&request).await.unwrap();
        assert_eq!(ranking(&ranked), vec!["premium", "budget"]);
    }

    #[tokio::test]
    async fn test_preferred_provider_bonus() {
        let (router, _) = router(vec![
            (provider("a", 0.0, 0.0, 0.5), ok("a")),
            (provider("b", 0.0, 0.0, 0.5), ok("b")),
        ])
        .await;

        let mut request = RouteRequest::new("hi");
        assert_eq!(ranking(&router.rank(&request).await.unwrap()), vec!["a", "b"]);

        request.preferences.preferred_providers = vec!["b".to_string()];
        assert_eq!(ranking(&router.rank(&request).await.unwrap()), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_excluded_and_featureless_never_selected() {
        let mut vision = provider("vision", 5.0, 5.0, 0.9);
        vision.features.push("vision".to_string());

        let (router, mocks) = router(vec![
            (provider("cheap", 0.0, 0.0, 0.9), ok("cheap")),
            (vision, ok("vision")),
            (provider("other", 0.0, 0.0, 0.9), ok("other")),
        ])
        .await;

        let mut request = RouteRequest::new("describe the image");
        request.constraints.required_features = vec!["vision".to_string()];
        let response = router.route(&request).await.unwrap();
        assert_eq!(response.provider, "vision");
        assert_eq!(response.candidates.len(), 1);

        let mut request = RouteRequest::new("hi");
        request.constraints.excluded_providers = vec!["cheap".to_string(), "vision".to_string()];
        let response = router.route(&request).await.unwrap();
        assert_eq!(response.provider, "other");
        assert_eq!(mocks[0].calls(), 0);
    }

    #[tokio::test]
    async fn test_constraints_eliminating_everything_is_bad_request() {
        let (router, _) = router(vec![(provider("a", 50.0, 50.0, 0.5), ok("a"))]).await;

        let mut request = RouteRequest::new("hi");
        request.constraints.max_cost = Some(0.000001);

        let err = router.route(&request).await.unwrap_err();
        assert!(matches!(err, AppError::NoEligibleProvider { .. }));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_max_tokens_filters_small_models() {
        let mut small = provider("small", 0.0, 0.0, 0.9);
        small.max_output_tokens = 256;
        let (router, _) = router(vec![(small, ok("small")), (provider("large", 0.0, 0.0, 0.1), ok("large"))]).await;

        let mut request = RouteRequest::new("long essay");
        request.options.max_tokens = Some(2048);

        let ranked = router.rank(&request).await.unwrap();
        assert_eq!(ranking(&ranked), vec!["large"]);
    }

    #[tokio::test]
    async fn test_fallback_after_retries_exhausted() {
        let (router, mocks) = router(vec![
            (provider("primary", 0.0, 0.0, 0.9), ok("primary").failing(true)),
            (provider("backup", 0.0, 0.0, 0.1), ok("backup")),
        ])
        .await;

        let response = router.route(&RouteRequest::new("hello")).await.unwrap();
        assert_eq!(response.provider, "backup");
        assert_eq!(mocks[0].calls(), 2);
        assert_eq!(response.attempts.len(), 3);
        assert!(!response.attempts[0].success);
        assert!(response.attempts[2].success);
        assert_eq!(response.content, "[backup] hello");
    }

    #[tokio::test]
    async fn test_retry_recovers_same_provider() {
        let (router, mocks) = router(vec![
            (provider("flaky", 0.0, 0.0, 0.9), ok("flaky").with_failures(1, true)),
            (provider("backup", 0.0, 0.0, 0.1), ok("backup")),
        ])
        .await;

        let response = router.route(&RouteRequest::new("hello")).await.unwrap();
        assert_eq!(response.provider, "flaky");
        assert_eq!(mocks[0].calls(), 2);
        assert_eq!(mocks[1].calls(), 0);
    }

    #[tokio::test]
    async fn test_non_retryable_moves_on_immediately() {
        let (router, mocks) = router(vec![
            (provider("strict", 0.0, 0.0, 0.9), ok("strict").failing(false)),
            (provider("backup", 0.0, 0.0, 0.1), ok("backup")),
        ])
        .await;

        let response = router.route(&RouteRequest::new("hello")).await.unwrap();
        assert_eq!(response.provider, "backup");
        assert_eq!(mocks[0].calls(), 1);
    }

    #[tokio::test]
    async fn test_all_failing_is_internal_error_with_last_message() {
        let (router, _) = router(vec![
            (provider("a", 0.0, 0.0, 0.9), ok("a").failing(true)),
            (provider("b", 0.0, 0.0, 0.1), ok("b").failing(true)),
        ])
        .await;

        let err = router.route(&RouteRequest::new("hello")).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().contains("Provider b failed"));
    }

    #[tokio::test]
    async fn test_open_circuit_is_skipped() {
        let (router, mocks) = router(vec![
            (provider("broken", 0.0, 0.0, 0.9), ok("broken")),
            (provider("healthy", 0.0, 0.0, 0.1), ok("healthy")),
        ])
        .await;

        let broken = router.registry().get("broken").await.unwrap();
        for _ in 0..router_config().failure_threshold {
            broken.breaker.record_failure();
        }
        assert_eq!(broken.breaker.state(), CircuitState::Open);

        let response = router.route(&RouteRequest::new("hello")).await.unwrap();
        assert_eq!(response.provider, "healthy");
        assert_eq!(mocks[0].calls(), 0);
        assert!(response.candidates.iter().all(|c| c.provider != "broken"));
    }

    #[tokio::test]
    async fn test_repeated_failures_open_circuit() {
        let (router, _) = router(vec![
            (provider("down", 0.0, 0.0, 0.9), ok("down").failing(true)),
            (provider("up", 0.0, 0.0, 0.1), ok("up")),
        ])
        .await;

        for _ in 0..3 {
            router.route(&RouteRequest::new("hello")).await.unwrap();
        }

        let down = router.registry().get("down").await.unwrap();
        assert_eq!(down.breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_slow_provider_times_out_and_falls_back() {
        let (router, _) = router(vec![
            (provider("slow", 0.0, 0.0, 0.9), ok("slow").with_delay(Duration::from_millis(500))),
            (provider("fast", 0.0, 0.0, 0.1), ok("fast")),
        ])
        .await;

        let mut request = RouteRequest::new("hello");
        request.constraints.max_response_time_ms = Some(50);

        let response = router.route(&request).await.unwrap();
        assert_eq!(response.provider, "fast");
        assert!(response.attempts[0].error.as_deref().unwrap_or_default().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_trial_call_frees_circuit() {
        let config = RouterConfig {
            failure_threshold: 1,
            cooldown_secs: 0,
            ..router_config()
        };
        let registry = Arc::new(ProviderRegistry::new(&config));
        registry
            .register(
                provider("slow", 0.0, 0.0, 0.9),
                Arc::new(ok("slow").with_delay(Duration::from_millis(500))),
            )
            .await;
        let router = ProviderRouter::new(registry, config);

        let entry = router.registry().get("slow").await.unwrap();
        entry.breaker.record_failure();
        assert_eq!(entry.breaker.state(), CircuitState::Open);

        // Caller gives up while the half-open trial call is in flight
        let request = RouteRequest::new("hello");
        let cancelled = tokio::time::timeout(Duration::from_millis(20), router.route(&request)).await;
        assert!(cancelled.is_err());

        assert_eq!(entry.breaker.state(), CircuitState::HalfOpen);
        assert!(entry.breaker.can_attempt());
        assert!(entry.breaker.try_acquire().is_some_and(|permit| permit.is_trial()));
    }

    #[tokio::test]
    async fn test_disabled_provider_skipped() {
        let (router, _) = router(vec![
            (provider("a", 0.0, 0.0, 0.9), ok("a")),
            (provider("b", 0.0, 0.0, 0.1), ok("b")),
        ])
        .await;
        router.registry().set_enabled("a", false).await.unwrap();

        let response = router.route(&RouteRequest::new("hello")).await.unwrap();
        assert_eq!(response.provider, "b");
    }

    #[test]
    fn test_cost_estimate() {
        let config = provider("p", 1.0, 2.0, 0.5);
        let cost = cost_of(&config, 1000, 500);
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_request_validation() {
        for blank in ["", "   "] {
            let err = RouteRequest::new(blank).check().unwrap_err();
            assert!(matches!(err, AppError::MissingField { ref field } if field == "prompt"));
        }
        assert!(matches!(
            RouteRequest::new("x".repeat(32_001)).check(),
            Err(AppError::Validation { .. })
        ));

        let mut request = RouteRequest::new("ok");
        assert!(request.check().is_ok());
        request.options.temperature = Some(3.5);
        assert!(matches!(request.check(), Err(AppError::Validation { .. })));
    }
}
