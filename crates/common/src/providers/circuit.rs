//! Per-provider circuit breaker
//!
//! Closed until `threshold` consecutive failures, then Open for `cooldown`.
//! After the cooldown a single trial call is admitted (HalfOpen); its outcome
//! closes or re-opens the circuit.
//!
//! Calls are admitted through [`CircuitPermit`]. A permit dropped without an
//! outcome (cancelled or timed-out caller) hands the half-open slot back.

use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

/// Admission for one call
///
/// Settle it with [`success`](Self::success) or [`failure`](Self::failure).
#[must_use = "an unsettled permit records no outcome"]
#[derive(Debug)]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CircuitPermit<'_> {
    /// Whether this permit holds the half-open trial slot
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.to_string(),
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cooled_down(&self, inner: &Inner) -> bool {
        inner
            .opened_at
            .map(|at| at.elapsed() >= self.cooldown)
            .unwrap_or(true)
    }

    fn permit(&self, trial: bool) -> CircuitPermit<'_> {
        CircuitPermit {
            breaker: self,
            trial,
            settled: false,
        }
    }

    /// Whether a call would currently be admitted, without claiming a permit
    pub fn can_attempt(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.cooled_down(&inner),
            CircuitState::HalfOpen => !inner.trial_in_flight,
        }
    }

    /// Claim permission for one call
    pub fn try_acquire(&self) -> Option<CircuitPermit<'_>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Some(self.permit(false)),
            CircuitState::Open if self.cooled_down(&inner) => {
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                crate::metrics::record_circuit_state(&self.name, CircuitState::HalfOpen);
                info!(provider = %self.name, "Circuit half-open, admitting a trial call");
                Some(self.permit(true))
            }
            CircuitState::Open => None,
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Some(self.permit(true))
            }
            CircuitState::HalfOpen => None,
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
            debug!(provider = %self.name, "Trial call abandoned, circuit stays half-open");
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(provider = %self.name, "Circuit closed");
            crate::metrics::record_circuit_state(&self.name, CircuitState::Closed);
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.trial_in_flight = false;

        let trip = inner.state == CircuitState::HalfOpen
            || (inner.state == CircuitState::Closed && inner.consecutive_failures >= self.threshold);

        if trip {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            crate::metrics::record_circuit_state(&self.name, CircuitState::Open);
            warn!(
                provider = %self.name,
                failures = inner.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Circuit opened"
            );
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Force the circuit closed
    pub fn reset(&self) {
        self.record_success();
    }
}
