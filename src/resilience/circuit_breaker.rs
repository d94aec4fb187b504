use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally
    #[default]
    Closed,
    /// Circuit is open - requests go straight to the fallback
    Open,
    /// Circuit is half-open - a probe request tests recovery
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failure threshold to open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes needed to close the circuit
    pub success_threshold: u32,
    /// Time to wait before transitioning from open to half-open
    pub recovery_timeout: Duration,
    /// Maximum number of probes in flight while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

/// Why a call was answered by the fallback instead of the operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradeReason {
    /// The circuit is open and the recovery timeout has not elapsed
    CircuitOpen,
    /// The circuit is half-open and the probe budget is in use
    ProbeInFlight,
    /// The operation ran and failed
    OperationFailed(String),
}

/// Result of [`CircuitBreaker::execute`].
///
/// `execute` never fails: either the operation produced the value, or the
/// fallback did and the reason is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome<T> {
    Primary(T),
    Degraded { value: T, reason: DegradeReason },
}

impl<T> CallOutcome<T> {
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    #[must_use]
    pub const fn value(&self) -> &T {
        match self {
            Self::Primary(value) | Self::Degraded { value, .. } => value,
        }
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        match self {
            Self::Primary(value) | Self::Degraded { value, .. } => value,
        }
    }

    #[must_use]
    pub const fn degrade_reason(&self) -> Option<&DegradeReason> {
        match self {
            Self::Primary(_) => None,
            Self::Degraded { reason, .. } => Some(reason),
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    state: CircuitState,
    /// Bumped on every state transition; outcomes from an older epoch only
    /// count toward the lifetime totals
    epoch: u64,
    next_attempt: Option<Instant>,
    failure_count: u32,
    success_count: u32,
    half_open_in_flight: u32,
    total_requests: u64,
    total_failures: u64,
    total_successes: u64,
    last_failure_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
}

enum Admission {
    Proceed { probe: bool, epoch: u64 },
    Reject(DegradeReason),
}

/// Circuit breaker guarding one named dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl BreakerState {
    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.epoch = self.epoch.wrapping_add(1);
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState::default()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation, answering with the fallback whenever the
    /// operation is skipped or fails.
    pub async fn execute<T, E, F, Fut, FB, FbFut>(&self, operation: F, fallback: FB) -> CallOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = T>,
    {
        let dispatch = match self.admit() {
            Admission::Proceed { probe, epoch } => Dispatch::new(self, probe, epoch),
            Admission::Reject(reason) => {
                debug!(
                    "Circuit breaker '{}': Short-circuiting to fallback ({:?})",
                    self.name, reason
                );
                return CallOutcome::Degraded {
                    value: fallback().await,
                    reason,
                };
            }
        };

        let start_time = Instant::now();

        match operation().await {
            Ok(value) => {
                dispatch.succeed();
                debug!(
                    "Circuit breaker '{}': Success after {:?}",
                    self.name,
                    start_time.elapsed()
                );
                CallOutcome::Primary(value)
            }
            Err(error) => {
                dispatch.fail();
                let message = error.to_string();
                debug!(
                    "Circuit breaker '{}': Failure after {:?} - {}",
                    self.name,
                    start_time.elapsed(),
                    message
                );
                CallOutcome::Degraded {
                    value: fallback().await,
                    reason: DegradeReason::OperationFailed(message),
                }
            }
        }
    }

    /// Execute with a constant fallback value
    pub async fn execute_or<T, E, F, Fut>(&self, operation: F, fallback_value: T) -> CallOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        self.execute(operation, move || async move { fallback_value })
            .await
    }

    /// Fail-fast variant: rejected calls return
    /// [`Error::CircuitBreakerOpen`] and operation errors are returned as-is.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let dispatch = match self.admit() {
            Admission::Proceed { probe, epoch } => Dispatch::new(self, probe, epoch),
            Admission::Reject(_) => {
                return Err(Error::CircuitBreakerOpen {
                    service: self.name.clone(),
                });
            }
        };

        let result = operation().await;
        match &result {
            Ok(_) => dispatch.succeed(),
            Err(error) => {
                dispatch.fail();
                debug!("Circuit breaker '{}': Failure - {}", self.name, error);
            }
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the request and decide whether it may reach the operation
    fn admit(&self) -> Admission {
        let mut inner = self.lock();
        inner.total_requests += 1;

        match inner.state {
            CircuitState::Closed => Admission::Proceed {
                probe: false,
                epoch: inner.epoch,
            },
            CircuitState::Open => {
                let now = Instant::now();
                match inner.next_attempt {
                    Some(next_attempt) if now < next_attempt => {
                        Admission::Reject(DegradeReason::CircuitOpen)
                    }
                    _ => {
                        inner.transition(CircuitState::HalfOpen);
                        inner.success_count = 0;
                        inner.half_open_in_flight = 1;
                        info!(
                            "Circuit breaker '{}': Transitioning from Open to Half-Open",
                            self.name
                        );
                        Admission::Proceed {
                            probe: true,
                            epoch: inner.epoch,
                        }
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    Admission::Proceed {
                        probe: true,
                        epoch: inner.epoch,
                    }
                } else {
                    Admission::Reject(DegradeReason::ProbeInFlight)
                }
            }
        }
    }

    /// Handle successful operation
    fn on_success(&self, probe: bool, epoch: u64) {
        let mut inner = self.lock();
        inner.total_successes += 1;
        inner.last_success_time = Some(Utc::now());
        if epoch != inner.epoch {
            debug!(
                "Circuit breaker '{}': Ignoring success admitted before the last transition",
                self.name
            );
            return;
        }
        if probe {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        match inner.state {
            CircuitState::Closed => {
                // Reset failure count on success
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.transition(CircuitState::Closed);
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.half_open_in_flight = 0;
                    inner.next_attempt = None;
                    info!(
                        "Circuit breaker '{}': Transitioning from Half-Open to Closed",
                        self.name
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Handle failed operation
    fn on_failure(&self, probe: bool, epoch: u64) {
        let mut inner = self.lock();
        inner.total_failures += 1;
        inner.last_failure_time = Some(Utc::now());
        if epoch != inner.epoch {
            debug!(
                "Circuit breaker '{}': Ignoring failure admitted before the last transition",
                self.name
            );
            return;
        }
        inner.failure_count += 1;
        if probe {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.transition(CircuitState::Open);
                    inner.next_attempt = Some(Instant::now() + self.config.recovery_timeout);
                    warn!(
                        "Circuit breaker '{}': Opening due to {} failures",
                        self.name, inner.failure_count
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Return to open state on any failure during half-open
                inner.transition(CircuitState::Open);
                inner.next_attempt = Some(Instant::now() + self.config.recovery_timeout);
                inner.success_count = 0;
                inner.half_open_in_flight = 0;
                warn!(
                    "Circuit breaker '{}': Returning to Open from Half-Open due to failure",
                    self.name
                );
            }
            CircuitState::Open => {}
        }
    }

    /// Get current circuit breaker state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    /// Get circuit breaker stats
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        let state = inner.state;
        let next_attempt_in_ms = match (state, inner.next_attempt) {
            (CircuitState::Open, Some(next_attempt)) => {
                let remaining = next_attempt.saturating_duration_since(Instant::now());
                Some(u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX))
            }
            _ => None,
        };

        CircuitBreakerStats {
            name: self.name.clone(),
            state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_requests: inner.total_requests,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            last_failure_time: inner.last_failure_time,
            last_success_time: inner.last_success_time,
            next_attempt_in_ms,
        }
    }

    /// Reset circuit breaker to closed state; lifetime totals are kept
    pub fn reset(&self) {
        let mut inner = self.lock();

        inner.transition(CircuitState::Closed);
        inner.next_attempt = None;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.half_open_in_flight = 0;

        info!("Circuit breaker '{}': Reset to Closed state", self.name);
    }

    /// Force circuit breaker to open state
    pub fn force_open(&self) {
        let mut inner = self.lock();
        inner.transition(CircuitState::Open);
        inner.next_attempt = Some(Instant::now() + self.config.recovery_timeout);
        inner.success_count = 0;
        inner.half_open_in_flight = 0;

        warn!("Circuit breaker '{}': Forced to Open state", self.name);
    }
}

/// Settles an admitted call exactly once. Dropping it unsettled (the
/// caller's future was cancelled mid-operation) counts as a failure.
struct Dispatch<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    epoch: u64,
    settled: bool,
}

impl<'a> Dispatch<'a> {
    const fn new(breaker: &'a CircuitBreaker, probe: bool, epoch: u64) -> Self {
        Self {
            breaker,
            probe,
            epoch,
            settled: false,
        }
    }

    fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe, self.epoch);
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe, self.epoch);
    }
}

impl Drop for Dispatch<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                "Circuit breaker '{}': Operation cancelled, counting as failure",
                self.breaker.name
            );
            self.breaker.on_failure(self.probe, self.epoch);
        }
    }
}

/// Public stats for circuit breaker
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub next_attempt_in_ms: Option<u64>,
}

impl CircuitBreakerStats {
    /// Check if circuit breaker is healthy
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state == CircuitState::Closed
    }

    /// Get lifetime failure rate as percentage
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.total_failures as f64 / self.total_requests as f64) * 100.0
        }
    }
}
