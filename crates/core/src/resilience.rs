//! Per-collaborator resilience: circuit breaker, retry policy and the
//! resilient call helper that combines them under a request deadline.
//!
//! ```text
//! CLOSED ──[failure threshold]──► OPEN ──[cooldown]──► HALF_OPEN
//!    ▲                                                   │
//!    └──────────────[trial success]──────────────────────┤
//!                                     OPEN ◄──[trial failure]
//! ```
//!
//! Breaker state lives behind a short-lived mutex that is never held across
//! an `.await`.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Calls short-circuit to fallback until the cooldown expires
    Open,
    /// A limited number of trial calls are let through
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,
    /// Time spent open before probing
    pub cooldown: Duration,
    /// Concurrent trial calls allowed while half-open
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
}

/// Point-in-time view of a breaker, used for health reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

/// Circuit breaker guarding one external collaborator
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_in_flight: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Ask permission for one call
    ///
    /// Returns `None` while open. Moves an open breaker to half-open once the
    /// cooldown has elapsed and admits up to `half_open_max_calls` trial calls.
    /// A half-open slot is held by the returned permit until it is resolved
    /// or dropped.
    pub fn try_acquire(&self) -> Option<BreakerPermit<'_>> {
        let mut inner = self.inner.lock();
        let half_open = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let expired = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if !expired {
                    return None;
                }
                tracing::info!(breaker = %self.name, "Circuit breaker half-open, admitting trial calls");
                inner.state = CircuitState::HalfOpen;
                inner.half_open_in_flight = 1;
                true
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight >= self.config.half_open_max_calls {
                    return None;
                }
                inner.half_open_in_flight += 1;
                true
            }
        };
        Some(BreakerPermit {
            breaker: self,
            half_open,
            resolved: false,
        })
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!(breaker = %self.name, "Circuit breaker closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.half_open_in_flight = 0;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            tracing::warn!(
                breaker = %self.name,
                failures = inner.consecutive_failures,
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "Circuit breaker opened"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.half_open_in_flight = 0;
        }
    }

    /// Release a call slot without counting it either way
    ///
    /// Used for failures that say nothing about collaborator health, such as
    /// a content-policy rejection.
    pub fn record_neutral(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Current state, reporting half-open once an open breaker's cooldown expired
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(at)) if at.elapsed() >= self.config.cooldown => {
                CircuitState::HalfOpen
            }
            (state, _) => state,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let consecutive_failures = self.inner.lock().consecutive_failures;
        BreakerSnapshot {
            name: self.name.clone(),
            state: self.state(),
            consecutive_failures,
        }
    }
}

/// One admitted call
///
/// Dropping an unresolved permit gives a half-open slot back without
/// counting the call, so a cancelled call cannot leave the breaker stuck.
#[must_use = "an unresolved permit is released as neutral when dropped"]
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    half_open: bool,
    resolved: bool,
}

impl BreakerPermit<'_> {
    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.record_failure();
    }

    pub fn neutral(mut self) {
        self.resolved = true;
        self.breaker.record_neutral();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.resolved || !self.half_open {
            return;
        }
        tracing::debug!(breaker = %self.breaker.name, "Abandoned call released its half-open slot");
        self.breaker.record_neutral();
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry, doubled on every further retry
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Whether a per-call timeout is worth retrying
    pub retry_on_timeout: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            retry_on_timeout: false,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Classification implemented by collaborator errors
pub trait RetryableError {
    /// Transient failure worth another attempt
    fn is_retryable(&self) -> bool;

    /// Whether the failure counts towards opening the breaker
    fn trips_breaker(&self) -> bool {
        true
    }
}

/// Outcome of a failed resilient call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError<E> {
    #[error("circuit breaker open")]
    CircuitOpen,

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("call timed out after {attempts} attempt(s)")]
    TimedOut { attempts: u32 },

    #[error("call failed after {attempts} attempt(s): {error}")]
    Failed { error: E, attempts: u32 },
}

impl<E> CallError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            CallError::CircuitOpen | CallError::DeadlineExceeded => 0,
            CallError::TimedOut { attempts } | CallError::Failed { attempts, .. } => *attempts,
        }
    }
}

/// One collaborator call guarded by a breaker, a retry policy, a per-call
/// timeout and the request deadline
#[derive(Debug, Clone, Copy)]
pub struct ResilientCall<'a> {
    pub breaker: &'a CircuitBreaker,
    pub policy: &'a RetryPolicy,
    pub call_timeout: Duration,
    pub deadline: Instant,
}

impl<'a> ResilientCall<'a> {
    pub fn new(
        breaker: &'a CircuitBreaker,
        policy: &'a RetryPolicy,
        call_timeout: Duration,
        deadline: Instant,
    ) -> Self {
        Self {
            breaker,
            policy,
            call_timeout,
            deadline,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of budget
    ///
    /// Each attempt is bounded by the smaller of the per-call timeout and the
    /// time left before the deadline. A retry is skipped when its backoff
    /// would end past the deadline.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            let now = Instant::now();
            if now >= self.deadline {
                return Err(CallError::DeadlineExceeded);
            }
            let Some(permit) = self.breaker.try_acquire() else {
                return Err(CallError::CircuitOpen);
            };
            attempt += 1;

            let budget = self
                .call_timeout
                .min(self.deadline.saturating_duration_since(now));
            let (failure, retryable) = match tokio::time::timeout(budget, op()).await {
                Ok(Ok(value)) => {
                    permit.success();
                    return Ok(value);
                }
                Ok(Err(error)) => {
                    if error.trips_breaker() {
                        permit.failure();
                    } else {
                        permit.neutral();
                    }
                    tracing::debug!(
                        breaker = %self.breaker.name(),
                        attempt,
                        error = %error,
                        "Collaborator call failed"
                    );
                    let retryable = error.is_retryable();
                    (CallError::Failed { error, attempts: attempt }, retryable)
                }
                Err(_) => {
                    permit.failure();
                    tracing::debug!(
                        breaker = %self.breaker.name(),
                        attempt,
                        timeout_ms = budget.as_millis() as u64,
                        "Collaborator call timed out"
                    );
                    (
                        CallError::TimedOut { attempts: attempt },
                        self.policy.retry_on_timeout,
                    )
                }
            };

            if !retryable || attempt > self.policy.max_retries {
                return Err(failure);
            }
            let delay = self.policy.delay_for_retry(attempt - 1);
            if Instant::now() + delay >= self.deadline {
                return Err(failure);
            }
            tracing::debug!(
                breaker = %self.breaker.name(),
                attempt,
                backoff_ms = delay.as_millis() as u64,
                "Retrying collaborator call"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
