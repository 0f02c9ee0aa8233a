//! Per-service circuit breaker.
//!
//! A breaker is a three-state machine (Closed, Open, HalfOpen) behind one
//! `parking_lot::Mutex`. The lock is held only to read or flip the state and is never
//! held across an `.await`.
//!
//! Callers obtain a [`BreakerPermit`] before contacting the backend and settle it with
//! the outcome. A HalfOpen probe permit that is dropped unsettled (for example because
//! the surrounding future was cancelled by a timeout) counts as a failed probe, so the
//! breaker cannot get stuck in HalfOpen.

use gateway_core::{GatewayError, GatewayResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected without reaching the backend
    Open,
    /// One probe call is in flight
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding for gauges: 0 closed, 1 open, 2 half-open
    #[must_use]
    pub fn as_gauge(self) -> i64 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Breaker thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time the circuit stays open before a probe is admitted
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    /// Service the breaker protects
    pub service: String,
    /// Current state
    pub state: CircuitState,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Milliseconds since the circuit last opened
    pub open_for_ms: Option<u64>,
}

/// Circuit breaker for one backend service
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    #[must_use]
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service: service.into(),
            config: CircuitBreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                ..config
            },
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Service name
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Thresholds in effect
    #[must_use]
    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Snapshot for diagnostics
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            service: self.service.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            open_for_ms: inner
                .opened_at
                .map(|at| u64::try_from(at.elapsed().as_millis()).unwrap_or(u64::MAX)),
        }
    }

    /// Ask for permission to call the backend
    ///
    /// # Errors
    /// Returns `BackendUnavailable` with `circuit_open` set while the circuit is open or
    /// a probe is already in flight
    pub fn acquire(self: &Arc<Self>) -> GatewayResult<BreakerPermit> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(BreakerPermit::new(Arc::clone(self), false)),
            CircuitState::HalfOpen => {
                debug!(service = %self.service, "Probe in flight, rejecting call");
                Err(GatewayError::circuit_open(&self.service))
            }
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.config.open_duration);
                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    info!(service = %self.service, state = %CircuitState::HalfOpen, "Admitting circuit probe");
                    Ok(BreakerPermit::new(Arc::clone(self), true))
                } else {
                    Err(GatewayError::circuit_open(&self.service))
                }
            }
        }
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.inner.lock();
        if probe {
            inner.state = CircuitState::Closed;
            inner.consecutive_failures = 0;
            inner.opened_at = None;
            info!(service = %self.service, state = %CircuitState::Closed, "Circuit closed after successful probe");
        } else if inner.state == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.inner.lock();
        if probe {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(service = %self.service, state = %CircuitState::Open, "Circuit probe failed, reopening");
            return;
        }
        if inner.state != CircuitState::Closed {
            return;
        }
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        if inner.consecutive_failures >= self.config.failure_threshold {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(
                service = %self.service,
                state = %CircuitState::Open,
                consecutive_failures = inner.consecutive_failures,
                threshold = self.config.failure_threshold,
                "Circuit opened"
            );
        }
    }

    /// A probe that ended without a verdict hands the slot back to the next caller
    fn on_release(&self, probe: bool) {
        if !probe {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
        }
    }
}

/// Permission to make one guarded call
#[derive(Debug)]
#[must_use = "a permit must be settled with the call outcome"]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    settled: bool,
}

impl BreakerPermit {
    fn new(breaker: Arc<CircuitBreaker>, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    /// Whether this permit is the HalfOpen probe
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Record a healthy outcome
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    /// Record a failure
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }

    /// Give the permit back without a verdict
    pub fn release(mut self) {
        self.settled = true;
        self.breaker.on_release(self.probe);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.on_failure(true);
        }
    }
}
