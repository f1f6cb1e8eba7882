//! Circuit breaker guarding a datasource.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────┐  failure_threshold   ┌─────────┐
//! │ Closed  │ ───────────────────► │  Open   │
//! └────▲────┘  unacceptable calls  └────┬────┘
//!      │                                │ open_timeout
//!      │ success_threshold              ▼
//!      │ accepted probes          ┌──────────┐
//!      └───────────────────────── │ HalfOpen │ ── failed probe ──► Open
//!                                 └──────────┘
//! ```
//!
//! Only one probe is in flight while half-open. A probe that never reports
//! back is replaced once it is older than `open_timeout`.

use crate::config::{DEFAULT_FAILURE_THRESHOLD, DEFAULT_OPEN_TIMEOUT_SECS, DEFAULT_SUCCESS_THRESHOLD};
use crate::error::{DbError, DbResult};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "Closed"),
            BreakerState::Open => write!(f, "Open"),
            BreakerState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Ticket handed out by [`Breaker::allow`] and returned with the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    probe: bool,
}

impl Admission {
    /// A call admitted while the breaker is closed.
    pub fn normal() -> Self {
        Self { probe: false }
    }

    /// The single recovery probe admitted while half-open.
    pub fn probe() -> Self {
        Self { probe: true }
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

/// Admission control shared by every operation of a façade.
///
/// Implementations must be safe to call concurrently. The window between
/// `allow` and `record` is not atomic.
pub trait Breaker: Send + Sync {
    /// Name used in logs and in `BreakerOpen` errors.
    fn name(&self) -> &str;

    /// Admit a call, or fail fast with [`DbError::BreakerOpen`].
    fn allow(&self) -> DbResult<Admission>;

    /// Report whether an admitted call's outcome was acceptable.
    fn record(&self, admission: Admission, accepted: bool);

    fn state(&self) -> BreakerState;
}

/// Thresholds for [`CircuitBreaker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive unacceptable outcomes that open the circuit
    pub failure_threshold: u32,
    /// Accepted probes needed to close it again
    pub success_threshold: u32,
    /// How long the circuit stays open before probing
    pub open_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            open_timeout: Duration::from_secs(DEFAULT_OPEN_TIMEOUT_SECS),
        }
    }
}

impl BreakerConfig {
    /// Replace zero thresholds with the defaults.
    fn sanitized(mut self, name: &str) -> Self {
        if self.failure_threshold == 0 {
            warn!(
                breaker = %name,
                "Invalid failure_threshold=0, using default={}", DEFAULT_FAILURE_THRESHOLD
            );
            self.failure_threshold = DEFAULT_FAILURE_THRESHOLD;
        }
        if self.success_threshold == 0 {
            warn!(
                breaker = %name,
                "Invalid success_threshold=0, using default={}", DEFAULT_SUCCESS_THRESHOLD
            );
            self.success_threshold = DEFAULT_SUCCESS_THRESHOLD;
        }
        self
    }
}

/// Point-in-time view of a [`CircuitBreaker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected: u64,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    /// Start of the in-flight half-open probe
    probe_started: Option<Instant>,
}

/// Consecutive-failure circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    rejected: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let name = name.into();
        let config = config.sanitized(&name);
        debug!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            open_timeout_ms = config.open_timeout.as_millis() as u64,
            "Initialized circuit breaker"
        );
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                probe_started: None,
            }),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Breaker with the default policy.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, BreakerConfig::default())
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    // Counters stay consistent even if a holder panicked
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reject(&self) -> DbError {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        DbError::breaker_open(&self.name)
    }

    fn open(&self, inner: &mut Inner) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.probe_started = None;
        inner.consecutive_successes = 0;
    }
}

impl Breaker for CircuitBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn allow(&self) -> DbResult<Admission> {
        let mut inner = self.lock();
        let admission = match inner.state {
            BreakerState::Closed => Admission::normal(),
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed < self.config.open_timeout {
                    debug!(
                        breaker = %self.name,
                        time_since_open_ms = elapsed.as_millis() as u64,
                        "Circuit breaker is open, rejecting call"
                    );
                    return Err(self.reject());
                }
                inner.state = BreakerState::HalfOpen;
                inner.probe_started = Some(Instant::now());
                info!(
                    breaker = %self.name,
                    "Circuit breaker transition: Open → HalfOpen, admitting probe"
                );
                Admission::probe()
            }
            BreakerState::HalfOpen => match inner.probe_started {
                Some(started) if started.elapsed() < self.config.open_timeout => {
                    debug!(breaker = %self.name, "Half-open probe already in flight, rejecting call");
                    return Err(self.reject());
                }
                Some(_) => {
                    warn!(breaker = %self.name, "Half-open probe never reported back, admitting a new one");
                    inner.probe_started = Some(Instant::now());
                    Admission::probe()
                }
                None => {
                    inner.probe_started = Some(Instant::now());
                    Admission::probe()
                }
            },
        };
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        Ok(admission)
    }

    fn record(&self, admission: Admission, accepted: bool) {
        let mut inner = self.lock();
        if !accepted {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
        }

        match (inner.state, admission.is_probe(), accepted) {
            (BreakerState::Closed, _, true) => inner.consecutive_failures = 0,
            (BreakerState::Closed, _, false) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner);
                    error!(
                        breaker = %self.name,
                        consecutive_failures = inner.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker transition: Closed → Open"
                    );
                } else {
                    debug!(
                        breaker = %self.name,
                        consecutive_failures = inner.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "Unacceptable outcome, circuit breaker remains closed"
                    );
                }
            }
            (BreakerState::HalfOpen, true, true) => {
                inner.probe_started = None;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                    info!(
                        breaker = %self.name,
                        "Half-open probe succeeded, circuit breaker transition: HalfOpen → Closed"
                    );
                }
            }
            (BreakerState::HalfOpen, true, false) => {
                self.open(&mut inner);
                warn!(
                    breaker = %self.name,
                    "Half-open probe failed, circuit breaker transition: HalfOpen → Open"
                );
            }
            // Late outcomes of calls admitted before the circuit opened
            _ => {}
        }
    }

    fn state(&self) -> BreakerState {
        self.lock().state
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}
