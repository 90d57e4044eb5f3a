//! Circuit breaker implementation
//!
//! A process-local gate that stops calling a failing dependency. After
//! `failure_threshold` consecutive failures the circuit opens and every call
//! is rejected without touching the dependency. Once `cooldown` has elapsed,
//! the next caller becomes a single recovery probe (half-open); its success
//! closes the circuit, its failure re-opens it with a fresh cooldown.
//!
//! One breaker instance guards one logical dependency and is shared across
//! all concurrent callers; see [`crate::CircuitBreakerRegistry`].

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

// ============================================================================
// States and Configuration
// ============================================================================

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,

    /// Failure threshold exceeded - all calls rejected
    Open,

    /// Testing if the dependency recovered - a single probe call allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
///
/// # State Machine
///
/// ```text
/// ┌─────────┐  failure threshold  ┌─────────┐  cooldown elapsed  ┌──────────┐
/// │ Closed  │ ─────────────────► │  Open   │ ─────────────────► │ HalfOpen │
/// └─────────┘                     └─────────┘                    └──────────┘
///      ▲                               ▲                              │
///      │        probe succeeds         │        probe fails           │
///      └───────────────────────────────┴──────────────────────────────┘
/// ```
///
/// # Example
///
/// ```
/// use opsloop_reliability::CircuitBreakerConfig;
/// use std::time::Duration;
///
/// let config = CircuitBreakerConfig::default()
///     .with_failure_threshold(3)
///     .with_cooldown(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit
    pub failure_threshold: u32,

    /// Time the circuit stays open before allowing a recovery probe
    #[serde(with = "duration_millis")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the consecutive-failure threshold that opens the circuit
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the cooldown (time before a recovery probe after opening)
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Rejection raised instantly while the circuit is open; the guarded call was
/// never attempted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("circuit breaker '{name}' is open, retry in {remaining_ms}ms")]
pub struct CircuitOpenError {
    /// Name of the breaker that rejected the call
    pub name: String,
    /// Milliseconds until the next recovery probe is allowed
    pub remaining_ms: u64,
}

/// Error returned by [`CircuitBreaker::execute`]
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The circuit rejected the call without attempting it. Not counted as a
    /// new failure against the breaker.
    #[error(transparent)]
    Open(#[from] CircuitOpenError),

    /// The wrapped operation ran and failed; the failure was recorded.
    #[error("{0}")]
    Operation(E),
}

// ============================================================================
// Circuit Breaker
// ============================================================================

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_open_log: Option<Instant>,
    trial_in_flight: bool,
    rejected_calls: u64,
    open_log_count: u64,
}

/// Snapshot of a breaker's internal counters, for introspection and tests
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Calls rejected without being attempted
    pub rejected_calls: u64,
    /// Times the "circuit open, rejecting call" line was emitted
    pub open_log_count: u64,
    /// How long ago the circuit opened, if it is currently open
    pub opened_ago: Option<Duration>,
}

/// A failure-counting gate around an asynchronous operation.
///
/// All transitions happen under a single mutex, never held across an await,
/// so concurrent callers observe atomic state changes. The "circuit open"
/// rejection is logged at most once per open period regardless of how many
/// callers pile up against it.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker guarding the dependency identified by `name`
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                last_open_log: None,
                trial_in_flight: false,
                rejected_calls: 0,
                open_log_count: 0,
            }),
        }
    }

    /// Name of the guarded dependency
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The breaker's configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `op` through the breaker.
    ///
    /// Either rejects instantly with [`CircuitBreakerError::Open`], or runs
    /// the operation and records its outcome. Every `Err` the operation
    /// returns counts as a failure, whatever its type.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire()?;
        match op().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(err) => {
                permit.failure();
                Err(CircuitBreakerError::Operation(err))
            }
        }
    }

    /// Ask for permission to call the dependency.
    ///
    /// On success the returned permit must be resolved with
    /// [`CircuitPermit::success`] or [`CircuitPermit::failure`]. A permit
    /// dropped unresolved during a recovery probe re-opens the circuit.
    pub fn try_acquire(&self) -> Result<CircuitPermit<'_>, CircuitOpenError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(CircuitPermit::new(self, false)),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.cooldown {
                    // Cooldown over; this caller becomes the recovery probe
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!(breaker = %self.name, "circuit half-open, probing dependency");
                    Ok(CircuitPermit::new(self, true))
                } else {
                    let remaining = self.config.cooldown - elapsed;
                    inner.rejected_calls += 1;
                    self.log_open_once(&mut inner, remaining);
                    Err(CircuitOpenError {
                        name: self.name.clone(),
                        remaining_ms: remaining.as_millis() as u64,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.rejected_calls += 1;
                    Err(CircuitOpenError {
                        name: self.name.clone(),
                        remaining_ms: 0,
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(CircuitPermit::new(self, true))
                }
            }
        }
    }

    /// Whether a call would currently be allowed. Read-only, no transition.
    pub fn can_execute(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner
                .opened_at
                .map(|at| at.elapsed() >= self.config.cooldown)
                .unwrap_or(false),
            CircuitState::HalfOpen => !inner.trial_in_flight,
        }
    }

    /// Time until the next recovery probe is allowed; zero unless the circuit
    /// is open and cooling down.
    pub fn remaining_cooldown(&self) -> Duration {
        let inner = self.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(at)) => self.config.cooldown.saturating_sub(at.elapsed()),
            _ => Duration::ZERO,
        }
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Snapshot of the breaker's counters
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            rejected_calls: inner.rejected_calls,
            open_log_count: inner.open_log_count,
            opened_ago: inner.opened_at.map(|at| at.elapsed()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // A poisoned lock means a panic mid-transition; the state itself is
        // still a valid enum value, so carry on with it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Emit the "circuit open" warning at most once per open period.
    ///
    /// Many concurrent callers hit an open circuit at once; logging every
    /// rejection would multiply one upstream failure into thousands of
    /// duplicate lines. `last_open_log` is compared against `opened_at` so
    /// exactly the first rejection of each open period logs.
    fn log_open_once(&self, inner: &mut BreakerInner, remaining: Duration) {
        let Some(opened_at) = inner.opened_at else {
            return;
        };
        let already_logged = matches!(inner.last_open_log, Some(at) if at >= opened_at);
        if !already_logged {
            inner.last_open_log = Some(Instant::now());
            inner.open_log_count += 1;
            warn!(
                breaker = %self.name,
                remaining_ms = remaining.as_millis() as u64,
                "circuit open, rejecting call"
            );
        }
    }

    fn record_success(&self, is_trial: bool) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        if is_trial {
            inner.state = CircuitState::Closed;
            inner.trial_in_flight = false;
            inner.opened_at = None;
            info!(breaker = %self.name, "recovery probe succeeded, circuit closed");
        }
    }

    fn record_failure(&self, is_trial: bool) {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        if is_trial {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.trial_in_flight = false;
            warn!(breaker = %self.name, "recovery probe failed, circuit re-opened");
            return;
        }
        if inner.state == CircuitState::Closed
            && inner.consecutive_failures >= self.config.failure_threshold
        {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(
                breaker = %self.name,
                failures = inner.consecutive_failures,
                "failure threshold reached, circuit opened"
            );
        }
    }

    fn abandon_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial_in_flight {
            // Keep the original opened_at so the next caller may probe
            // immediately instead of waiting out a fresh cooldown.
            inner.state = CircuitState::Open;
            inner.trial_in_flight = false;
            warn!(breaker = %self.name, "recovery probe abandoned, circuit re-opened");
        }
    }
}

// ============================================================================
// Permit
// ============================================================================

/// Permission to make one guarded call; report the outcome through it.
#[must_use = "resolve the permit with success() or failure()"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    is_trial: bool,
    resolved: bool,
}

impl<'a> CircuitPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, is_trial: bool) -> Self {
        Self {
            breaker,
            is_trial,
            resolved: false,
        }
    }

    /// Whether this permit is the single half-open recovery probe
    pub fn is_trial(&self) -> bool {
        self.is_trial
    }

    /// Report that the guarded call succeeded
    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.record_success(self.is_trial);
    }

    /// Report that the guarded call failed
    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.record_failure(self.is_trial);
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.is_trial {
            self.breaker.abandon_trial();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
