//! Three-state circuit breaker: Closed → Open → Half-Open.
//!
//! State transitions:
//! - `Closed` → `Open`: the trip policy fires on the rolling counts
//! - `Open` → `HalfOpen`: `open_timeout` has elapsed (observed on next access)
//! - `HalfOpen` → `Closed`: `max_half_open_requests` consecutive probe successes
//! - `HalfOpen` → `Open`: any probe failure, restarting the open timeout
//!
//! Every transition starts a new *generation* and clears the counts. Outcomes
//! reported for calls admitted in an earlier generation are discarded, so a
//! slow call from before a trip can never close or re-trip the breaker.
//!
//! Admission and outcome recording run under the same mutex, which makes the
//! half-open probe budget exact: the check-and-increment of in-flight probes is
//! a single critical section. The lock is never held while the protected call
//! runs.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::clock::{ClockSource, MonotonicClock};
use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// State and counts
// ---------------------------------------------------------------------------

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// All calls rejected until the open timeout elapses.
    Open,
    /// A limited number of probe calls test whether the dependency recovered.
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome statistics for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_success(&mut self) {
        self.requests = self.requests.saturating_add(1);
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.requests = self.requests.saturating_add(1);
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    /// Fraction of recorded requests that failed; zero when nothing was recorded.
    #[must_use]
    pub fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        f64::from(self.total_failures) / f64::from(self.requests)
    }
}

/// Outcome of an admitted call as seen by the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// The call says nothing about the dependency's health. Counts are left
    /// untouched; a half-open probe slot is released.
    Ignored,
}

// ---------------------------------------------------------------------------
// Trip policies
// ---------------------------------------------------------------------------

/// Predicate deciding whether a closed breaker should open.
///
/// Evaluated after every outcome recorded while `Closed`.
pub trait ReadyToTrip: Send + Sync {
    fn ready_to_trip(&self, counts: &Counts) -> bool;
}

impl<F> ReadyToTrip for F
where
    F: Fn(&Counts) -> bool + Send + Sync,
{
    fn ready_to_trip(&self, counts: &Counts) -> bool {
        self(counts)
    }
}

/// Trips once at least `min_samples` outcomes were recorded and the failure
/// ratio reaches `threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailureRatio {
    threshold: f64,
    min_samples: u32,
}

impl FailureRatio {
    /// # Errors
    ///
    /// Returns `ConfigError` when `threshold` is outside `(0, 1]` or
    /// `min_samples` is zero.
    pub fn new(threshold: f64, min_samples: u32) -> Result<Self, ConfigError> {
        if !(threshold.is_finite() && threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::FailureRatio(threshold));
        }
        if min_samples == 0 {
            return Err(ConfigError::ZeroMinSamples);
        }
        Ok(Self {
            threshold,
            min_samples,
        })
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    #[must_use]
    pub fn min_samples(&self) -> u32 {
        self.min_samples
    }
}

impl ReadyToTrip for FailureRatio {
    fn ready_to_trip(&self, counts: &Counts) -> bool {
        counts.requests >= self.min_samples && counts.failure_ratio() >= self.threshold
    }
}

/// Trips after `n` consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsecutiveFailures(u32);

impl ConsecutiveFailures {
    /// # Errors
    ///
    /// Returns `ConfigError::ZeroConsecutiveFailures` when `n` is zero.
    pub fn new(n: u32) -> Result<Self, ConfigError> {
        if n == 0 {
            return Err(ConfigError::ZeroConsecutiveFailures);
        }
        Ok(Self(n))
    }
}

impl ReadyToTrip for ConsecutiveFailures {
    fn ready_to_trip(&self, counts: &Counts) -> bool {
        counts.consecutive_failures >= self.0
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Circuit breaker settings as they appear in configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BreakerSettings {
    /// Name used in logs, errors and state-change notifications.
    pub name: String,
    /// Failure ratio at which the default policy trips, in `(0, 1]`.
    pub failure_ratio: f64,
    /// Minimum recorded outcomes before the ratio is considered.
    pub min_samples: u32,
    /// Time spent `Open` before probing, in milliseconds.
    pub open_timeout_ms: u64,
    /// Concurrent probe budget while `HalfOpen`, and the number of consecutive
    /// probe successes required to close.
    pub max_half_open_requests: u32,
    /// Optional rolling window: closed-state counts are cleared this often.
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

impl BreakerSettings {
    #[must_use]
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        self.interval_ms.map(Duration::from_millis)
    }

    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FailureRatio::new(self.failure_ratio, self.min_samples)?;
        if self.open_timeout_ms == 0 {
            return Err(ConfigError::ZeroOpenTimeout);
        }
        if self.max_half_open_requests == 0 {
            return Err(ConfigError::ZeroHalfOpenRequests);
        }
        if self.interval_ms == Some(0) {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The breaker refused to admit a call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("circuit breaker '{name}' is open")]
    Open { name: String, retry_after: Duration },
    #[error("circuit breaker '{name}' is half-open and its probe budget is exhausted")]
    ProbeBudgetExhausted { name: String },
}

impl Rejection {
    #[must_use]
    pub fn breaker_name(&self) -> &str {
        match self {
            Self::Open { name, .. } | Self::ProbeBudgetExhausted { name } => name,
        }
    }
}

/// Result error of [`CircuitBreaker::execute`].
///
/// Keeps "the breaker rejected the call" apart from "the call itself failed"
/// so retry logic never conflates the two.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error(transparent)]
    Open(#[from] Rejection),
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    /// Returns the callable's own error, if that is what this is.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Open(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

type StateChangeHook = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

type Transition = (CircuitState, CircuitState);

struct Inner {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    probes_in_flight: u32,
    /// Closed: next rolling-window reset. Open: end of the open timeout.
    expiry_ms: Option<u64>,
}

struct Shared {
    name: String,
    max_half_open_requests: u32,
    open_timeout_ms: u64,
    interval_ms: Option<u64>,
    ready_to_trip: Box<dyn ReadyToTrip>,
    on_state_change: Option<StateChangeHook>,
    clock: Arc<dyn ClockSource>,
    inner: Mutex<Inner>,
}

impl Shared {
    /// Applies time-driven changes (window rollover, open timeout expiry) and
    /// returns the resulting state.
    fn current_state(
        &self,
        inner: &mut Inner,
        now: u64,
        transitions: &mut Vec<Transition>,
    ) -> CircuitState {
        match inner.state {
            CircuitState::Closed => {
                if inner.expiry_ms.is_some_and(|expiry| expiry <= now) {
                    self.new_generation(inner, now);
                }
            }
            CircuitState::Open => {
                if inner.expiry_ms.is_some_and(|expiry| expiry <= now) {
                    self.set_state(inner, CircuitState::HalfOpen, now, transitions);
                }
            }
            CircuitState::HalfOpen => {}
        }
        inner.state
    }

    fn set_state(
        &self,
        inner: &mut Inner,
        to: CircuitState,
        now: u64,
        transitions: &mut Vec<Transition>,
    ) {
        if inner.state == to {
            return;
        }
        let from = inner.state;
        inner.state = to;
        self.new_generation(inner, now);
        transitions.push((from, to));
    }

    fn new_generation(&self, inner: &mut Inner, now: u64) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts.clear();
        inner.probes_in_flight = 0;
        inner.expiry_ms = match inner.state {
            CircuitState::Closed => self.interval_ms.map(|i| now.saturating_add(i)),
            CircuitState::Open => Some(now.saturating_add(self.open_timeout_ms)),
            CircuitState::HalfOpen => None,
        };
    }

    fn record(&self, generation: u64, outcome: Outcome) {
        let now = self.clock.now();
        let mut transitions = Vec::new();
        {
            let mut inner = self.inner.lock();
            let state = self.current_state(&mut inner, now, &mut transitions);
            if generation == inner.generation {
                self.apply_outcome(&mut inner, state, outcome, now, &mut transitions);
            }
        }
        self.notify(&transitions);
    }

    fn apply_outcome(
        &self,
        inner: &mut Inner,
        state: CircuitState,
        outcome: Outcome,
        now: u64,
        transitions: &mut Vec<Transition>,
    ) {
        match (state, outcome) {
            (CircuitState::HalfOpen, Outcome::Ignored) => {
                inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
            }
            (CircuitState::Closed, Outcome::Success) => {
                inner.counts.on_success();
                if self.ready_to_trip.ready_to_trip(&inner.counts) {
                    self.set_state(inner, CircuitState::Open, now, transitions);
                }
            }
            (CircuitState::Closed, Outcome::Failure) => {
                inner.counts.on_failure();
                if self.ready_to_trip.ready_to_trip(&inner.counts) {
                    self.set_state(inner, CircuitState::Open, now, transitions);
                }
            }
            (CircuitState::HalfOpen, Outcome::Success) => {
                inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.max_half_open_requests {
                    self.set_state(inner, CircuitState::Closed, now, transitions);
                }
            }
            (CircuitState::HalfOpen, Outcome::Failure) => {
                inner.counts.on_failure();
                self.set_state(inner, CircuitState::Open, now, transitions);
            }
            // Nothing is admitted while open, so no current-generation outcome
            // can arrive here.
            (CircuitState::Closed, Outcome::Ignored) | (CircuitState::Open, _) => {}
        }
    }

    fn notify(&self, transitions: &[Transition]) {
        for &(from, to) in transitions {
            if to == CircuitState::Open {
                tracing::warn!(breaker = %self.name, %from, %to, "circuit breaker state change");
            } else {
                tracing::info!(breaker = %self.name, %from, %to, "circuit breaker state change");
            }
            if let Some(hook) = &self.on_state_change {
                hook(&self.name, from, to);
            }
        }
    }
}

/// Thread-safe circuit breaker. Cloning shares the same state.
#[derive(Clone)]
pub struct CircuitBreaker {
    shared: Arc<Shared>,
}

impl CircuitBreaker {
    /// Creates a breaker using the default [`FailureRatio`] policy.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any setting is invalid.
    pub fn new(settings: &BreakerSettings) -> Result<Self, ConfigError> {
        Self::builder(settings).build()
    }

    #[must_use]
    pub fn builder(settings: &BreakerSettings) -> BreakerBuilder {
        BreakerBuilder {
            settings: settings.clone(),
            ready_to_trip: None,
            on_state_change: None,
            clock: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current state, applying any elapsed open timeout first.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.observe(|state, _| state)
    }

    /// Counts of the current generation.
    #[must_use]
    pub fn counts(&self) -> Counts {
        self.observe(|_, inner| inner.counts)
    }

    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = self.shared.clock.now();
        self.observe(|state, inner| BreakerSnapshot {
            name: self.shared.name.clone(),
            state,
            counts: inner.counts,
            probes_in_flight: inner.probes_in_flight,
            open_remaining: match state {
                CircuitState::Open => inner
                    .expiry_ms
                    .map(|expiry| Duration::from_millis(expiry.saturating_sub(now))),
                _ => None,
            },
        })
    }

    /// Asks for permission to run one call.
    ///
    /// The returned permit must be settled with [`CallPermit::record`]; a
    /// permit dropped unsettled (panic, cancelled future) records a failure.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] when the breaker is open or the half-open probe
    /// budget is exhausted.
    pub fn admit(&self) -> Result<CallPermit, Rejection> {
        let now = self.shared.clock.now();
        let mut transitions = Vec::new();
        let result = {
            let mut inner = self.shared.inner.lock();
            match self.shared.current_state(&mut inner, now, &mut transitions) {
                CircuitState::Open => {
                    let remaining = inner
                        .expiry_ms
                        .map_or(0, |expiry| expiry.saturating_sub(now));
                    Err(Rejection::Open {
                        name: self.shared.name.clone(),
                        retry_after: Duration::from_millis(remaining),
                    })
                }
                CircuitState::HalfOpen
                    if inner.probes_in_flight >= self.shared.max_half_open_requests =>
                {
                    Err(Rejection::ProbeBudgetExhausted {
                        name: self.shared.name.clone(),
                    })
                }
                state => {
                    if state == CircuitState::HalfOpen {
                        inner.probes_in_flight += 1;
                    }
                    Ok(CallPermit {
                        shared: Arc::clone(&self.shared),
                        generation: inner.generation,
                        settled: false,
                    })
                }
            }
        };
        self.shared.notify(&transitions);
        result
    }

    /// Runs `f` through the breaker.
    ///
    /// `f` is invoked at most once, synchronously. Its error is returned as
    /// [`BreakerError::Inner`] unchanged and counted as a failure.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Open`] without running `f` when the breaker
    /// rejects the call, or [`BreakerError::Inner`] when `f` fails.
    pub fn execute<T, E, F>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.admit()?;
        let result = f();
        permit.record(if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        });
        result.map_err(BreakerError::Inner)
    }

    fn observe<R>(&self, f: impl FnOnce(CircuitState, &Inner) -> R) -> R {
        let now = self.shared.clock.now();
        let mut transitions = Vec::new();
        let result = {
            let mut inner = self.shared.inner.lock();
            let state = self.shared.current_state(&mut inner, now, &mut transitions);
            f(state, &inner)
        };
        self.shared.notify(&transitions);
        result
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub counts: Counts,
    pub probes_in_flight: u32,
    /// Time left before probing resumes, if currently open.
    pub open_remaining: Option<Duration>,
}

// ---------------------------------------------------------------------------
// CallPermit
// ---------------------------------------------------------------------------

/// Admission ticket for one call.
#[must_use = "an unsettled permit records a failure when dropped"]
pub struct CallPermit {
    shared: Arc<Shared>,
    generation: u64,
    settled: bool,
}

impl CallPermit {
    pub fn record(mut self, outcome: Outcome) {
        self.settled = true;
        self.shared.record(self.generation, outcome);
    }

    pub fn success(self) {
        self.record(Outcome::Success);
    }

    pub fn failure(self) {
        self.record(Outcome::Failure);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.shared.record(self.generation, Outcome::Failure);
        }
    }
}

impl fmt::Debug for CallPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("breaker", &self.shared.name)
            .field("generation", &self.generation)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// BreakerBuilder
// ---------------------------------------------------------------------------

/// Builder for breakers that need a custom trip policy, hook or clock.
pub struct BreakerBuilder {
    settings: BreakerSettings,
    ready_to_trip: Option<Box<dyn ReadyToTrip>>,
    on_state_change: Option<StateChangeHook>,
    clock: Option<Arc<dyn ClockSource>>,
}

impl BreakerBuilder {
    /// Replaces the default [`FailureRatio`] policy.
    #[must_use]
    pub fn ready_to_trip(mut self, policy: impl ReadyToTrip + 'static) -> Self {
        self.ready_to_trip = Some(Box::new(policy));
        self
    }

    /// Registers a callback invoked with `(name, from, to)` after every
    /// transition. Called outside the breaker's lock.
    #[must_use]
    pub fn on_state_change(
        mut self,
        hook: impl Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    ) -> Self {
        self.on_state_change = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// # Errors
    ///
    /// Returns `ConfigError` if any setting is invalid.
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        let settings = self.settings;
        settings.validate()?;

        let ready_to_trip = match self.ready_to_trip {
            Some(policy) => policy,
            None => Box::new(FailureRatio::new(
                settings.failure_ratio,
                settings.min_samples,
            )?),
        };
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let now = clock.now();

        Ok(CircuitBreaker {
            shared: Arc::new(Shared {
                name: settings.name,
                max_half_open_requests: settings.max_half_open_requests,
                open_timeout_ms: settings.open_timeout_ms,
                interval_ms: settings.interval_ms,
                ready_to_trip,
                on_state_change: self.on_state_change,
                clock,
                inner: Mutex::new(Inner {
                    state: CircuitState::Closed,
                    generation: 0,
                    counts: Counts::default(),
                    probes_in_flight: 0,
                    expiry_ms: settings.interval_ms.map(|i| now.saturating_add(i)),
                }),
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
