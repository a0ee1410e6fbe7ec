//! Per-service circuit breaker.
//!
//! # States
//! - Closed: normal operation, calls pass and are recorded
//! - Open: backend assumed down, calls fail fast
//! - Half-Open: a limited number of trial calls decide the next state
//! - Disabled / Forced-Open: administrative overrides (always allow /
//!   always reject), nothing is recorded
//!
//! # State Transitions
//! ```text
//! Closed → Open: calls in window >= minimum and
//!                (failure rate >= threshold or slow rate >= threshold)
//! Open → Half-Open: after the open wait duration
//! Half-Open → Closed: all trial calls done, both rates below threshold
//! Half-Open → Open: all trial calls done, either rate at/above threshold
//! ```
//!
//! # Design Decisions
//! - Time-based sliding window of one-second buckets
//! - One mutex per breaker; the critical sections never await
//! - A permit dropped without an outcome frees its half-open slot

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::ResilienceConfig;
use crate::observability::metrics;

/// Thresholds and timings of a breaker.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_rate_threshold: f32,
    pub slow_call_rate_threshold: f32,
    pub slow_call_duration: Duration,
    pub wait_duration_in_open_state: Duration,
    pub permitted_calls_in_half_open_state: u32,
    pub minimum_number_of_calls: u32,
    pub sliding_window_secs: u64,
}

impl From<&ResilienceConfig> for BreakerSettings {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            failure_rate_threshold: config.failure_rate_threshold,
            slow_call_rate_threshold: config.slow_call_rate_threshold,
            slow_call_duration: Duration::from_millis(config.slow_call_duration_ms),
            wait_duration_in_open_state: Duration::from_millis(config.wait_duration_in_open_state_ms),
            permitted_calls_in_half_open_state: config.permitted_calls_in_half_open_state.max(1),
            minimum_number_of_calls: config.minimum_number_of_calls.max(1),
            sliding_window_secs: config.sliding_window_secs.max(1),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
    Disabled,
    ForcedOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
            CircuitState::Disabled => "DISABLED",
            CircuitState::ForcedOpen => "FORCED_OPEN",
        };
        f.write_str(name)
    }
}

/// Why a call was not permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BreakerRejection {
    #[error("circuit breaker is open")]
    Open,
    #[error("circuit breaker is half-open and all trial calls are in flight")]
    HalfOpenSaturated,
    #[error("circuit breaker is forced open")]
    ForcedOpen,
}

/// Counters of one second.
#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    second: u64,
    calls: u32,
    failures: u32,
    slow: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Totals {
    calls: u32,
    failures: u32,
    slow: u32,
}

impl Totals {
    fn failure_rate(&self) -> f32 {
        rate(self.failures, self.calls)
    }

    fn slow_rate(&self) -> f32 {
        rate(self.slow, self.calls)
    }
}

fn rate(part: u32, total: u32) -> f32 {
    if total == 0 {
        0.0
    } else {
        part as f32 * 100.0 / total as f32
    }
}

/// Ring of per-second buckets covering the last `len` seconds.
#[derive(Debug)]
struct SlidingWindow {
    buckets: Vec<Bucket>,
}

impl SlidingWindow {
    fn new(len: u64) -> Self {
        Self {
            buckets: vec![Bucket::default(); len as usize],
        }
    }

    fn bucket_mut(&mut self, second: u64) -> &mut Bucket {
        let len = self.buckets.len() as u64;
        let bucket = &mut self.buckets[(second % len) as usize];
        if bucket.second != second {
            *bucket = Bucket {
                second,
                ..Bucket::default()
            };
        }
        bucket
    }

    fn record(&mut self, second: u64, failure: bool, slow: bool) {
        let bucket = self.bucket_mut(second);
        bucket.calls += 1;
        bucket.failures += failure as u32;
        bucket.slow += slow as u32;
    }

    fn totals(&self, second: u64) -> Totals {
        let len = self.buckets.len() as u64;
        self.buckets
            .iter()
            .filter(|b| b.calls > 0 && b.second + len > second && b.second <= second)
            .fold(Totals::default(), |acc, b| Totals {
                calls: acc.calls + b.calls,
                failures: acc.failures + b.failures,
                slow: acc.slow + b.slow,
            })
    }

    fn clear(&mut self) {
        self.buckets.iter_mut().for_each(|b| *b = Bucket::default());
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    window: SlidingWindow,
    opened_at: Option<Instant>,
    half_open_issued: u32,
    half_open: Totals,
}

/// Snapshot of a breaker for administrative reads.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerMetrics {
    pub state: CircuitState,
    /// `None` until the window holds the minimum number of calls.
    pub failure_rate: Option<f32>,
    pub slow_call_rate: Option<f32>,
    pub buffered_calls: u32,
    pub failed_calls: u32,
    pub slow_calls: u32,
}

/// Circuit breaker guarding one service.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    epoch: Instant,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        let window = SlidingWindow::new(settings.sliding_window_secs);
        Self {
            name: name.into(),
            settings,
            epoch: Instant::now(),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window,
                opened_at: None,
                half_open_issued: 0,
                half_open: Totals::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    fn second(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_secs()
    }

    /// Ask permission for one backend call.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CallPermit, BreakerRejection> {
        self.try_acquire_at(Instant::now())
    }

    pub(crate) fn try_acquire_at(self: &Arc<Self>, now: Instant) -> Result<CallPermit, BreakerRejection> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::Disabled => {}
            CircuitState::ForcedOpen => return Err(BreakerRejection::ForcedOpen),
            CircuitState::Open => {
                let waited = inner
                    .opened_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or_default();
                if waited < self.settings.wait_duration_in_open_state {
                    return Err(BreakerRejection::Open);
                }
                self.transition(&mut inner, CircuitState::HalfOpen, now);
                inner.half_open_issued = 1;
            }
            CircuitState::HalfOpen => {
                if inner.half_open_issued >= self.settings.permitted_calls_in_half_open_state {
                    return Err(BreakerRejection::HalfOpenSaturated);
                }
                inner.half_open_issued += 1;
            }
        }
        let state = inner.state;
        drop(inner);

        Ok(CallPermit {
            breaker: self.clone(),
            acquired_in: state,
            completed: false,
        })
    }

    fn record_at(&self, acquired_in: CircuitState, now: Instant, success: bool, duration: Duration) {
        let failure = !success;
        let slow = duration >= self.settings.slow_call_duration;
        let mut inner = self.lock();

        match (inner.state, acquired_in) {
            (CircuitState::Closed, _) => {
                let second = self.second(now);
                inner.window.record(second, failure, slow);
                let totals = inner.window.totals(second);
                if totals.calls >= self.settings.minimum_number_of_calls && self.exceeds(&totals) {
                    tracing::warn!(
                        breaker = %self.name,
                        failure_rate = totals.failure_rate(),
                        slow_call_rate = totals.slow_rate(),
                        calls = totals.calls,
                        "Circuit breaker opening"
                    );
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            (CircuitState::HalfOpen, CircuitState::HalfOpen) => {
                inner.half_open.calls += 1;
                inner.half_open.failures += failure as u32;
                inner.half_open.slow += slow as u32;

                if inner.half_open.calls >= self.settings.permitted_calls_in_half_open_state {
                    let trial = inner.half_open;
                    let next = if self.exceeds(&trial) {
                        CircuitState::Open
                    } else {
                        CircuitState::Closed
                    };
                    self.transition(&mut inner, next, now);
                }
            }
            // Outcomes of calls permitted under another state, or while an
            // administrative override is active, are not counted.
            _ => {}
        }
    }

    fn release(&self, acquired_in: CircuitState) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && acquired_in == CircuitState::HalfOpen {
            inner.half_open_issued = inner.half_open_issued.saturating_sub(1);
        }
    }

    fn exceeds(&self, totals: &Totals) -> bool {
        totals.failure_rate() >= self.settings.failure_rate_threshold
            || totals.slow_rate() >= self.settings.slow_call_rate_threshold
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.half_open_issued = 0;
        inner.half_open = Totals::default();
        match to {
            CircuitState::Open | CircuitState::ForcedOpen => inner.opened_at = Some(now),
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.window.clear();
            }
            CircuitState::HalfOpen | CircuitState::Disabled => {}
        }

        tracing::info!(breaker = %self.name, from = %from, to = %to, "Circuit breaker state change");
        metrics::record_breaker_transition(&self.name, to);
    }

    /// Back to Closed with an empty window.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        self.transition(&mut inner, CircuitState::Closed, now);
        inner.window.clear();
    }

    /// Allow every call and stop recording.
    pub fn disable(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Disabled, Instant::now());
    }

    /// Reject every call until reset.
    pub fn force_open(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::ForcedOpen, Instant::now());
    }

    pub fn metrics(&self) -> BreakerMetrics {
        self.metrics_at(Instant::now())
    }

    fn metrics_at(&self, now: Instant) -> BreakerMetrics {
        let inner = self.lock();
        let totals = inner.window.totals(self.second(now));
        let evaluated = totals.calls >= self.settings.minimum_number_of_calls;
        BreakerMetrics {
            state: inner.state,
            failure_rate: evaluated.then(|| totals.failure_rate()),
            slow_call_rate: evaluated.then(|| totals.slow_rate()),
            buffered_calls: totals.calls,
            failed_calls: totals.failures,
            slow_calls: totals.slow,
        }
    }
}

/// Permission for one call. Report the outcome with [`CallPermit::record`];
/// dropping it unreported releases the slot without counting a call.
#[derive(Debug)]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    acquired_in: CircuitState,
    completed: bool,
}

impl CallPermit {
    pub fn record(self, success: bool, duration: Duration) {
        self.record_at(Instant::now(), success, duration);
    }

    pub(crate) fn record_at(mut self, now: Instant, success: bool, duration: Duration) {
        self.completed = true;
        self.breaker.record_at(self.acquired_in, now, success, duration);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.completed {
            self.breaker.release(self.acquired_in);
        }
    }
}
