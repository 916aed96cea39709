//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through and failures are counted
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: the next call is a trial (probe) against the dependency
//!
//! # State Transitions
//! ```text
//! Closed → Open: fail_count >= fail_threshold
//! Open → Half-Open: open_duration elapsed (one timer per open period)
//! Half-Open → Closed: probe succeeds and success_window has passed since the last failure
//! Half-Open → Open: probe fails
//! Closed → Closed: success after success_window resets fail_count
//! ```
//!
//! # Design Decisions
//! - One breaker per protected dependency, shared by all callers
//! - Admission and outcome recording each run under a single lock; the
//!   operation itself runs outside it
//! - Single probe in Half-Open; concurrent callers fast-fail until it resolves
//! - success_window is checked lazily on successful calls, there is no sweep
//! - No retries and no timeout of its own

use std::fmt;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::observability::metrics;
use crate::resilience::operation::Operation;

/// Consecutive failures tolerated before tripping, unless configured.
pub const DEFAULT_FAIL_THRESHOLD: u32 = 3;

/// Cool-down before a probe is allowed, unless configured.
pub const DEFAULT_OPEN_DURATION: Duration = Duration::from_secs(30);

/// Failure-free time required before the breaker is confirmed healthy, unless configured.
pub const DEFAULT_SUCCESS_WINDOW: Duration = Duration::from_secs(60);

/// Health classification of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerStatus::Closed => "closed",
            BreakerStatus::Open => "open",
            BreakerStatus::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Identifier used in logs and metric labels.
    pub name: String,

    /// Consecutive failures tolerated while Closed before tripping.
    pub fail_threshold: NonZeroU32,

    /// How long the breaker stays Open before a probe is allowed.
    pub open_duration: Duration,

    /// Failure-free time (from the last failure) needed before fail_count
    /// is cleared and a probing breaker is closed.
    pub success_window: Duration,
}

impl BreakerConfig {
    pub fn new(
        name: impl Into<String>,
        fail_threshold: NonZeroU32,
        open_duration: Duration,
        success_window: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            fail_threshold,
            open_duration,
            success_window,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            fail_threshold: NonZeroU32::new(DEFAULT_FAIL_THRESHOLD).unwrap_or(NonZeroU32::MIN),
            open_duration: DEFAULT_OPEN_DURATION,
            success_window: DEFAULT_SUCCESS_WINDOW,
        }
    }
}

/// Consistent view of a breaker's state, taken under its lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub status: BreakerStatus,
    pub fail_count: u32,
    pub last_failure_at: Option<Instant>,
    pub probe_in_flight: bool,
}

/// Errors returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The call was rejected without running the operation.
    #[error("circuit open: call rejected without running the operation")]
    FastFailed,

    /// The operation ran and failed.
    #[error("operation failed: {0}")]
    OperationFailed(#[source] E),
}

impl<E> BreakerError<E> {
    pub fn is_fast_failed(&self) -> bool {
        matches!(self, BreakerError::FastFailed)
    }

    /// The operation's own error, if it ran.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            BreakerError::FastFailed => None,
            BreakerError::OperationFailed(e) => Some(e),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    status: BreakerStatus,
    fail_count: u32,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
    /// Bumped on every entry to Open; a timer only promotes its own period.
    open_generation: u64,
    half_open_at: Option<Instant>,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            status: BreakerStatus::Closed,
            fail_count: 0,
            last_failure_at: None,
            probe_in_flight: false,
            open_generation: 0,
            half_open_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

#[derive(Debug)]
struct Shared {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    /// Decide whether a call may run. `None` means fast-fail.
    fn admit(self: &Arc<Self>) -> Option<Permit> {
        let now = Instant::now();
        let mut state = self.lock();
        self.promote_if_due(&mut state, now);

        let status = state.status;
        let admission = match status {
            BreakerStatus::Closed if state.fail_count >= self.config.fail_threshold.get() => {
                self.enter_open(&mut state, now);
                return None;
            }
            BreakerStatus::Closed => Admission::Normal,
            BreakerStatus::Open => return None,
            BreakerStatus::HalfOpen if state.probe_in_flight => return None,
            BreakerStatus::HalfOpen => {
                state.probe_in_flight = true;
                tracing::debug!(breaker = %self.name(), "Admitting probe call");
                Admission::Probe
            }
        };

        Some(Permit {
            shared: Arc::clone(self),
            admission,
            resolved: false,
        })
    }

    fn record_success(self: &Arc<Self>, admission: Admission) {
        let now = Instant::now();
        let mut state = self.lock();
        let window_elapsed = state
            .last_failure_at
            .map_or(true, |at| now.saturating_duration_since(at) >= self.config.success_window);

        let status = state.status;
        match (admission, status) {
            (Admission::Probe, BreakerStatus::HalfOpen) => {
                state.probe_in_flight = false;
                if window_elapsed {
                    self.close(&mut state);
                } else {
                    tracing::debug!(
                        breaker = %self.name(),
                        "Probe succeeded, waiting out success window"
                    );
                }
            }
            (Admission::Normal, BreakerStatus::Closed) if window_elapsed && state.fail_count > 0 => {
                self.close(&mut state);
            }
            // Stale permit or nothing to clear.
            _ => {}
        }
    }

    fn record_failure(self: &Arc<Self>, admission: Admission) {
        let now = Instant::now();
        let mut state = self.lock();
        state.last_failure_at = Some(now);

        let status = state.status;
        match (admission, status) {
            (Admission::Probe, BreakerStatus::HalfOpen) => {
                state.probe_in_flight = false;
                tracing::warn!(breaker = %self.name(), "Probe failed, reopening circuit");
                self.enter_open(&mut state, now);
            }
            (Admission::Normal, BreakerStatus::Closed) => {
                state.fail_count = state.fail_count.saturating_add(1);
                if state.fail_count >= self.config.fail_threshold.get() {
                    self.enter_open(&mut state, now);
                }
            }
            // Admitted before the breaker left Closed; only the timestamp counts.
            _ => {}
        }
    }

    fn release_probe(&self) {
        let mut state = self.lock();
        if state.status == BreakerStatus::HalfOpen {
            state.probe_in_flight = false;
            tracing::debug!(breaker = %self.name(), "Probe abandoned, slot released");
        }
    }

    fn enter_open(self: &Arc<Self>, state: &mut BreakerState, now: Instant) {
        if state.status == BreakerStatus::Open {
            return;
        }

        let from = state.status;
        let half_open_at = now.checked_add(self.config.open_duration);
        state.status = BreakerStatus::Open;
        state.probe_in_flight = false;
        state.last_failure_at = Some(now);
        state.open_generation = state.open_generation.wrapping_add(1);
        state.half_open_at = half_open_at;

        tracing::warn!(
            breaker = %self.name(),
            from = %from,
            fail_count = state.fail_count,
            open_secs = self.config.open_duration.as_secs_f64(),
            "Circuit opened"
        );
        metrics::record_breaker_transition(self.name(), BreakerStatus::Open);

        match half_open_at {
            Some(at) => self.schedule_half_open(state.open_generation, at),
            None => tracing::warn!(
                breaker = %self.name(),
                "Open duration out of range, circuit stays open"
            ),
        }
    }

    /// Spawn the one-shot Open → Half-Open timer for this open period.
    fn schedule_half_open(self: &Arc<Self>, generation: u64, at: Instant) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(
                breaker = %self.name(),
                "No runtime for open timer, half-open applied on next call"
            );
            return;
        };

        let weak = Arc::downgrade(self);
        handle.spawn(async move {
            tokio::time::sleep_until(at).await;
            if let Some(shared) = weak.upgrade() {
                let mut state = shared.lock();
                shared.promote(&mut state, generation);
            }
        });
    }

    fn promote_if_due(&self, state: &mut BreakerState, now: Instant) {
        if let Some(at) = state.half_open_at {
            if now >= at {
                let generation = state.open_generation;
                self.promote(state, generation);
            }
        }
    }

    fn promote(&self, state: &mut BreakerState, generation: u64) {
        if state.status != BreakerStatus::Open || state.open_generation != generation {
            return;
        }
        state.status = BreakerStatus::HalfOpen;
        state.half_open_at = None;
        state.probe_in_flight = false;

        tracing::info!(breaker = %self.name(), "Circuit half-open, next call will probe");
        metrics::record_breaker_transition(self.name(), BreakerStatus::HalfOpen);
    }

    fn close(&self, state: &mut BreakerState) {
        let from = state.status;
        let cleared = state.fail_count;
        state.status = BreakerStatus::Closed;
        state.fail_count = 0;
        state.half_open_at = None;

        if from == BreakerStatus::Closed {
            tracing::debug!(breaker = %self.name(), cleared, "Failure count cleared");
        } else {
            tracing::info!(breaker = %self.name(), from = %from, "Circuit closed, dependency recovered");
            metrics::record_breaker_transition(self.name(), BreakerStatus::Closed);
        }
    }

    fn snapshot(&self) -> BreakerSnapshot {
        let mut state = self.lock();
        self.promote_if_due(&mut state, Instant::now());
        BreakerSnapshot {
            status: state.status,
            fail_count: state.fail_count,
            last_failure_at: state.last_failure_at,
            probe_in_flight: state.probe_in_flight,
        }
    }
}

/// Admission ticket for one call.
///
/// Dropping an unresolved probe permit frees the probe slot so a cancelled
/// probe cannot wedge the breaker in Half-Open.
#[derive(Debug)]
struct Permit {
    shared: Arc<Shared>,
    admission: Admission,
    resolved: bool,
}

impl Permit {
    fn succeeded(mut self) {
        self.resolved = true;
        self.shared.record_success(self.admission);
    }

    fn failed(mut self) {
        self.resolved = true;
        self.shared.record_failure(self.admission);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.resolved && self.admission == Admission::Probe {
            self.shared.release_probe();
        }
    }
}

/// Circuit breaker wrapping a single protected operation.
///
/// Share one instance (usually behind an `Arc`) between all callers of the
/// dependency it protects.
#[derive(Debug)]
pub struct CircuitBreaker<Op> {
    shared: Arc<Shared>,
    operation: Op,
}

impl<Op> CircuitBreaker<Op> {
    /// Create a Closed breaker around `operation`.
    pub fn new(config: BreakerConfig, operation: Op) -> Self {
        tracing::debug!(
            breaker = %config.name,
            fail_threshold = config.fail_threshold.get(),
            open_secs = config.open_duration.as_secs_f64(),
            success_window_secs = config.success_window.as_secs_f64(),
            "Circuit breaker created"
        );
        metrics::record_breaker_state(&config.name, BreakerStatus::Closed);

        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(BreakerState::default()),
            }),
            operation,
        }
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.shared.config
    }

    pub fn status(&self) -> BreakerStatus {
        self.snapshot().status
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        self.shared.snapshot()
    }

    /// Run `message` through the operation unless the circuit rejects it.
    ///
    /// The operation is never retried and runs to completion before the
    /// outcome is recorded.
    pub async fn execute<M>(&self, message: M) -> Result<Op::Output, BreakerError<Op::Error>>
    where
        Op: Operation<M>,
    {
        let Some(permit) = self.shared.admit() else {
            tracing::debug!(breaker = %self.name(), "Call fast-failed");
            metrics::record_breaker_call(self.name(), "fast_failed");
            return Err(BreakerError::FastFailed);
        };

        match self.operation.call(message).await {
            Ok(output) => {
                permit.succeeded();
                metrics::record_breaker_call(self.name(), "success");
                Ok(output)
            }
            Err(e) => {
                permit.failed();
                metrics::record_breaker_call(self.name(), "operation_failed");
                Err(BreakerError::OperationFailed(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Succeeds when the message is `true`, fails otherwise.
    struct Scripted {
        calls: Arc<AtomicU32>,
    }

    impl Operation<bool> for Scripted {
        type Output = ();
        type Error = &'static str;

        async fn call(&self, ok: bool) -> Result<(), &'static str> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if ok { Ok(()) } else { Err("boom") }
        }
    }

    fn breaker(fail_threshold: u32, open_secs: u64, window_secs: u64) -> (CircuitBreaker<Scripted>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let config = BreakerConfig::new(
            "test",
            NonZeroU32::new(fail_threshold).unwrap(),
            Duration::from_secs(open_secs),
            Duration::from_secs(window_secs),
        );
        (CircuitBreaker::new(config, Scripted { calls: calls.clone() }), calls)
    }

    async fn trip(cb: &CircuitBreaker<Scripted>, times: u32) {
        for _ in 0..times {
            assert!(matches!(cb.execute(false).await, Err(BreakerError::OperationFailed("boom"))));
        }
    }

    #[test]
    fn test_default_config() {
        let config = BreakerConfig::default();
        assert_eq!(config.fail_threshold.get(), 3);
        assert_eq!(config.open_duration, Duration::from_secs(30));
        assert_eq!(config.success_window, Duration::from_secs(60));
    }

    #[test]
    fn test_error_display() {
        let err: BreakerError<&str> = BreakerError::FastFailed;
        assert!(err.is_fast_failed());
        assert!(err.to_string().contains("circuit open"));

        let err = BreakerError::OperationFailed("queue down");
        assert_eq!(err.to_string(), "operation failed: queue down");
        assert_eq!(err.into_operation_error(), Some("queue down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_closed() {
        let (cb, _) = breaker(3, 30, 60);
        let snap = cb.snapshot();
        assert_eq!(snap.status, BreakerStatus::Closed);
        assert_eq!(snap.fail_count, 0);
        assert!(snap.last_failure_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trips_after_threshold_and_fast_fails() {
        let (cb, calls) = breaker(3, 30, 60);
        trip(&cb, 3).await;
        assert_eq!(cb.status(), BreakerStatus::Open);

        assert!(matches!(cb.execute(true).await, Err(BreakerError::FastFailed)));
        assert!(matches!(cb.execute(true).await, Err(BreakerError::FastFailed)));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "operation must not run while open");
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_allowed_after_open_duration() {
        let (cb, calls) = breaker(3, 30, 60);
        trip(&cb, 3).await;
        for _ in 0..5 {
            assert!(cb.execute(true).await.unwrap_err().is_fast_failed());
        }

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(cb.execute(true).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // Probe succeeded inside the success window.
        assert_eq!(cb.status(), BreakerStatus::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_promotes_without_calls() {
        let (cb, _) = breaker(1, 30, 60);
        trip(&cb, 1).await;

        tokio::time::sleep(Duration::from_secs(31)).await;
        // Read raw state so the lazy path cannot be what promoted it.
        assert_eq!(cb.shared.lock().status, BreakerStatus::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens_without_counting() {
        let (cb, _) = breaker(3, 30, 60);
        trip(&cb, 3).await;

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(matches!(cb.execute(false).await, Err(BreakerError::OperationFailed(_))));
        let snap = cb.snapshot();
        assert_eq!(snap.status, BreakerStatus::Open);
        assert_eq!(snap.fail_count, 3);

        // Cool-down restarted at the failed probe.
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(cb.execute(true).await.unwrap_err().is_fast_failed());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cb.status(), BreakerStatus::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_after_success_window() {
        let (cb, calls) = breaker(3, 30, 60);
        trip(&cb, 3).await;
        assert!(cb.execute(true).await.unwrap_err().is_fast_failed());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(cb.execute(true).await.is_ok());
        assert_eq!(cb.status(), BreakerStatus::HalfOpen);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(cb.execute(true).await.is_ok());
        let snap = cb.snapshot();
        assert_eq!(snap.status, BreakerStatus::Closed);
        assert_eq!(snap.fail_count, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_survives_successes_inside_window() {
        let (cb, _) = breaker(3, 30, 60);
        trip(&cb, 1).await;
        assert!(cb.execute(true).await.is_ok());
        assert!(cb.execute(true).await.is_ok());
        assert_eq!(cb.snapshot().fail_count, 1);

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(cb.execute(true).await.is_ok());
        assert_eq!(cb.snapshot().fail_count, 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(cb.execute(true).await.is_ok());
        assert_eq!(cb.snapshot().fail_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interleaved_failures_still_trip() {
        let (cb, _) = breaker(3, 30, 60);
        trip(&cb, 1).await;
        assert!(cb.execute(true).await.is_ok());
        trip(&cb, 1).await;
        assert!(cb.execute(true).await.is_ok());
        trip(&cb, 1).await;
        assert_eq!(cb.status(), BreakerStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_success_window_closes_on_probe() {
        let (cb, _) = breaker(2, 10, 0);
        trip(&cb, 2).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(cb.execute(true).await.is_ok());
        assert_eq!(cb.status(), BreakerStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_failures_do_not_reopen() {
        let (cb, _) = breaker(1, 30, 60);
        let first = cb.shared.admit().unwrap();
        let second = cb.shared.admit().unwrap();

        first.failed();
        assert_eq!(cb.shared.lock().open_generation, 1);
        second.failed();
        let state = cb.shared.lock();
        assert_eq!(state.status, BreakerStatus::Open);
        assert_eq!(state.open_generation, 1, "only one open period and one timer");
        assert_eq!(state.fail_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_slot() {
        let (cb, _) = breaker(1, 5, 60);
        trip(&cb, 1).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let probe = cb.shared.admit().expect("first caller probes");
        assert!(cb.shared.admit().is_none(), "second caller must fast-fail");
        assert!(cb.snapshot().probe_in_flight);

        probe.succeeded();
        assert!(!cb.snapshot().probe_in_flight);
        assert!(cb.shared.admit().is_some(), "slot is free again");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_releases_slot() {
        let (cb, _) = breaker(1, 5, 60);
        trip(&cb, 1).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let probe = cb.shared.admit().unwrap();
        drop(probe);
        let snap = cb.snapshot();
        assert_eq!(snap.status, BreakerStatus::HalfOpen);
        assert!(!snap.probe_in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_open_duration_stays_open() {
        let (cb, calls) = breaker(1, u64::MAX, 60);
        trip(&cb, 1).await;

        let snap = cb.snapshot();
        assert_eq!(snap.status, BreakerStatus::Open);
        assert!(snap.last_failure_at.is_some());
        assert!(cb.shared.lock().half_open_at.is_none());

        tokio::time::sleep(Duration::from_secs(365 * 24 * 3600)).await;
        assert!(cb.execute(true).await.unwrap_err().is_fast_failed());
        assert_eq!(cb.status(), BreakerStatus::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lazy_half_open_without_runtime() {
        let config = BreakerConfig::new(
            "no-runtime",
            NonZeroU32::MIN,
            Duration::from_millis(10),
            Duration::from_secs(60),
        );
        let cb = CircuitBreaker::new(config, ());
        let permit = cb.shared.admit().unwrap();
        permit.failed();
        assert_eq!(cb.status(), BreakerStatus::Open);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cb.status(), BreakerStatus::HalfOpen);
    }
}
