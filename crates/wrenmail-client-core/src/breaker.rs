//! Failure-accumulation circuit breaker for authentication probes.
//!
//! Closed → Open once `failure_threshold` consecutive failures accumulate;
//! Open → HalfOpen after `cooldown_ms`, releasing exactly one probe permit;
//! the recorded outcome of that probe either closes the breaker or re-opens
//! it with a fresh cooldown. Fixed cooldown, no exponential backoff.

use std::sync::Mutex;

use chrono::Utc;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_COOLDOWN_MS: i64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_ms: i64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    status: BreakerStatus,
    consecutive_failures: u32,
    opened_at_unix_ms: Option<i64>,
    // The single half-open permit: set while the released probe is still
    // unresolved, so repeat callers keep getting `false`.
    half_open_probe_pending: bool,
}

/// Process-wide probe admission control, shared behind `Arc` by every
/// consumer that may trigger an authentication probe.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                status: BreakerStatus::Closed,
                consecutive_failures: 0,
                opened_at_unix_ms: None,
                half_open_probe_pending: false,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    #[must_use]
    pub fn status(&self) -> BreakerStatus {
        self.lock().status
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Admission check for one probe, evaluated atomically. In the open
    /// state this returns `true` exactly once per elapsed cooldown window
    /// (transitioning to half-open); callers seeing `false` must surface
    /// `AuthErrorKind::CircuitOpen`, never "unauthenticated".
    #[must_use]
    pub fn allow_probe(&self) -> bool {
        self.allow_probe_at(Utc::now().timestamp_millis())
    }

    #[must_use]
    pub fn allow_probe_at(&self, now_unix_ms: i64) -> bool {
        let mut inner = self.lock();
        match inner.status {
            BreakerStatus::Closed => true,
            BreakerStatus::HalfOpen => !inner.half_open_probe_pending,
            BreakerStatus::Open => {
                let opened_at = match inner.opened_at_unix_ms {
                    Some(at) => at,
                    None => {
                        // Open without a stamp cannot time out; treat the
                        // window as just started.
                        inner.opened_at_unix_ms = Some(now_unix_ms);
                        return false;
                    }
                };
                if now_unix_ms - opened_at < self.config.cooldown_ms {
                    return false;
                }
                inner.status = BreakerStatus::HalfOpen;
                inner.half_open_probe_pending = true;
                tracing::debug!(
                    elapsed_ms = now_unix_ms - opened_at,
                    "auth circuit half-open, releasing one probe"
                );
                true
            }
        }
    }

    /// Records a successful probe: failures reset to zero, breaker closes.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.status != BreakerStatus::Closed {
            tracing::info!(from = inner.status.as_str(), "auth circuit closed");
        }
        inner.status = BreakerStatus::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at_unix_ms = None;
        inner.half_open_probe_pending = false;
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Utc::now().timestamp_millis());
    }

    pub fn record_failure_at(&self, now_unix_ms: i64) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.status {
            BreakerStatus::HalfOpen => {
                // The released probe failed: re-open and restart the window.
                inner.status = BreakerStatus::Open;
                inner.opened_at_unix_ms = Some(now_unix_ms);
                inner.half_open_probe_pending = false;
                tracing::warn!(
                    consecutive_failures = inner.consecutive_failures,
                    "auth circuit re-opened after half-open probe failure"
                );
            }
            BreakerStatus::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.status = BreakerStatus::Open;
                    inner.opened_at_unix_ms = Some(now_unix_ms);
                    tracing::warn!(
                        consecutive_failures = inner.consecutive_failures,
                        cooldown_ms = self.config.cooldown_ms,
                        "auth circuit opened"
                    );
                }
            }
            // Failures resolving after the breaker already opened keep the
            // original window; they must not extend it.
            BreakerStatus::Open => {}
        }
    }

    /// Returns the breaker to its initial closed state. Used on explicit
    /// logout, where stale failure history must not outlive the session.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.status = BreakerStatus::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at_unix_ms = None;
        inner.half_open_probe_pending = false;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_ms: i64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown_ms,
        })
    }

    #[test]
    fn stays_closed_below_threshold() {
        let breaker = breaker(3, 1_000);
        breaker.record_failure_at(0);
        breaker.record_failure_at(10);
        assert_eq!(breaker.status(), BreakerStatus::Closed);
        assert!(breaker.allow_probe_at(20));
    }

    #[test]
    fn opens_at_threshold_and_blocks_probes() {
        let breaker = breaker(3, 1_000);
        for at in [0, 10, 20] {
            breaker.record_failure_at(at);
        }
        assert_eq!(breaker.status(), BreakerStatus::Open);
        assert!(!breaker.allow_probe_at(500));
        assert!(!breaker.allow_probe_at(1_019));
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = breaker(3, 1_000);
        breaker.record_failure_at(0);
        breaker.record_failure_at(10);
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);
        breaker.record_failure_at(20);
        breaker.record_failure_at(30);
        assert_eq!(breaker.status(), BreakerStatus::Closed);
    }

    #[test]
    fn half_open_releases_exactly_one_probe() {
        let breaker = breaker(2, 1_000);
        breaker.record_failure_at(0);
        breaker.record_failure_at(0);
        assert!(breaker.allow_probe_at(1_001));
        assert_eq!(breaker.status(), BreakerStatus::HalfOpen);
        // Permit consumed until the probe outcome lands.
        assert!(!breaker.allow_probe_at(1_002));
        assert!(!breaker.allow_probe_at(5_000));
    }

    #[test]
    fn half_open_success_closes() {
        let breaker = breaker(2, 1_000);
        breaker.record_failure_at(0);
        breaker.record_failure_at(0);
        assert!(breaker.allow_probe_at(1_001));
        breaker.record_success();
        assert_eq!(breaker.status(), BreakerStatus::Closed);
        assert!(breaker.allow_probe_at(1_002));
    }

    #[test]
    fn half_open_failure_reopens_with_fresh_window() {
        let breaker = breaker(2, 1_000);
        breaker.record_failure_at(0);
        breaker.record_failure_at(0);
        assert!(breaker.allow_probe_at(1_001));
        breaker.record_failure_at(1_050);
        assert_eq!(breaker.status(), BreakerStatus::Open);
        // Old window does not apply; the new one starts at the re-open.
        assert!(!breaker.allow_probe_at(1_500));
        assert!(breaker.allow_probe_at(2_051));
    }

    #[test]
    fn late_failures_do_not_extend_open_window() {
        let breaker = breaker(2, 1_000);
        breaker.record_failure_at(0);
        breaker.record_failure_at(0);
        // A probe dispatched before the trip resolves late.
        breaker.record_failure_at(900);
        assert!(breaker.allow_probe_at(1_001));
    }

    #[test]
    fn reset_clears_open_state() {
        let breaker = breaker(1, 60_000);
        breaker.record_failure_at(0);
        assert_eq!(breaker.status(), BreakerStatus::Open);
        breaker.reset();
        assert_eq!(breaker.status(), BreakerStatus::Closed);
        assert!(breaker.allow_probe_at(1));
    }

    // Breaker walk from the product acceptance scenario: five consecutive
    // 401s with threshold 5 and a 30 s cooldown.
    #[test]
    fn five_failures_then_recovery_walk() {
        let breaker = breaker(5, 30_000);
        for _ in 0..5 {
            breaker.record_failure_at(1_000);
        }
        assert_eq!(breaker.status(), BreakerStatus::Open);
        assert!(!breaker.allow_probe_at(30_999));
        assert!(breaker.allow_probe_at(31_001));
        breaker.record_success();
        assert_eq!(breaker.status(), BreakerStatus::Closed);
        breaker.record_failure_at(31_100);
        assert_eq!(breaker.consecutive_failures(), 1);
        assert_eq!(breaker.status(), BreakerStatus::Closed);
    }
}
