//! Circuit breaker middleware (component H): a three-state failure-isolation
//! gate keyed by upstream health, grounded on the pattern a Tower-based
//! resilience layer exposes (`CircuitBreakerConfig` + `.layer(service)`) but
//! implemented here as a plain state machine the proxy pipeline consults
//! directly, since upstream dispatch already goes through a single shared
//! client rather than a generic `tower::Service`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The client-facing message for a short-circuited request. `error.rs`
/// formats `ProxyError::CircuitOpen`'s `Display` from this constant so the
/// error taxonomy and the breaker itself share one copy of the literal.
pub const CIRCUIT_OPEN_MESSAGE: &str = "Upstream unavailable (circuit breaker open)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Classifies an upstream outcome as transient (countable toward opening the
/// breaker) or not. The reference classifier treats 502/503/504 and
/// connection/timeout failures as transient.
pub trait TransientClassifier: Send + Sync {
    fn is_transient_status(&self, status: u16) -> bool;
    fn is_transient_error(&self) -> bool {
        true
    }
}

pub struct DefaultTransientClassifier;

impl TransientClassifier for DefaultTransientClassifier {
    fn is_transient_status(&self, status: u16) -> bool {
        matches!(status, 502 | 503 | 504)
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_admitted: bool,
}

#[derive(Default)]
pub struct CircuitBreakerStats {
    pub trips: AtomicU64,
    pub short_circuited: AtomicU64,
    pub probes_admitted: AtomicU64,
}

/// Per-upstream breaker. All transitions are protected by a single mutex;
/// status and counters are not persisted across process restarts.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    cooldown: Duration,
    stats: CircuitBreakerStats,
}

/// Decision returned by [`CircuitBreaker::admit`].
pub enum Admission {
    /// The caller may dispatch to upstream.
    Allow,
    /// Respond immediately with the bit-exact circuit-open body.
    ShortCircuit,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_admitted: false,
            }),
            failure_threshold,
            cooldown,
            stats: CircuitBreakerStats::default(),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn stats(&self) -> &CircuitBreakerStats {
        &self.stats
    }

    /// Call before dispatching to upstream. `cooldown_override` lets tests
    /// force an immediate Open → HalfOpen transition without real time
    /// passing.
    pub fn admit(&self, cooldown_override: Option<Duration>) -> Admission {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => Admission::Allow,
            CircuitState::HalfOpen => {
                if inner.half_open_admitted {
                    self.stats.short_circuited.fetch_add(1, Ordering::Relaxed);
                    Admission::ShortCircuit
                } else {
                    inner.half_open_admitted = true;
                    Admission::Allow
                }
            }
            CircuitState::Open => {
                let cooldown = cooldown_override.unwrap_or(self.cooldown);
                let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or_default();
                if elapsed >= cooldown {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_admitted = true;
                    self.stats.probes_admitted.fetch_add(1, Ordering::Relaxed);
                    Admission::Allow
                } else {
                    self.stats.short_circuited.fetch_add(1, Ordering::Relaxed);
                    Admission::ShortCircuit
                }
            }
        }
    }

    /// Records the outcome of a dispatched request. `transient` is the
    /// classifier's verdict on the response or transport error.
    pub fn record(&self, transient: bool) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                if transient {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.failure_threshold {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(Instant::now());
                        self.stats.trips.fetch_add(1, Ordering::Relaxed);
                    }
                } else {
                    inner.consecutive_failures = 0;
                }
            }
            CircuitState::HalfOpen => {
                if transient {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.consecutive_failures = self.failure_threshold;
                    self.stats.trips.fetch_add(1, Ordering::Relaxed);
                } else {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                }
                inner.half_open_admitted = false;
            }
            CircuitState::Open => {
                // A record arriving while Open (e.g. a stray in-flight
                // response from before the trip) doesn't change state.
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_transient_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        for _ in 0..3 {
            assert!(matches!(breaker.admit(None), Admission::Allow));
            breaker.record(true);
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(breaker.admit(None), Admission::ShortCircuit));
    }

    #[test]
    fn non_transient_response_resets_the_counter() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record(true);
        breaker.record(true);
        breaker.record(false);
        breaker.record(true);
        breaker.record(true);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_admits_exactly_one_probe() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record(true);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(breaker.admit(Some(Duration::from_millis(0))), Admission::Allow));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(matches!(breaker.admit(Some(Duration::from_millis(0))), Admission::ShortCircuit));
    }

    #[test]
    fn successful_probe_closes_the_circuit() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record(true);
        breaker.admit(Some(Duration::from_millis(0)));
        breaker.record(false);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn failed_probe_reopens_the_circuit() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record(true);
        breaker.admit(Some(Duration::from_millis(0)));
        breaker.record(true);
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
