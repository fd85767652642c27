//! Three-state circuit breaker guarding the transport boundary: CLOSED while
//! the broker is healthy, OPEN once consecutive failures cross a threshold,
//! HALF_OPEN to admit a single probe request after a cooldown. The CLOSED/
//! OPEN/HALF_OPEN machine (rather than a simpler two-state variant) is the
//! one actually wired in, since it is the only variant that lets a recovered
//! broker be discovered without first accepting a burst of live traffic.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use prometheus::Counter;
use rand::Rng;

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl From<u8> for BreakerState {
    fn from(v: u8) -> Self {
        match v {
            CLOSED => BreakerState::Closed,
            OPEN => BreakerState::Open,
            HALF_OPEN => BreakerState::HalfOpen,
            _ => unreachable!("circuit breaker state out of range"),
        }
    }
}

pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub base_open_duration: Duration,
    pub max_open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            base_open_duration: Duration::from_secs(1),
            max_open_duration: Duration::from_secs(60),
        }
    }
}

/// Guards broker shipment attempts. Cheap to check on the hot path
/// (`allow_request` is a handful of atomic loads); the CAS that flips
/// OPEN -> HALF_OPEN ensures exactly one caller wins the race to admit the
/// probe request when several threads observe the cooldown has elapsed.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    open_count: AtomicU32,
    opened_at: Mutex<Instant>,
    probe_in_flight: AtomicBool,
    opens_total: AtomicU64,
    transitions_counter: Option<Counter>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(CLOSED),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            open_count: AtomicU32::new(0),
            opened_at: Mutex::new(Instant::now()),
            probe_in_flight: AtomicBool::new(false),
            opens_total: AtomicU64::new(0),
            transitions_counter: None,
        }
    }

    /// Attach a counter incremented on every CLOSED/OPEN/HALF_OPEN
    /// transition, for operators wiring this breaker into a metrics
    /// registry.
    pub fn with_metrics(mut self, transitions_counter: Counter) -> Self {
        self.transitions_counter = Some(transitions_counter);
        self
    }

    fn note_transition(&self) {
        if let Some(counter) = &self.transitions_counter {
            counter.inc();
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state.load(Ordering::Acquire).into()
    }

    pub fn opens_total(&self) -> u64 {
        self.opens_total.load(Ordering::Relaxed)
    }

    /// Whether a caller may attempt the guarded operation right now. In the
    /// OPEN state this also performs the OPEN -> HALF_OPEN transition once
    /// the backoff window has elapsed, admitting exactly one probe.
    pub fn allow_request(&self) -> bool {
        match self.state.load(Ordering::Acquire).into() {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => {
                // Only the first caller to observe the flag unset gets to probe.
                self.probe_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            }
            BreakerState::Open => {
                let elapsed = {
                    let opened_at = self.opened_at.lock().unwrap();
                    opened_at.elapsed()
                };
                if elapsed < self.current_open_duration() {
                    return false;
                }
                if self
                    .state
                    .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.consecutive_successes.store(0, Ordering::Relaxed);
                    self.probe_in_flight.store(true, Ordering::Release);
                    self.note_transition();
                    tracing::info!("circuit breaker transitioning OPEN -> HALF_OPEN");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        match self.state.load(Ordering::Acquire).into() {
            BreakerState::Closed => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            BreakerState::HalfOpen => {
                let successes = self.consecutive_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold
                    && self
                        .state
                        .compare_exchange(HALF_OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    self.open_count.store(0, Ordering::Relaxed);
                    self.probe_in_flight.store(false, Ordering::Release);
                    self.note_transition();
                    tracing::info!("circuit breaker closed after successful probe(s)");
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        match self.state.load(Ordering::Acquire).into() {
            BreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    self.trip();
                }
            }
            BreakerState::HalfOpen => {
                // The probe failed: back to Open, regardless of who else is racing.
                self.trip();
            }
            BreakerState::Open => {}
        }
    }

    /// Administrative override: force the breaker back to CLOSED regardless
    /// of its current state, for an operator-triggered recovery.
    pub fn force_close(&self) {
        let was_closed = self.state.load(Ordering::Acquire) == CLOSED;
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.open_count.store(0, Ordering::Relaxed);
        self.probe_in_flight.store(false, Ordering::Release);
        self.state.store(CLOSED, Ordering::Release);
        if !was_closed {
            self.note_transition();
        }
        tracing::info!("circuit breaker force-closed by admin");
    }

    fn trip(&self) {
        *self.opened_at.lock().unwrap() = Instant::now();
        self.open_count.fetch_add(1, Ordering::AcqRel);
        self.opens_total.fetch_add(1, Ordering::Relaxed);
        self.probe_in_flight.store(false, Ordering::Release);
        self.state.store(OPEN, Ordering::Release);
        self.note_transition();
        tracing::warn!("circuit breaker opened");
    }

    /// Exponential backoff capped at `max_open_duration`, jittered by up to
    /// ±20% so that many breakers tripped at once don't probe in lockstep.
    fn current_open_duration(&self) -> Duration {
        let count = self.open_count.load(Ordering::Relaxed).min(20);
        let multiplier = 1u64.checked_shl(count).unwrap_or(u64::MAX);
        let base = self.config.base_open_duration.as_millis() as u64;
        let scaled = base.saturating_mul(multiplier);
        let capped = scaled.min(self.config.max_open_duration.as_millis() as u64);

        let jitter_fraction = rand::thread_rng().gen_range(-0.2..=0.2);
        let jittered = (capped as f64) * (1.0 + jitter_fraction);
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}
