//! Token-bucket rate limiter bounding how fast the transport boundary may
//! ship records to the broker.

use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_sec: u32) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec: refill_per_sec as f64,
            bucket: Mutex::new(Bucket { tokens: capacity as f64, last_refill: Instant::now() }),
        }
    }

    /// Refill based on elapsed whole seconds plus the sub-second remainder,
    /// rather than a single `elapsed.as_secs_f64()` multiply, so a very long
    /// idle gap can't produce a refill amount that overflows `f64` precision
    /// before the `min(capacity, _)` clamp below ever runs.
    fn refill(bucket: &mut Bucket, refill_per_sec: f64, capacity: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill);
        let whole_secs = elapsed.as_secs() as f64;
        let remainder_secs = elapsed.subsec_nanos() as f64 / 1_000_000_000.0;

        let whole_refill = (whole_secs * refill_per_sec).min(capacity);
        let remainder_refill = remainder_secs * refill_per_sec;

        bucket.tokens = (bucket.tokens + whole_refill + remainder_refill).min(capacity);
        bucket.last_refill = now;
    }

    /// Non-blocking: take `n` tokens if available, otherwise leave the
    /// bucket untouched and return `false`.
    pub fn try_acquire(&self, n: u32) -> bool {
        let mut bucket = self.bucket.lock().unwrap();
        Self::refill(&mut bucket, self.refill_per_sec, self.capacity);
        let n = n as f64;
        if bucket.tokens >= n {
            bucket.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Blocks the calling thread until `n` tokens are available or `timeout`
    /// elapses, polling at a short fixed interval.
    pub fn acquire_timeout(&self, n: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire(n) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5).min(timeout));
        }
    }

    /// Blocks the calling thread until `n` tokens become available.
    pub fn acquire(&self, n: u32) {
        while !self.try_acquire(n) {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_capacity_then_blocks() {
        let limiter = RateLimiter::new(3, 1);
        assert!(limiter.try_acquire(1));
        assert!(limiter.try_acquire(1));
        assert!(limiter.try_acquire(1));
        assert!(!limiter.try_acquire(1));
    }

    #[test]
    fn refills_over_time() {
        let limiter = RateLimiter::new(1, 100);
        assert!(limiter.try_acquire(1));
        assert!(!limiter.try_acquire(1));
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.try_acquire(1));
    }

    #[test]
    fn acquire_timeout_gives_up_after_deadline() {
        let limiter = RateLimiter::new(1, 1);
        assert!(limiter.try_acquire(1));
        let ok = limiter.acquire_timeout(1, Duration::from_millis(30));
        assert!(!ok);
    }

    #[test]
    fn never_exceeds_capacity_even_after_a_long_idle_gap() {
        let limiter = RateLimiter::new(5, 1_000_000);
        {
            let mut bucket = limiter.bucket.lock().unwrap();
            bucket.last_refill = Instant::now() - Duration::from_secs(3600);
        }
        assert!(limiter.try_acquire(5));
        assert!(!limiter.try_acquire(1));
    }

    /// Under constant saturation (always more demand than tokens), the
    /// admitted rate over a multi-second window should track `refill_rate`
    /// within a small tolerance, not the burst capacity.
    #[test]
    fn admitted_rate_tracks_refill_rate_under_saturation() {
        let refill_rate = 200u32;
        let limiter = RateLimiter::new(20, refill_rate);
        let window = Duration::from_secs(2);
        let deadline = Instant::now() + window;
        let mut admitted = 0u64;
        while Instant::now() < deadline {
            if limiter.try_acquire(1) {
                admitted += 1;
            }
        }
        let observed_rate = admitted as f64 / window.as_secs_f64();
        let expected = refill_rate as f64;
        assert!(
            (observed_rate - expected).abs() / expected < 0.25,
            "observed {observed_rate} too far from expected {expected}"
        );
    }
}
