//! Bounded exponential-backoff retry for operations the transport boundary
//! classifies as retryable (see `securelog-transport`'s error taxonomy).

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_fraction: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt numbered `attempt` (0-indexed: the first
    /// retry, after the initial attempt fails, is `attempt == 0`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);
        let jitter = rand::thread_rng().gen_range(-self.jitter_fraction..=self.jitter_fraction);
        let jittered_ms = (capped_ms * (1.0 + jitter)).max(0.0);
        Duration::from_millis(jittered_ms as u64)
    }

    /// Run `operation` up to `max_attempts` times, sleeping between attempts
    /// per `delay_for`, stopping early once `should_retry` returns `false`
    /// for the error encountered. Returns the last error if attempts are
    /// exhausted.
    pub fn execute<T, E>(
        &self,
        mut should_retry: impl FnMut(&E) -> bool,
        mut operation: impl FnMut() -> Result<T, E>,
    ) -> Result<T, E> {
        let mut attempt = 0;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt + 1 >= self.max_attempts || !should_retry(&err) {
                        return Err(err);
                    }
                    std::thread::sleep(self.delay_for(attempt));
                    attempt += 1;
                }
            }
        }
    }
}
