//! The Transport (spec.md §4.7): ship frames to the broker when the breaker
//! is CLOSED/HALF_OPEN and the broker cooperates; otherwise fall back to the
//! on-disk queue. `replay()` drains that queue back through the broker once
//! it recovers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use securelog_resilience::{CircuitBreaker, RateLimiter, RetryPolicy};

use crate::capability::{Broker, BrokerError};
use crate::fallback::{list_fallback_files, secure_delete, write_fallback_file};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("fallback I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Fallback,
}

pub struct ReplayReport {
    pub replayed: usize,
    pub remaining: usize,
}

pub struct Transport {
    topic: String,
    broker: Arc<dyn Broker>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    fallback_dir: PathBuf,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl Transport {
    pub fn new(
        topic: impl Into<String>,
        broker: Arc<dyn Broker>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        fallback_dir: impl Into<PathBuf>,
    ) -> Self {
        Self { topic: topic.into(), broker, breaker, retry, fallback_dir: fallback_dir.into(), rate_limiter: None }
    }

    /// Attach a token-bucket admission limiter (spec.md §4.6); every
    /// `send()` acquires one token before the broker is attempted.
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Hand `bytes` to the broker, retrying retryable failures per the retry
    /// policy. Diverts to the fallback file queue if the breaker is OPEN, if
    /// the broker returns a terminal error, or once retries are exhausted.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<SendOutcome, TransportError> {
        if !self.breaker.allow_request() {
            self.write_fallback(&bytes)?;
            return Ok(SendOutcome::Fallback);
        }

        if let Some(limiter) = &self.rate_limiter {
            // Poll on the async executor rather than `RateLimiter::acquire`,
            // which parks the OS thread — this is the suspension point
            // spec.md §5 names as "rate limiter acquire".
            while !limiter.try_acquire(1) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        let mut attempt = 0;
        loop {
            match self.broker.send(&self.topic, bytes.clone()).await {
                Ok(()) => {
                    self.breaker.record_success();
                    return Ok(SendOutcome::Sent);
                }
                Err(err) => {
                    let exhausted = attempt + 1 >= self.retry.max_attempts;
                    if exhausted || !err.is_retryable() {
                        tracing::warn!(error = %err, "broker send failed, diverting to fallback");
                        self.breaker.record_failure();
                        self.write_fallback(&bytes)?;
                        return Ok(SendOutcome::Fallback);
                    }
                    tokio::time::sleep(self.retry.delay_for(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    fn write_fallback(&self, bytes: &[u8]) -> Result<PathBuf, TransportError> {
        self.write_fallback_only(bytes)
    }

    /// Write straight to the fallback queue without attempting a broker
    /// send first. Used by the shutdown-drain path (`process_fallback`),
    /// which never touches the broker.
    pub fn write_fallback_only(&self, bytes: &[u8]) -> Result<PathBuf, TransportError> {
        Ok(write_fallback_file(&self.fallback_dir, bytes)?)
    }

    /// Walk the fallback directory in sort (= chronological) order,
    /// re-submitting each frame to the broker. Stops at the first file that
    /// still can't be sent, either because the breaker has reopened or the
    /// broker rejected it, so replay always makes forward progress without
    /// reordering what's left behind.
    pub async fn replay(&self) -> Result<ReplayReport, TransportError> {
        let files = list_fallback_files(&self.fallback_dir)?;
        let mut replayed = 0;
        let mut remaining = files.len();

        for path in &files {
            if !self.breaker.allow_request() {
                break;
            }
            let bytes = std::fs::read(path)?;
            match self.broker.send(&self.topic, bytes).await {
                Ok(()) => {
                    self.breaker.record_success();
                    secure_delete(path)?;
                    replayed += 1;
                    remaining -= 1;
                }
                Err(err) => {
                    tracing::warn!(error = %err, path = %path.display(), "replay failed, stopping this pass");
                    self.breaker.record_failure();
                    break;
                }
            }
        }

        Ok(ReplayReport { replayed, remaining })
    }
}
