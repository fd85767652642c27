//! Broker capability (spec.md §6): the external collaborator the transport
//! boundary ships compressed, encrypted frames to. Errors are split into
//! retryable and terminal so callers can decide whether to retry, trip the
//! breaker, or divert straight to fallback.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unreachable or timed out: {0}")]
    Retryable(String),
    #[error("broker rejected the request: {0}")]
    Terminal(String),
}

impl BrokerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Retryable(_))
    }
}

/// Narrow interface over whatever message broker sits downstream (Kafka,
/// a managed queue, an HTTP ingest endpoint). Implementors own their own
/// connection pooling and serialization of `topic`.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn send(&self, topic: &str, bytes: Vec<u8>) -> Result<(), BrokerError>;
    async fn flush(&self) -> Result<(), BrokerError>;
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Test double that always succeeds. Never used in production — see
/// `securelog-crypto::capability::NoopKmsClient` for the analogous pattern.
pub struct NoopBroker;

#[async_trait]
impl Broker for NoopBroker {
    async fn send(&self, _topic: &str, _bytes: Vec<u8>) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn flush(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}
