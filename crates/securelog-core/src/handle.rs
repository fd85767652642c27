//! The administrative surface (spec.md §6, SPEC_FULL.md §10.7): operator
//! controls that sit beside the hot producer path rather than in it —
//! resetting the integrity chain, forcing a KEK re-acquire, force-closing
//! the circuit breaker, and replaying the fallback directory on demand.

use std::sync::Arc;

use securelog_crypto::KeyManager;
use securelog_integrity::IntegrityChain;
use securelog_transport::{ReplayReport, Transport, TransportError};

use crate::metrics::PipelineMetrics;

/// Handed to producers for enqueueing records; kept separate from
/// `AdminHandle` so operator controls can't be reached from ordinary
/// application code that only has a producer handle in scope.
#[derive(Clone)]
pub struct AdminHandle {
    chain: Arc<IntegrityChain>,
    key_manager: Arc<KeyManager>,
    transport: Arc<Transport>,
    metrics: Arc<PipelineMetrics>,
}

impl AdminHandle {
    pub fn new(chain: Arc<IntegrityChain>, key_manager: Arc<KeyManager>, transport: Arc<Transport>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { chain, key_manager, transport, metrics }
    }

    /// Returns the current chain head so an operator can cross-check it
    /// against an externally stored anchor before deciding to reset.
    pub fn chain_head(&self) -> [u8; 32] {
        self.chain.head()
    }

    /// Starts a fresh hash chain from the zero seed. Only ever appropriate
    /// immediately after an audited incident response, since it breaks the
    /// tamper-evidence link to every record chained before the reset.
    pub fn reset_integrity_chain(&self) {
        self.chain.reset();
        tracing::warn!("integrity chain reset by admin");
    }

    /// Forces the next encryption call to re-acquire the KEK rather than
    /// reuse the cached one, e.g. after an out-of-band key rotation at the
    /// KMS.
    pub fn invalidate_kek_cache(&self) {
        self.key_manager.rotate();
    }

    /// Forces the transport breaker back to CLOSED, bypassing its own
    /// backoff schedule. For operator-confirmed recovery when the breaker's
    /// own probing has not yet caught up.
    pub fn force_breaker_close(&self) {
        self.transport.breaker().force_close();
    }

    pub fn breaker_state(&self) -> securelog_resilience::BreakerState {
        self.transport.breaker().state()
    }

    /// Drains the on-disk fallback queue back through the broker.
    pub async fn replay_fallback(&self) -> Result<ReplayReport, TransportError> {
        let report = self.transport.replay().await?;
        self.metrics.frames_replayed_total.inc_by(report.replayed as f64);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use securelog_crypto::capability::NoopKmsClient;
    use securelog_resilience::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
    use securelog_transport::NoopBroker;
    use std::time::Duration;

    fn handle(dir: &std::path::Path) -> AdminHandle {
        let chain = Arc::new(IntegrityChain::new());
        let key_manager = Arc::new(
            KeyManager::new(Some(Arc::new(NoopKmsClient)), "key-1", Duration::from_secs(300), false, "/unused").unwrap(),
        );
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
        let transport = Arc::new(Transport::new("topic", Arc::new(NoopBroker), breaker, RetryPolicy::default(), dir));
        let metrics = Arc::new(PipelineMetrics::new(&prometheus::Registry::new()).unwrap());
        AdminHandle::new(chain, key_manager, transport, metrics)
    }

    #[test]
    fn reset_integrity_chain_restores_zero_head() {
        let dir = tempfile::tempdir().unwrap();
        let admin = handle(dir.path());
        let seeded = admin.chain.chain(b"some canonical bytes");
        assert_ne!(admin.chain_head().to_vec(), [0u8; 32].to_vec());
        let _ = seeded;
        admin.reset_integrity_chain();
        assert_eq!(admin.chain_head(), [0u8; 32]);
    }

    #[test]
    fn force_breaker_close_recovers_an_open_breaker() {
        let dir = tempfile::tempdir().unwrap();
        let admin = handle(dir.path());
        for _ in 0..10 {
            admin.transport.breaker().record_failure();
        }
        assert_eq!(admin.breaker_state(), securelog_resilience::BreakerState::Open);
        admin.force_breaker_close();
        assert_eq!(admin.breaker_state(), securelog_resilience::BreakerState::Closed);
    }

    #[tokio::test]
    async fn replay_fallback_with_empty_queue_reports_zero() {
        let dir = tempfile::tempdir().unwrap();
        let admin = handle(dir.path());
        let report = admin.replay_fallback().await.unwrap();
        assert_eq!(report.replayed, 0);
        assert_eq!(report.remaining, 0);
        assert_eq!(admin.metrics.frames_replayed_total.get(), 0.0);
    }

    #[tokio::test]
    async fn replay_fallback_increments_the_replayed_metric() {
        let dir = tempfile::tempdir().unwrap();
        let admin = handle(dir.path());
        securelog_transport::fallback::write_fallback_file(dir.path(), b"frame-1").unwrap();
        securelog_transport::fallback::write_fallback_file(dir.path(), b"frame-2").unwrap();

        let report = admin.replay_fallback().await.unwrap();
        assert_eq!(report.replayed, 2);
        assert_eq!(admin.metrics.frames_replayed_total.get(), 2.0);
    }
}
