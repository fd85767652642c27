//! securelog-core: wires the masking, integrity, crypto, serializer, and
//! transport crates into the fixed pipeline (spec.md §1) behind a small
//! producer-facing facade plus an administrative handle.
//!
//! ```ignore
//! let pipeline = Pipeline::start(config, kms_client, broker)?;
//! pipeline.log(Severity::Info, "user logged in", payload, None)?;
//! pipeline.shutdown(Duration::from_secs(5));
//! ```

pub mod config;
pub mod error;
pub mod handle;
pub mod interceptor;
pub mod metrics;
pub mod orchestrator;
pub mod record;
pub mod submission;

pub use config::{PipelineConfig, SubmissionMode};
pub use error::PipelineError;
pub use handle::AdminHandle;
pub use interceptor::{Interceptor, InterceptorChain, Phase, Stage};
pub use metrics::PipelineMetrics;
pub use orchestrator::PipelineOrchestrator;
pub use record::{ExceptionDescriptor, LogRecord, Severity};
pub use submission::{CapacityPolicy, CoreState, SubmissionCore};

use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;

use securelog_crypto::capability::KmsClient;
use securelog_crypto::KeyManager;
use securelog_integrity::IntegrityChain;
use securelog_masking::{FieldAnnotations, MaskingRules};
use securelog_resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimiter, RetryPolicy};
use securelog_transport::{Broker, Transport};

/// The assembled pipeline: owns the submission core (when `mode ==
/// ASYNC`) and exposes the producer-facing `log` call plus an
/// [`AdminHandle`] for operator controls.
pub struct Pipeline {
    mode: SubmissionMode,
    orchestrator: Arc<PipelineOrchestrator>,
    core: Option<SubmissionCore>,
    admin: AdminHandle,
    metrics: Arc<PipelineMetrics>,
    /// Only populated for SYNC/FALLBACK mode, which need to drive the async
    /// orchestrator from a synchronous `log()` call. ASYNC mode routes
    /// through `SubmissionCore`, which owns its own runtime.
    runtime: Option<Arc<tokio::runtime::Runtime>>,
}

impl Pipeline {
    /// Assembles every stage from `config` and the two externally supplied
    /// capabilities (spec.md §6): a KMS client (`None` only valid alongside
    /// `kms_fallback_enabled`) and a broker client. Both are user-supplied
    /// because their concrete transports (a managed KMS, a message broker)
    /// are deployment-specific collaborators, not part of this pipeline.
    pub fn start(
        config: PipelineConfig,
        kms: Option<Arc<dyn KmsClient>>,
        broker: Arc<dyn Broker>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let masking_rules = MaskingRules::with_defaults();
        let annotations = FieldAnnotations::default();
        let chain = Arc::new(IntegrityChain::new());

        let registry = prometheus::Registry::new();
        let metrics = Arc::new(PipelineMetrics::new(&registry).map_err(|e| PipelineError::Configuration(e.to_string()))?);

        let key_manager = Arc::new(
            KeyManager::new(
                kms,
                config.kms_key_id.clone().unwrap_or_else(|| "securelog-dev".to_string()),
                Duration::from_millis(config.kms_timeout_ms.max(1)),
                config.kms_fallback_enabled,
                config.fallback_directory.clone(),
            )
            .map_err(PipelineError::Crypto)?
            .with_kms_failure_counter(metrics.kms_failures_total.clone()),
        );

        let breaker = Arc::new(
            CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: config.circuit_failure_threshold,
                ..CircuitBreakerConfig::default()
            })
            .with_metrics(metrics.breaker_transitions_total.clone()),
        );
        let mut transport = Transport::new(
            config.broker_topic.clone(),
            broker,
            breaker,
            RetryPolicy { max_attempts: config.broker_retries.max(1), ..RetryPolicy::default() },
            config.fallback_directory.clone(),
        );
        if config.rate_limit_logs_per_second > 0 {
            let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_logs_per_second, config.rate_limit_logs_per_second));
            transport = transport.with_rate_limiter(rate_limiter);
        }
        let transport = Arc::new(transport);

        let interceptors = Arc::new(InterceptorChain::new());

        let orchestrator = Arc::new(PipelineOrchestrator::new(
            &config,
            masking_rules,
            annotations,
            None,
            chain.clone(),
            key_manager.clone(),
            transport.clone(),
            interceptors,
            metrics.clone(),
        )?);

        let admin = AdminHandle::new(chain, key_manager, transport, metrics.clone());

        let (core, runtime) = match config.mode {
            SubmissionMode::Async => {
                let core = SubmissionCore::start(
                    config.buffer_size,
                    config.consumer_threads,
                    CapacityPolicy::DropNewest,
                    orchestrator.clone(),
                    metrics.clone(),
                )?;
                (Some(core), None)
            }
            SubmissionMode::Sync | SubmissionMode::Fallback => {
                let runtime = Arc::new(
                    tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .map_err(|e| PipelineError::Configuration(format!("failed to start runtime: {e}")))?,
                );
                (None, Some(runtime))
            }
        };

        Ok(Self { mode: config.mode, orchestrator, core, admin, metrics, runtime })
    }

    /// Submits one record according to `mode` (spec.md §6): `ASYNC` enqueues
    /// onto the ring buffer for a consumer worker to process; `SYNC` runs
    /// the full pipeline on the calling thread; `FALLBACK` always writes
    /// straight to the on-disk queue, skipping the broker entirely.
    pub fn log(
        &self,
        level: Severity,
        message: impl Into<String>,
        payload: Option<Map<String, serde_json::Value>>,
        exception: Option<ExceptionDescriptor>,
    ) -> Result<(), PipelineError> {
        let mut record = LogRecord::new(level, message);
        if let Some(payload) = payload {
            record = record.with_payload(payload);
        }
        if let Some(exception) = exception {
            record = record.with_exception(exception);
        }
        self.submit(record)
    }

    pub fn submit(&self, record: LogRecord) -> Result<(), PipelineError> {
        match self.mode {
            SubmissionMode::Async => {
                let core = self.core.as_ref().expect("ASYNC mode always constructs a submission core");
                core.enqueue(record)
            }
            SubmissionMode::Sync => {
                let runtime = self.runtime.as_ref().expect("SYNC mode always constructs a runtime");
                runtime.block_on(self.orchestrator.process(record))
            }
            SubmissionMode::Fallback => {
                let runtime = self.runtime.as_ref().expect("FALLBACK mode always constructs a runtime");
                runtime.block_on(self.orchestrator.process_fallback(record))
            }
        }
    }

    pub fn admin(&self) -> AdminHandle {
        self.admin.clone()
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    pub fn depth(&self) -> usize {
        self.core.as_ref().map_or(0, SubmissionCore::depth)
    }

    /// Stops accepting new records, drains the ring buffer (ASYNC mode) for
    /// up to `drain_timeout`, and diverts whatever is still queued to
    /// fallback rather than dropping it.
    pub fn shutdown(self, drain_timeout: Duration) {
        if let Some(core) = self.core {
            core.shutdown(drain_timeout);
        }
    }
}
