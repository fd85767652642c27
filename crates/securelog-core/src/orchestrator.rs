//! The Pipeline Orchestrator (spec.md §4.8): fixed-order mask → chain →
//! encrypt → serialize → transport, each stage conditionally enabled by
//! configuration, with per-stage error containment that always diverts to
//! the fallback path in the record's last safe (masked) form rather than
//! ever letting plaintext leak downstream.

use std::sync::Arc;

use serde_json::{Map, Value};

use securelog_crypto::KeyManager;
use securelog_integrity::{ChainInput, ExceptionRef, IntegrityChain};
use securelog_masking::{EmergencyConfig, FieldAnnotations, MaskingRules};
use securelog_serializer::SerializerConfig;
use securelog_transport::Transport;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::interceptor::{InterceptorChain, Phase, Stage};
use crate::metrics::PipelineMetrics;
use crate::record::LogRecord;

pub struct PipelineOrchestrator {
    masking_enabled: bool,
    integrity_enabled: bool,
    encryption_enabled: bool,
    masking_rules: MaskingRules,
    annotations: FieldAnnotations,
    emergency: Option<EmergencyConfig>,
    chain: Arc<IntegrityChain>,
    key_manager: Arc<KeyManager>,
    serializer_config: SerializerConfig,
    transport: Arc<Transport>,
    interceptors: Arc<InterceptorChain>,
    metrics: Arc<PipelineMetrics>,
}

impl PipelineOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &PipelineConfig,
        masking_rules: MaskingRules,
        annotations: FieldAnnotations,
        emergency: Option<EmergencyConfig>,
        chain: Arc<IntegrityChain>,
        key_manager: Arc<KeyManager>,
        transport: Arc<Transport>,
        interceptors: Arc<InterceptorChain>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, PipelineError> {
        let serializer_config = SerializerConfig::new(
            config.compression_level,
            securelog_serializer::DEFAULT_MAX_PAYLOAD_SIZE,
        )
        .map_err(|e| PipelineError::Configuration(e.to_string()))?;

        Ok(Self {
            masking_enabled: config.pii_masking_enabled,
            integrity_enabled: config.integrity_enabled,
            encryption_enabled: config.encryption_enabled,
            masking_rules,
            annotations,
            emergency,
            chain,
            key_manager,
            serializer_config,
            transport,
            interceptors,
            metrics,
        })
    }

    /// Runs the fixed stage sequence. Never returns a Transport/KMS/Crypto
    /// error to the caller (per spec.md §7's propagation policy) — those
    /// are absorbed here, diverting the record to fallback in its last safe
    /// form. Only an I/O failure while *writing* the fallback file itself
    /// propagates, since there is nowhere left to put the record.
    #[tracing::instrument(skip_all, fields(trace_id = record.trace_id.as_deref()))]
    pub async fn process(&self, record: LogRecord) -> Result<(), PipelineError> {
        // Mask first, unconditionally: every later diversion to fallback
        // re-uses `masked` as the last safe form, so it must exist before
        // anything that can fail.
        let Some(record) = self.run_before(Stage::Mask, record) else { return Ok(()) };
        let masked = self.apply_mask(record);
        let Some(masked) = self.run_after(Stage::Mask, masked) else { return Ok(()) };

        let Some(record) = self.run_before(Stage::Chain, masked.clone()) else { return Ok(()) };
        let chained = match self.apply_chain(record) {
            Ok(record) => record,
            Err(err) => {
                tracing::error!(error = %err, "integrity chain stage failed, diverting masked record to fallback");
                return self.divert_masked(masked).await;
            }
        };
        let Some(chained) = self.run_after(Stage::Chain, chained) else { return Ok(()) };

        let Some(record) = self.run_before(Stage::Encrypt, chained) else { return Ok(()) };
        let encrypted = match self.apply_encrypt(record) {
            Ok(record) => record,
            Err(err) => {
                tracing::error!(error = %err, "envelope encryption stage failed, diverting masked record to fallback");
                return self.divert_masked(masked).await;
            }
        };
        let Some(encrypted) = self.run_after(Stage::Encrypt, encrypted) else { return Ok(()) };

        let Some(record) = self.run_before(Stage::Serialize, encrypted) else { return Ok(()) };
        let frame = match securelog_serializer::serialize(&record_to_value(&record), &self.serializer_config) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(error = %err, "serialization stage failed, diverting masked record to fallback");
                return self.divert_masked(masked).await;
            }
        };

        if self.run_before(Stage::Transport, record).is_none() {
            return Ok(());
        }
        match self.transport.send(frame).await {
            Ok(securelog_transport::SendOutcome::Sent) => {
                self.metrics.frames_sent_total.inc();
            }
            Ok(securelog_transport::SendOutcome::Fallback) => {
                self.metrics.frames_fallback_total.inc();
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Shutdown-drain path: mask + encrypt only (no chain, no broker
    /// attempt), straight to the fallback queue, so in-flight records are
    /// never lost and never leak plaintext even mid-shutdown.
    pub async fn process_fallback(&self, record: LogRecord) -> Result<(), PipelineError> {
        let masked = self.apply_mask(record);
        let encrypted = self.apply_encrypt(masked.clone()).unwrap_or(masked);
        let frame = securelog_serializer::serialize(&record_to_value(&encrypted), &self.serializer_config)?;
        self.transport.write_fallback_only(&frame)?;
        self.metrics.frames_fallback_total.inc();
        Ok(())
    }

    async fn divert_masked(&self, masked: LogRecord) -> Result<(), PipelineError> {
        // Re-mask defensively: if an earlier stage somehow handed back a
        // record whose payload was never masked, this still fails closed.
        let safe = if self.masking_enabled { self.apply_mask(masked) } else { masked };
        let frame = securelog_serializer::serialize(&record_to_value(&safe), &self.serializer_config)?;
        self.transport.write_fallback_only(&frame)?;
        self.metrics.frames_fallback_total.inc();
        Ok(())
    }

    fn run_before(&self, stage: Stage, record: LogRecord) -> Option<LogRecord> {
        self.interceptors.run(stage, Phase::Before, record)
    }

    fn run_after(&self, stage: Stage, record: LogRecord) -> Option<LogRecord> {
        self.interceptors.run(stage, Phase::After, record)
    }

    fn apply_mask(&self, record: LogRecord) -> LogRecord {
        if !self.masking_enabled {
            return record;
        }
        let masked_payload = securelog_masking::mask_payload(
            &record.payload,
            &self.masking_rules,
            Some(&self.annotations),
            self.emergency.as_ref(),
        );
        LogRecord { payload: masked_payload, ..record }
    }

    fn apply_chain(&self, record: LogRecord) -> Result<LogRecord, securelog_integrity::IntegrityError> {
        if !self.integrity_enabled {
            return Ok(record);
        }
        let exception = record.exception.as_ref().map(|e| ExceptionRef { class_name: &e.class_name, message: &e.message });
        let level = format!("{:?}", record.level).to_uppercase();
        let input = ChainInput {
            timestamp_ms: record.timestamp_ms as i64,
            level: &level,
            trace_id: record.trace_id.as_deref(),
            span_id: record.span_id.as_deref(),
            message: &record.message,
            payload: &record.payload,
            context: &record.context,
            exception,
        };
        let canon = securelog_integrity::canon(&input)?;
        let chained = self.chain.chain(&canon);
        Ok(LogRecord { integrity: Some(chained.integrity_field), ..record })
    }

    fn apply_encrypt(&self, record: LogRecord) -> Result<LogRecord, securelog_crypto::CryptoError> {
        if !self.encryption_enabled {
            return Ok(record);
        }
        let plaintext = serde_json::to_vec(&Value::Object(record.payload.clone()))
            .map_err(|e| securelog_crypto::CryptoError::EncryptionFailed(e.to_string()))?;
        let aad = record.trace_id.clone().unwrap_or_default();
        let envelope = securelog_crypto::envelope::encrypt(&self.key_manager, &plaintext, aad.as_bytes())?;

        let mut payload = Map::new();
        payload.insert("encrypted".to_string(), Value::String(envelope.encrypted_payload_b64));
        Ok(LogRecord { payload, wrapped_dek: Some(envelope.wrapped_dek_b64), ..record })
    }
}

fn record_to_value(record: &LogRecord) -> Value {
    serde_json::to_value(record).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Severity;
    use securelog_crypto::capability::NoopKmsClient;
    use securelog_masking::MaskingRules;
    use securelog_resilience::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
    use securelog_transport::NoopBroker;
    use std::sync::Arc;
    use std::time::Duration;

    fn make_orchestrator(dir: &std::path::Path) -> PipelineOrchestrator {
        let config = PipelineConfig { kms_fallback_enabled: true, ..PipelineConfig::default() };
        let key_manager = Arc::new(
            KeyManager::new(Some(Arc::new(NoopKmsClient)), "key-1", Duration::from_secs(300), false, "/unused").unwrap(),
        );
        let chain = Arc::new(IntegrityChain::new());
        let transport = Arc::new(Transport::new(
            "topic",
            Arc::new(NoopBroker),
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
            RetryPolicy::default(),
            dir,
        ));
        let metrics = Arc::new(PipelineMetrics::new(&prometheus::Registry::new()).unwrap());
        PipelineOrchestrator::new(
            &config,
            MaskingRules::with_defaults(),
            FieldAnnotations::default(),
            None,
            chain,
            key_manager,
            transport,
            Arc::new(InterceptorChain::new()),
            metrics,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn process_masks_chains_encrypts_and_sends() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = make_orchestrator(dir.path());

        let mut payload = Map::new();
        payload.insert("password".to_string(), Value::String("hunter2".to_string()));
        let record = LogRecord::new(Severity::Info, "login attempt").with_payload(payload);

        orchestrator.process(record).await.unwrap();
    }

    #[tokio::test]
    async fn process_fallback_never_calls_the_broker() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = make_orchestrator(dir.path());
        let record = LogRecord::new(Severity::Warn, "shutdown drain");
        orchestrator.process_fallback(record).await.unwrap();
        assert_eq!(securelog_transport::fallback::list_fallback_files(dir.path()).unwrap().len(), 1);
    }

    struct CapturingBroker {
        sent: std::sync::Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait::async_trait]
    impl securelog_transport::Broker for CapturingBroker {
        async fn send(&self, _topic: &str, bytes: Vec<u8>) -> Result<(), securelog_transport::BrokerError> {
            self.sent.lock().unwrap().push(bytes);
            Ok(())
        }
        async fn flush(&self) -> Result<(), securelog_transport::BrokerError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), securelog_transport::BrokerError> {
            Ok(())
        }
    }

    /// The compressed + encrypted frame that reaches the broker must never
    /// contain the secret value verbatim, nor its base64 encoding, even
    /// though `ssn` matches a masking pattern that would otherwise preserve
    /// its last four digits in the *masked* display form.
    #[tokio::test]
    async fn encrypted_frame_never_carries_the_original_secret_value() {
        let dir = tempfile::tempdir().unwrap();
        let secret = "this-exact-value-must-never-leave-the-pipeline";

        let config = PipelineConfig { kms_fallback_enabled: true, ..PipelineConfig::default() };
        let key_manager = Arc::new(
            KeyManager::new(Some(Arc::new(NoopKmsClient)), "key-1", Duration::from_secs(300), false, "/unused").unwrap(),
        );
        let chain = Arc::new(IntegrityChain::new());
        let broker = Arc::new(CapturingBroker { sent: std::sync::Mutex::new(Vec::new()) });
        let transport = Arc::new(Transport::new(
            "topic",
            broker.clone(),
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
            RetryPolicy::default(),
            dir.path(),
        ));
        let metrics = Arc::new(PipelineMetrics::new(&prometheus::Registry::new()).unwrap());
        let orchestrator = PipelineOrchestrator::new(
            &config,
            MaskingRules::with_defaults(),
            FieldAnnotations::default(),
            None,
            chain,
            key_manager,
            transport,
            Arc::new(InterceptorChain::new()),
            metrics,
        )
        .unwrap();

        let mut payload = Map::new();
        payload.insert("password".to_string(), Value::String(secret.to_string()));
        let record = LogRecord::new(Severity::Info, "login attempt").with_payload(payload);
        orchestrator.process(record).await.unwrap();

        let sent = broker.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let frame = &sent[0];
        let secret_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, secret.as_bytes());

        assert!(!frame.windows(secret.len()).any(|w| w == secret.as_bytes()));
        assert!(!frame.windows(secret_b64.len()).any(|w| w == secret_b64.as_bytes()));
    }
}
