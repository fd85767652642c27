//! `PipelineConfig` (spec.md §6): the recognized configuration surface,
//! loadable from a TOML file with an environment overlay via the `config`
//! crate, the way the teacher's enterprise crates layer configuration.
//!
//! Enqueue policy once the submission core stops accepting new work
//! (DRAINING/STOPPED): a late `enqueue()` call is treated as a successful,
//! fallback-diverted write rather than a fast failure — the record still
//! reaches disk, just not through the broker, so a producer racing a
//! shutdown never sees a spurious error for a record that was in fact
//! durably persisted.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubmissionMode {
    Sync,
    Async,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: SubmissionMode,
    pub buffer_size: usize,
    pub consumer_threads: usize,

    pub pii_masking_enabled: bool,
    pub pii_patterns: Vec<String>,

    pub encryption_enabled: bool,
    pub integrity_enabled: bool,

    pub kms_key_id: Option<String>,
    pub kms_region: Option<String>,
    pub kms_role: Option<String>,
    pub kms_timeout_ms: u64,
    pub kms_fallback_enabled: bool,

    pub broker_bootstrap: Option<String>,
    pub broker_topic: String,
    pub broker_acks: Option<String>,
    pub broker_retries: u32,
    pub broker_batch_size: Option<u32>,
    pub broker_linger_ms: Option<u64>,
    pub broker_compression: Option<String>,
    pub broker_max_block_ms: u64,
    pub broker_security_protocol: Option<String>,

    pub fallback_directory: PathBuf,
    pub circuit_failure_threshold: u32,
    /// Admission rate into the transport boundary's token bucket. A value
    /// of `0` disables rate limiting entirely.
    pub rate_limit_logs_per_second: u32,
    pub compression_level: i32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: SubmissionMode::Async,
            buffer_size: 1024,
            consumer_threads: 2,
            pii_masking_enabled: true,
            pii_patterns: Vec::new(),
            encryption_enabled: true,
            integrity_enabled: true,
            kms_key_id: None,
            kms_region: None,
            kms_role: None,
            kms_timeout_ms: 2_000,
            kms_fallback_enabled: false,
            broker_bootstrap: None,
            broker_topic: "app-logs".to_string(),
            broker_acks: None,
            broker_retries: 3,
            broker_batch_size: None,
            broker_linger_ms: None,
            broker_compression: None,
            broker_max_block_ms: 5_000,
            broker_security_protocol: None,
            fallback_directory: PathBuf::from("./securelog-fallback"),
            circuit_failure_threshold: 5,
            rate_limit_logs_per_second: 10_000,
            compression_level: 3,
        }
    }
}

impl PipelineConfig {
    /// Load from an optional TOML file, overlaid by `SECURELOG_*`
    /// environment variables (e.g. `SECURELOG_COMPRESSION_LEVEL=19`).
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default()).map_err(|e| {
                PipelineError::Configuration(format!("failed to seed defaults: {e}"))
            })?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("SECURELOG").separator("_"));

        let raw: Self = builder
            .build()
            .map_err(|e| PipelineError::Configuration(e.to_string()))?
            .try_deserialize()
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;

        raw.validate()?;
        Ok(raw)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(1..=22).contains(&self.compression_level) {
            return Err(PipelineError::Configuration(format!(
                "compression_level {} is outside 1..=22",
                self.compression_level
            )));
        }
        if self.buffer_size == 0 {
            return Err(PipelineError::Configuration("buffer_size must be nonzero".to_string()));
        }
        if !self.buffer_size.is_power_of_two() {
            return Err(PipelineError::Configuration("buffer_size should be a power of two".to_string()));
        }
        if self.consumer_threads == 0 {
            return Err(PipelineError::Configuration("consumer_threads must be at least 1".to_string()));
        }
        if self.kms_key_id.is_none() && !self.kms_fallback_enabled {
            return Err(PipelineError::Configuration(
                "kms_key_id is absent and kms_fallback_enabled is false".to_string(),
            ));
        }
        if self.circuit_failure_threshold == 0 {
            return Err(PipelineError::Configuration("circuit_failure_threshold must be at least 1".to_string()));
        }
        Ok(())
    }
}
