//! Optional interceptor chain (spec.md §4.8): an ordered list of named
//! observers consulted before and after each orchestrator stage. A
//! dropped record short-circuits the rest of the chain; an interceptor
//! that errors is logged and skipped, the chain continues with the record
//! unchanged.

use crate::record::LogRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Mask,
    Chain,
    Encrypt,
    Serialize,
    Transport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Before,
    After,
}

pub trait Interceptor: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(Some(record))` continues the chain, possibly with a modified
    /// record. `Ok(None)` drops the record. `Err` is logged and treated as
    /// a pass-through of the unmodified record.
    fn intercept(&self, stage: Stage, phase: Phase, record: LogRecord) -> anyhow::Result<Option<LogRecord>>;
}

#[derive(Default)]
pub struct InterceptorChain {
    interceptors: Vec<Box<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self { interceptors: Vec::new() }
    }

    pub fn push(&mut self, interceptor: Box<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Returns `None` if any interceptor dropped the record.
    pub fn run(&self, stage: Stage, phase: Phase, mut record: LogRecord) -> Option<LogRecord> {
        for interceptor in &self.interceptors {
            match interceptor.intercept(stage, phase, record.clone()) {
                Ok(Some(updated)) => record = updated,
                Ok(None) => {
                    tracing::debug!(interceptor = interceptor.name(), ?stage, ?phase, "interceptor dropped record");
                    return None;
                }
                Err(err) => {
                    tracing::error!(interceptor = interceptor.name(), ?stage, ?phase, error = %err, "interceptor failed, bypassing");
                }
            }
        }
        Some(record)
    }
}
