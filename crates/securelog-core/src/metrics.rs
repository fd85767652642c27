//! Ambient observability (SPEC_FULL.md §10.5): counters and gauges for
//! everything the error-handling propagation policy (spec.md §7) resolves
//! internally rather than surfacing to the caller, the way the teacher's
//! crates expose a `*Metrics` struct registered against a `prometheus::Registry`.

use prometheus::{Counter, Gauge, Registry};

#[derive(Clone)]
pub struct PipelineMetrics {
    pub frames_sent_total: Counter,
    pub frames_fallback_total: Counter,
    pub frames_replayed_total: Counter,
    pub breaker_transitions_total: Counter,
    pub kms_failures_total: Counter,
    pub ring_buffer_drops_total: Counter,
    pub ring_buffer_depth: Gauge,
}

impl PipelineMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self {
            frames_sent_total: Counter::new("securelog_frames_sent_total", "Frames acknowledged by the broker")?,
            frames_fallback_total: Counter::new("securelog_frames_fallback_total", "Frames written to the fallback directory")?,
            frames_replayed_total: Counter::new("securelog_frames_replayed_total", "Fallback frames successfully replayed")?,
            breaker_transitions_total: Counter::new("securelog_breaker_transitions_total", "Circuit breaker state transitions")?,
            kms_failures_total: Counter::new("securelog_kms_failures_total", "Key manager / KMS failures")?,
            ring_buffer_drops_total: Counter::new("securelog_ring_buffer_drops_total", "Records dropped because the submission ring buffer was full")?,
            ring_buffer_depth: Gauge::new("securelog_ring_buffer_depth", "Current number of queued records")?,
        };

        registry.register(Box::new(metrics.frames_sent_total.clone()))?;
        registry.register(Box::new(metrics.frames_fallback_total.clone()))?;
        registry.register(Box::new(metrics.frames_replayed_total.clone()))?;
        registry.register(Box::new(metrics.breaker_transitions_total.clone()))?;
        registry.register(Box::new(metrics.kms_failures_total.clone()))?;
        registry.register(Box::new(metrics.ring_buffer_drops_total.clone()))?;
        registry.register(Box::new(metrics.ring_buffer_depth.clone()))?;

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_name_collisions() {
        let registry = Registry::new();
        let metrics = PipelineMetrics::new(&registry).unwrap();
        metrics.frames_sent_total.inc();
        assert_eq!(metrics.frames_sent_total.get(), 1.0);
    }
}
