//! Prometheus metrics for pipeline runs

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge_vec, CounterVec,
    HistogramVec, IntGaugeVec,
};

/// Pipeline metrics collection
pub struct PipelineMetrics {
    /// Pipeline runs by outcome (`ok`, `failed`, `skipped`)
    pub runs_total: CounterVec,

    /// Entries moved to a new state
    pub entries_processed: CounterVec,

    /// Outbound checkpoint commits
    pub checkpoints_total: CounterVec,

    /// Pipeline run duration in seconds
    pub run_duration: HistogramVec,

    /// Pending entries per direction, refreshed when counted
    pub pending_entries: IntGaugeVec,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            runs_total: register_counter_vec!(
                "mqe_pipeline_runs_total",
                "Total number of pipeline runs",
                &["service", "pipeline", "outcome"]
            )
            .unwrap(),

            entries_processed: register_counter_vec!(
                "mqe_entries_processed_total",
                "Total number of queue entries moved to a new state",
                &["service", "pipeline", "state"]
            )
            .unwrap(),

            checkpoints_total: register_counter_vec!(
                "mqe_checkpoints_total",
                "Total number of outbound checkpoint commits",
                &["service"]
            )
            .unwrap(),

            run_duration: register_histogram_vec!(
                "mqe_pipeline_run_duration_seconds",
                "Pipeline run duration in seconds",
                &["service", "pipeline"],
                vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
            )
            .unwrap(),

            pending_entries: register_int_gauge_vec!(
                "mqe_pending_entries",
                "Queue entries waiting for a pipeline",
                &["service", "direction"]
            )
            .unwrap(),
        }
    }

    pub fn record_run(&self, service: &str, pipeline: &str, outcome: &str, duration_secs: f64) {
        self.runs_total
            .with_label_values(&[service, pipeline, outcome])
            .inc();
        self.run_duration
            .with_label_values(&[service, pipeline])
            .observe(duration_secs);
    }

    pub fn record_skipped(&self, service: &str, pipeline: &str) {
        self.runs_total
            .with_label_values(&[service, pipeline, "skipped"])
            .inc();
    }

    pub fn record_entry(&self, service: &str, pipeline: &str, state: &str) {
        self.entries_processed
            .with_label_values(&[service, pipeline, state])
            .inc();
    }

    pub fn record_checkpoint(&self, service: &str) {
        self.checkpoints_total.with_label_values(&[service]).inc();
    }

    pub fn set_pending(&self, service: &str, direction: &str, count: u64) {
        self.pending_entries
            .with_label_values(&[service, direction])
            .set(count as i64);
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    /// Global pipeline metrics instance
    pub static ref PIPELINE_METRICS: PipelineMetrics = PipelineMetrics::new();
}

/// Initialize pipeline metrics (idempotent)
pub fn init_pipeline_metrics() {
    lazy_static::initialize(&PIPELINE_METRICS);
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_exported() {
        init_pipeline_metrics();
        PIPELINE_METRICS.record_run("metrics-test", "outbound", "ok", 0.25);
        PIPELINE_METRICS.record_checkpoint("metrics-test");

        let text = gather_metrics();
        assert!(text.contains("mqe_pipeline_runs_total"));
        assert!(text.contains("mqe_checkpoints_total"));
    }
}
