//! Metrics collection for observability

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_vec_with_registry, register_histogram_with_registry, Counter, CounterVec,
    Histogram, HistogramVec, Opts, Registry,
};
use std::sync::Arc;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> =
    Lazy::new(|| Arc::new(Metrics::new().expect("Failed to initialize metrics")));

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Context compaction
    pub compactions: CounterVec,
    pub summarizations: CounterVec,
    pub context_usage_percent: Histogram,

    // Streaming sessions
    pub sessions: CounterVec,
    pub session_duration: HistogramVec,
    pub stale_writes_suppressed: Counter,
    pub persistence_failures: Counter,

    // Media jobs
    pub media_jobs: CounterVec,
    pub media_polls: CounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let compactions = register_counter_vec_with_registry!(
            Opts::new("chat_compactions_total", "Context compaction passes"),
            &["outcome"],
            registry
        )?;

        let summarizations = register_counter_vec_with_registry!(
            Opts::new("chat_summarizations_total", "Synopsis requests by status"),
            &["status"],
            registry
        )?;

        let context_usage_percent = register_histogram_with_registry!(
            "chat_context_usage_percent",
            "Share of the context budget used per compaction pass",
            vec![10.0, 25.0, 50.0, 75.0, 90.0, 100.0],
            registry
        )?;

        let sessions = register_counter_vec_with_registry!(
            Opts::new("chat_sessions_total", "Generation sessions by outcome"),
            &["outcome"],
            registry
        )?;

        let session_duration = register_histogram_vec_with_registry!(
            "chat_session_duration_seconds",
            "Generation session duration in seconds",
            &["outcome"],
            registry
        )?;

        let stale_writes_suppressed = register_counter_with_registry!(
            Opts::new(
                "chat_stale_writes_suppressed_total",
                "View updates dropped because the conversation was no longer displayed"
            ),
            registry
        )?;

        let persistence_failures = register_counter_with_registry!(
            Opts::new("chat_persistence_failures_total", "Failed durable turn writes"),
            registry
        )?;

        let media_jobs = register_counter_vec_with_registry!(
            Opts::new("chat_media_jobs_total", "Media jobs by kind and status"),
            &["kind", "status"],
            registry
        )?;

        let media_polls = register_counter_vec_with_registry!(
            Opts::new("chat_media_polls_total", "Media job status queries"),
            &["surface"],
            registry
        )?;

        Ok(Self {
            registry,
            compactions,
            summarizations,
            context_usage_percent,
            sessions,
            session_duration,
            stale_writes_suppressed,
            persistence_failures,
            media_jobs,
            media_polls,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a compaction pass
    pub fn record_compaction(&self, compacted: bool, usage_percent: f32) {
        let outcome = if compacted { "compacted" } else { "fit" };
        self.compactions.with_label_values(&[outcome]).inc();
        self.context_usage_percent.observe(usage_percent as f64);
    }

    /// Record a synopsis request (`success`, `error` or `cache_hit`)
    pub fn record_summarization(&self, status: &str) {
        self.summarizations.with_label_values(&[status]).inc();
    }

    /// Record a finished generation session
    pub fn record_session(&self, outcome: &str, seconds: f64) {
        self.sessions.with_label_values(&[outcome]).inc();
        self.session_duration
            .with_label_values(&[outcome])
            .observe(seconds);
    }

    pub fn record_stale_write(&self) {
        self.stale_writes_suppressed.inc();
    }

    pub fn record_persistence_failure(&self) {
        self.persistence_failures.inc();
    }

    /// Record a media job transition
    pub fn record_media_job(&self, kind: &str, status: &str) {
        self.media_jobs.with_label_values(&[kind, status]).inc();
    }

    /// Record a status query (`chat` or `studio`)
    pub fn record_media_poll(&self, surface: &str) {
        self.media_polls.with_label_values(&[surface]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = Metrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_record_and_export() {
        let metrics = Metrics::new().unwrap();
        metrics.record_compaction(true, 87.5);
        metrics.record_summarization("cache_hit");
        metrics.record_session("completed", 1.2);
        metrics.record_media_job("image", "completed");

        let text = metrics.export_prometheus();
        assert!(text.contains("chat_compactions_total"));
        assert!(text.contains("chat_media_jobs_total"));
    }

    #[test]
    fn test_stale_write_counter() {
        let metrics = Metrics::new().unwrap();
        metrics.record_stale_write();
        metrics.record_stale_write();
        assert_eq!(metrics.stale_writes_suppressed.get(), 2.0);
    }
}
