//! Metrics collection for observability

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_with_registry, Counter, CounterVec, Encoder, Histogram, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> =
    Lazy::new(|| Arc::new(Metrics::new().expect("Failed to initialize metrics")));

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Session metrics
    pub submissions: CounterVec,
    pub urgent_submissions: Counter,
    pub resets: Counter,

    // Stream metrics
    pub streams: CounterVec,
    pub stream_chunks: Counter,
    pub stream_duration: Histogram,

    // Completion service metrics
    pub completion_attempts: CounterVec,
    pub completion_fallbacks: Counter,
    pub completion_circuit_open: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let submissions = register_counter_vec_with_registry!(
            Opts::new("companion_submissions_total", "User submissions by outcome"),
            &["outcome"],
            registry
        )?;

        let urgent_submissions = register_counter_with_registry!(
            Opts::new("companion_urgent_submissions_total", "Submissions classified as urgent"),
            registry
        )?;

        let resets = register_counter_with_registry!(
            Opts::new("companion_resets_total", "Conversation resets"),
            registry
        )?;

        let streams = register_counter_vec_with_registry!(
            Opts::new("companion_streams_total", "Answer streams by terminal state"),
            &["outcome"],
            registry
        )?;

        let stream_chunks = register_counter_with_registry!(
            Opts::new("companion_stream_chunks_total", "Chunks appended to the transcript"),
            registry
        )?;

        let stream_duration = register_histogram_with_registry!(
            "companion_stream_duration_seconds",
            "Time from submission to terminal stream state",
            registry
        )?;

        let completion_attempts = register_counter_vec_with_registry!(
            Opts::new("companion_completion_attempts_total", "Completion requests per model"),
            &["model", "status"],
            registry
        )?;

        let completion_fallbacks = register_counter_with_registry!(
            Opts::new("companion_completion_fallbacks_total", "Answers served by a fallback model"),
            registry
        )?;

        let completion_circuit_open = register_counter_vec_with_registry!(
            Opts::new(
                "companion_completion_circuit_open_total",
                "Models skipped by an open breaker"
            ),
            &["model"],
            registry
        )?;

        Ok(Self {
            registry,
            submissions,
            urgent_submissions,
            resets,
            streams,
            stream_chunks,
            stream_duration,
            completion_attempts,
            completion_fallbacks,
            completion_circuit_open,
        })
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
