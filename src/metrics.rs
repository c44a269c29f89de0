//! # Telemetry
//! Metric registration and the counter helpers used by the orchestrator.
//! The `metrics` facade only — installing a recorder (Prometheus or
//! otherwise) is the embedding service's job.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;

use crate::error::ErrorClass;

/// One-time metric registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "scoring_requests_total",
            "Scoring calls admitted past rate-limit and concurrency checks."
        );
        describe_counter!(
            "scoring_rejected_total",
            "Scoring calls rejected at admission (rate limit or overload)."
        );
        describe_counter!(
            "scoring_chunks_total",
            "Sub-batches dispatched to the model."
        );
        describe_counter!(
            "scoring_chunk_errors_total",
            "Sub-batches downgraded to placeholders, labelled by error class."
        );
        describe_counter!(
            "scoring_retries_total",
            "Extra model attempts beyond the first, across all chunks."
        );
        describe_histogram!("scoring_latency_ms", "Whole-call latency in milliseconds.");
    });
}

pub fn record_chunk_error(class: ErrorClass) {
    counter!("scoring_chunk_errors_total", "class" => class.counter_key()).increment(1);
}

pub fn record_call_latency(ms: f64) {
    histogram!("scoring_latency_ms").record(ms);
}
