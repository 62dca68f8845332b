//! Prometheus metrics for the measurement engine.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration
//! failure means duplicate metric names, a fatal startup defect that
//! must crash immediately. These panics only occur during static
//! initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};

/// Total attempts created, by first-leg side.
pub static ATTEMPTS_CREATED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pairscope_attempts_created_total",
        "Total attempts created",
        &["side"]
    )
    .unwrap()
});

/// Total attempts completed, by outcome and fail reason.
pub static ATTEMPTS_COMPLETED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pairscope_attempts_completed_total",
        "Total attempts completed",
        &["status", "reason"]
    )
    .unwrap()
});

/// Total evaluator cycles run.
pub static CYCLES_RUN_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("pairscope_cycles_run_total", "Total evaluator cycles run").unwrap()
});

/// Total cycles skipped (feed gap, empty book, scheduler overload).
pub static CYCLES_SKIPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pairscope_cycles_skipped_total",
        "Total cycles skipped",
        &["reason"]
    )
    .unwrap()
});

/// Total stream reconnect attempts.
pub static WS_RECONNECTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pairscope_ws_reconnects_total",
        "Total stream reconnect attempts"
    )
    .unwrap()
});

/// Total stream events applied, by kind.
pub static STREAM_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pairscope_stream_events_total",
        "Total stream events applied to mirrors",
        &["kind"]
    )
    .unwrap()
});

/// Total anomalies recorded, by kind.
pub static ANOMALIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pairscope_anomalies_total",
        "Total data-quality anomalies",
        &["kind"]
    )
    .unwrap()
});

/// Durable-writer queue depth.
pub static WRITER_QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "pairscope_writer_queue_depth",
        "Commands buffered in the durable writer"
    )
    .unwrap()
});

/// Active monitors.
pub static MONITORS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("pairscope_monitors_active", "Monitors in ACTIVE state").unwrap()
});

/// Log a one-shot summary of the counters that matter at shutdown.
pub fn log_shutdown_summary() {
    tracing::info!(
        cycles_run = CYCLES_RUN_TOTAL.get(),
        ws_reconnects = WS_RECONNECTS_TOTAL.get(),
        writer_queue_depth = WRITER_QUEUE_DEPTH.get(),
        "Metrics summary"
    );
}
