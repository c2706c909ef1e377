//! Prometheus Metrics Module
//!
//! Pre-registered metrics for the automation engine.

use lazy_static::lazy_static;
use prometheus::{
    opts, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // --- Evaluation Metrics ---

    /// Trigger evaluations (by trigger kind, result: fired|idle|skipped)
    pub static ref EVALUATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("autopilot_evaluations_total", "Trigger evaluations"),
        &["trigger", "result"]
    ).expect("FATAL: Failed to register EVALUATIONS_TOTAL metric - check for duplicate registration");

    /// Whole cycles skipped because the snapshot was unusable
    pub static ref CYCLES_SKIPPED: IntCounterVec = register_int_counter_vec!(
        opts!("autopilot_cycles_skipped_total", "Evaluation cycles skipped"),
        &["reason"]
    ).expect("FATAL: Failed to register CYCLES_SKIPPED metric - check for duplicate registration");

    /// Fires dropped because the strategy already had an execution in flight
    pub static ref DROPPED_FIRES: IntCounterVec = register_int_counter_vec!(
        opts!("autopilot_dropped_fires_total", "Fires dropped while an execution was in flight"),
        &["strategy_id"]
    ).expect("FATAL: Failed to register DROPPED_FIRES metric - check for duplicate registration");

    // --- Execution Metrics ---

    /// Execution outcomes (by action kind, disposition)
    pub static ref EXECUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("autopilot_executions_total", "Execution outcomes"),
        &["action", "outcome"]
    ).expect("FATAL: Failed to register EXECUTIONS_TOTAL metric - check for duplicate registration");

    /// Authorization failures (by reason)
    pub static ref AUTHORIZATION_FAILURES: IntCounterVec = register_int_counter_vec!(
        opts!("autopilot_authorization_failures_total", "Authorization failures"),
        &["reason"]
    ).expect("FATAL: Failed to register AUTHORIZATION_FAILURES metric - check for duplicate registration");

    /// End-to-end execution latency in seconds
    pub static ref EXECUTION_LATENCY: HistogramVec = register_histogram_vec!(
        "autopilot_execution_latency_seconds",
        "Execution latency from dispatch to terminal outcome",
        &["action"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).expect("FATAL: Failed to register EXECUTION_LATENCY metric - check for duplicate registration");

    /// Strategies auto-deactivated after repeated failures
    pub static ref STRATEGIES_DEACTIVATED: IntCounterVec = register_int_counter_vec!(
        opts!("autopilot_strategies_deactivated_total", "Strategies deactivated for review"),
        &["strategy_id"]
    ).expect("FATAL: Failed to register STRATEGIES_DEACTIVATED metric - check for duplicate registration");

    /// Ledger records whose sink mirror failed after retries
    pub static ref LEDGER_PERSISTENCE_FAILURES: IntCounter = register_int_counter!(
        opts!("autopilot_ledger_persistence_failures_total", "Ledger records kept in memory only")
    ).expect("FATAL: Failed to register LEDGER_PERSISTENCE_FAILURES metric - check for duplicate registration");

    /// Submissions parked waiting on the execution layer
    pub static ref PENDING_SUBMISSIONS: IntGauge = register_int_gauge!(
        opts!("autopilot_pending_submissions", "Submissions awaiting reconciliation")
    ).expect("FATAL: Failed to register PENDING_SUBMISSIONS metric - check for duplicate registration");
}

pub fn record_evaluation(trigger: &str, result: &str) {
    EVALUATIONS_TOTAL.with_label_values(&[trigger, result]).inc();
}

pub fn record_cycle_skipped(reason: &str) {
    CYCLES_SKIPPED.with_label_values(&[reason]).inc();
}

pub fn record_dropped_fire(strategy_id: &str) {
    DROPPED_FIRES.with_label_values(&[strategy_id]).inc();
}

pub fn record_execution(action: &str, outcome: &str) {
    EXECUTIONS_TOTAL.with_label_values(&[action, outcome]).inc();
}

pub fn record_execution_latency(action: &str, latency_secs: f64) {
    EXECUTION_LATENCY
        .with_label_values(&[action])
        .observe(latency_secs);
}

pub fn record_authorization_failure(reason: &str) {
    AUTHORIZATION_FAILURES.with_label_values(&[reason]).inc();
}

pub fn record_deactivation(strategy_id: &str) {
    STRATEGIES_DEACTIVATED.with_label_values(&[strategy_id]).inc();
}

pub fn record_persistence_failure() {
    LEDGER_PERSISTENCE_FAILURES.inc();
}

pub fn set_pending_submissions(count: usize) {
    PENDING_SUBMISSIONS.set(count as i64);
}

/// Get metrics as text for the /metrics endpoint. Encoding errors yield an
/// empty body rather than a panic.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode Prometheus metrics: {}", e);
        return String::new();
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Prometheus metrics buffer is not valid UTF-8: {}", e);
            String::new()
        }
    }
}
