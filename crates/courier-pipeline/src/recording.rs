// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder (Prometheus, statsd, etc.)
//! can collect these metrics. Without an installed recorder every call is a no-op.

use std::time::Duration;

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register all Courier metric descriptions.
///
/// [`crate::Pipeline::new`] calls this; describing twice is harmless.
pub fn register_metrics() {
    describe_counter!("courier_send_attempts_total", "Send attempts by job kind");
    describe_counter!(
        "courier_job_outcomes_total",
        "Terminal send job outcomes by outcome"
    );
    describe_histogram!(
        "courier_retry_delay_seconds",
        "Backoff delay chosen before a retry, in seconds"
    );
    describe_counter!(
        "courier_session_resets_total",
        "Automatic session resets after unrecoverable decryption errors"
    );
    describe_gauge!("courier_pending_jobs", "Send jobs queued or running");
}

/// Record one send attempt.
pub fn record_send_attempt(kind: &str) {
    metrics::counter!("courier_send_attempts_total", "kind" => kind.to_string()).increment(1);
}

/// Record a job's terminal outcome.
pub fn record_job_outcome(outcome: &str) {
    metrics::counter!("courier_job_outcomes_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn record_retry_delay(delay: Duration) {
    metrics::histogram!("courier_retry_delay_seconds").record(delay.as_secs_f64());
}

pub fn record_session_reset() {
    metrics::counter!("courier_session_resets_total").increment(1);
}

pub fn job_enqueued() {
    metrics::gauge!("courier_pending_jobs").increment(1.0);
}

pub fn job_finished() {
    metrics::gauge!("courier_pending_jobs").decrement(1.0);
}
