//! Metrics emitted by the action queue.
//!
//! Counters go through the `metrics` facade; nothing is recorded until the
//! embedding application installs a recorder. Every counter carries an
//! `action_type` label.
//!
//! # Example
//!
//! ```rust
//! use helsinki_profile_runtime::metrics;
//!
//! // Once, after installing a recorder
//! metrics::describe_metrics();
//! ```

use metrics::{counter, describe_counter};

/// Actions started, including retries and resumes.
pub const ACTIONS_STARTED_TOTAL: &str = "action_queue_actions_started_total";

/// Actions whose executor resolved.
pub const ACTIONS_COMPLETED_TOTAL: &str = "action_queue_actions_completed_total";

/// Actions whose executor rejected.
pub const ACTIONS_FAILED_TOTAL: &str = "action_queue_actions_failed_total";

/// Register descriptions for every queue metric.
pub fn describe_metrics() {
    describe_counter!(
        ACTIONS_STARTED_TOTAL,
        "Total number of actions started by action queues"
    );
    describe_counter!(
        ACTIONS_COMPLETED_TOTAL,
        "Total number of actions that completed successfully"
    );
    describe_counter!(
        ACTIONS_FAILED_TOTAL,
        "Total number of actions that failed and halted their queue"
    );
}

pub(crate) fn record_started(action_type: &str) {
    counter!(ACTIONS_STARTED_TOTAL, "action_type" => action_type.to_string()).increment(1);
}

pub(crate) fn record_completed(action_type: &str) {
    counter!(ACTIONS_COMPLETED_TOTAL, "action_type" => action_type.to_string()).increment(1);
}

pub(crate) fn record_failed(action_type: &str) {
    counter!(ACTIONS_FAILED_TOTAL, "action_type" => action_type.to_string()).increment(1);
}
