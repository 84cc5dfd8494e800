//! Metrics instrumentation.
//!
//! Emits through the `metrics` facade; installing a recorder (and exposing
//! a scrape endpoint) is the embedding application's concern. Without a
//! recorder every call is a no-op.
//!
//! ## Metrics
//!
//! ### Counters
//! - `flowline_executions_total` - Finished executions by status and trigger
//! - `flowline_actions_total` - Executed actions by action_type and status
//!
//! ### Histograms
//! - `flowline_execution_duration_seconds` - Execution duration by workflow
//! - `flowline_action_duration_seconds` - Action duration by action_type
//!
//! ### Gauges
//! - `flowline_active_executions` - Currently running executions

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a finished execution.
pub fn record_execution(status: &str, trigger: &str) {
    counter!(
        "flowline_executions_total",
        "status" => status.to_string(),
        "trigger" => trigger.to_string()
    )
    .increment(1);
}

/// Record execution duration.
pub fn record_execution_duration(duration: Duration, workflow_name: &str) {
    histogram!(
        "flowline_execution_duration_seconds",
        "workflow" => workflow_name.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Increment active executions gauge.
pub fn inc_active_executions() {
    gauge!("flowline_active_executions").increment(1.0);
}

/// Decrement active executions gauge.
pub fn dec_active_executions() {
    gauge!("flowline_active_executions").decrement(1.0);
}

/// Record an executed action.
pub fn record_action(action_type: &str, status: &str) {
    counter!(
        "flowline_actions_total",
        "action_type" => action_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record action duration.
pub fn record_action_duration(duration: Duration, action_type: &str) {
    histogram!(
        "flowline_action_duration_seconds",
        "action_type" => action_type.to_string()
    )
    .record(duration.as_secs_f64());
}
