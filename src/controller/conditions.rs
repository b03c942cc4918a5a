//! Condition management helpers following Kubernetes API conventions
//!
//! Conditions are upserted by type and never removed: an absent `Synced`
//! condition means a sync was never attempted, which is different from
//! `Synced=False`.

use chrono::Utc;

use crate::crd::Condition;

/// Standard condition types
pub const CONDITION_TYPE_READY: &str = "Ready";
pub const CONDITION_TYPE_SYNCED: &str = "Synced";
pub const CONDITION_TYPE_ERROR: &str = "Error";
pub const CONDITION_TYPE_DELETING: &str = "Deleting";

/// Standard condition statuses
pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";
pub const CONDITION_STATUS_UNKNOWN: &str = "Unknown";

fn status_str(status: bool) -> &'static str {
    if status {
        CONDITION_STATUS_TRUE
    } else {
        CONDITION_STATUS_FALSE
    }
}

/// Update or add a condition to the conditions list
///
/// When an entry of the same type already carries the same status, reason and
/// message, only its observed generation is refreshed and the transition time
/// is left alone. Otherwise every field is overwritten and the transition time
/// is set to now. New types are appended, so entries keep the order in which
/// they first appeared.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        let unchanged =
            existing.status == status && existing.reason == reason && existing.message == message;

        if !unchanged {
            existing.status = status.to_string();
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.last_transition_time = Utc::now().to_rfc3339();
        }
        existing.observed_generation = observed_generation;
    } else {
        conditions.push(Condition::new(
            type_,
            status,
            reason,
            message,
            observed_generation,
        ));
    }
}

pub fn set_ready(
    conditions: &mut Vec<Condition>,
    ready: bool,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) {
    set_condition(
        conditions,
        CONDITION_TYPE_READY,
        status_str(ready),
        reason,
        message,
        observed_generation,
    );
}

pub fn set_synced(
    conditions: &mut Vec<Condition>,
    synced: bool,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) {
    set_condition(
        conditions,
        CONDITION_TYPE_SYNCED,
        status_str(synced),
        reason,
        message,
        observed_generation,
    );
}

pub fn set_error(
    conditions: &mut Vec<Condition>,
    error: bool,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) {
    set_condition(
        conditions,
        CONDITION_TYPE_ERROR,
        status_str(error),
        reason,
        message,
        observed_generation,
    );
}

/// Only used while a finalizer is running
pub fn set_deleting(
    conditions: &mut Vec<Condition>,
    deleting: bool,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) {
    set_condition(
        conditions,
        CONDITION_TYPE_DELETING,
        status_str(deleting),
        reason,
        message,
        observed_generation,
    );
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Check if a condition is true
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}
