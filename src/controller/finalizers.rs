//! Finalizer cleanup orchestration
//!
//! While a record carries a deletion timestamp and our finalizer, the external
//! entity has to be deleted before Kubernetes may remove the record. The
//! orchestrator guarantees that this side effect either completes, is
//! explicitly skipped, or is abandoned after a timeout:
//!
//! 1. The first cleanup attempt stamps `cleanup-started-at` (never overwritten).
//! 2. `skip-cleanup: "true"` bypasses the external delete.
//! 3. A failed delete is retried with a 30s..5m backoff until the timeout,
//!    after which the finalizer is released anyway and a warning event tells
//!    operators the external entity may still exist.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::conditions::set_deleting;
use super::events::{emit, reasons, EventSink, EventType};
use crate::crd::Condition;
use crate::error::Result;

/// Finalizer name protecting managed resources
pub const FINALIZER: &str = "uptime-k8s.io/finalizer";

/// RFC 3339 time of the first cleanup attempt
pub const CLEANUP_STARTED_ANNOTATION: &str = "uptime-k8s.io/cleanup-started-at";

/// `"true"` skips the external delete
pub const SKIP_CLEANUP_ANNOTATION: &str = "uptime-k8s.io/skip-cleanup";

pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(600);

const CLEANUP_BACKOFF_BASE_SECS: u64 = 30;
const CLEANUP_BACKOFF_MAX_SECS: u64 = 300;

pub const REASON_SUCCESS: &str = "Success";
pub const REASON_SKIPPED: &str = "Skipped";
pub const REASON_ERROR: &str = "Error";
pub const REASON_TIMEOUT: &str = "Timeout";

/// Cleanup bookkeeping derived from a record's annotations
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupState {
    pub started_at: Option<DateTime<Utc>>,
    pub skip: bool,
}

impl CleanupState {
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Self {
        let started_at = annotations
            .get(CLEANUP_STARTED_ANNOTATION)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|t| t.with_timezone(&Utc));
        let skip = annotations
            .get(SKIP_CLEANUP_ANNOTATION)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        Self { started_at, skip }
    }

    /// Stamp the cleanup start if it is not recorded yet
    ///
    /// Returns `true` when `annotations` changed and must be persisted. An
    /// unparseable stamp is replaced, since it cannot bound the cleanup.
    pub fn begin(annotations: &mut BTreeMap<String, String>, now: DateTime<Utc>) -> bool {
        if Self::from_annotations(annotations).started_at.is_some() {
            return false;
        }
        if let Some(bad) = annotations.get(CLEANUP_STARTED_ANNOTATION) {
            warn!("Replacing unparseable cleanup start stamp {:?}", bad);
        }
        annotations.insert(CLEANUP_STARTED_ANNOTATION.to_string(), now.to_rfc3339());
        true
    }
}

/// What the caller may do with the finalizer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CleanupDecision {
    /// The external side effect completed; release the finalizer
    Success,
    /// Release the finalizer without a completed side effect
    ForceRemove { reason: &'static str },
    /// Keep the finalizer and requeue after the delay
    RetryAfter(Duration),
}

impl CleanupDecision {
    pub fn releases_finalizer(&self) -> bool {
        !matches!(self, CleanupDecision::RetryAfter(_))
    }
}

/// Calculate exponential backoff delay
///
/// # Arguments
/// * `attempt` - Retry attempt, capped at 5 doublings
/// * `base_delay_secs` - Base delay in seconds (default: 15)
/// * `max_delay_secs` - Maximum delay cap in seconds (default: 300 = 5 minutes)
pub fn calculate_backoff(
    attempt: u32,
    base_delay_secs: Option<u64>,
    max_delay_secs: Option<u64>,
) -> Duration {
    let base = base_delay_secs.unwrap_or(15);
    let max = max_delay_secs.unwrap_or(300);

    let delay_secs = base.saturating_mul(2_u64.saturating_pow(attempt.min(5)));
    Duration::from_secs(delay_secs.min(max))
}

/// Backoff for a failing cleanup, growing with each elapsed minute
pub fn cleanup_backoff(elapsed: Duration) -> Duration {
    let minutes = u32::try_from(elapsed.as_secs() / 60).unwrap_or(u32::MAX);
    calculate_backoff(
        minutes,
        Some(CLEANUP_BACKOFF_BASE_SECS),
        Some(CLEANUP_BACKOFF_MAX_SECS),
    )
}

/// Drives one cleanup attempt for a record under deletion
pub struct FinalizerOrchestrator<'a> {
    pub timeout: Duration,
    pub events: Option<&'a dyn EventSink>,
}

impl<'a> FinalizerOrchestrator<'a> {
    pub fn new(timeout: Duration, events: Option<&'a dyn EventSink>) -> Self {
        Self { timeout, events }
    }

    /// Run the cleanup `action` unless skipped, and decide the finalizer's fate
    ///
    /// `action` is only polled when cleanup is not skipped. The `Deleting`
    /// condition is updated on `conditions` in every branch.
    pub async fn run<F>(
        &self,
        state: &CleanupState,
        conditions: &mut Vec<Condition>,
        generation: Option<i64>,
        now: DateTime<Utc>,
        action: F,
    ) -> CleanupDecision
    where
        F: Future<Output = Result<()>>,
    {
        if state.skip {
            let message = "External cleanup skipped by annotation";
            set_deleting(conditions, true, REASON_SKIPPED, message, generation);
            emit(self.events, EventType::Normal, reasons::CLEANUP_SKIPPED, message).await;
            info!("{}", message);
            return CleanupDecision::ForceRemove {
                reason: REASON_SKIPPED,
            };
        }

        let err = match action.await {
            Ok(()) => {
                let message = "External entity removed";
                set_deleting(conditions, true, REASON_SUCCESS, message, generation);
                emit(self.events, EventType::Normal, reasons::CLEANUP_SUCCEEDED, message).await;
                return CleanupDecision::Success;
            }
            Err(e) => e,
        };

        let started_at = state.started_at.unwrap_or(now);
        let elapsed = (now - started_at).to_std().unwrap_or(Duration::ZERO);

        if elapsed >= self.timeout {
            let message = format!(
                "Cleanup timed out after {}s, releasing finalizer; the external entity may still exist: {}",
                elapsed.as_secs(),
                err
            );
            set_deleting(conditions, true, REASON_TIMEOUT, &message, generation);
            emit(self.events, EventType::Warning, reasons::CLEANUP_TIMED_OUT, &message).await;
            warn!("{}", message);
            return CleanupDecision::ForceRemove {
                reason: REASON_TIMEOUT,
            };
        }

        let delay = cleanup_backoff(elapsed);
        let message = err.to_string();
        set_deleting(conditions, true, REASON_ERROR, &message, generation);
        emit(
            self.events,
            EventType::Warning,
            reasons::CLEANUP_FAILED,
            &format!("{message}; retrying in {}s", delay.as_secs()),
        )
        .await;
        warn!(retry_in = ?delay, "Cleanup failed: {}", message);
        CleanupDecision::RetryAfter(delay)
    }
}
