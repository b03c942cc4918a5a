//! Controller module for Monitor and MaintenanceWindow reconciliation
//! This module contains the controller loop, the external sync protocol,
//! finalizer cleanup and the publish-target bookkeeping.

pub mod conditions;
pub mod events;
mod finalizers;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod publisher;
mod reconciler;
pub mod resolver;
mod status;
pub mod sync;
#[cfg(test)]
mod sync_test;
#[cfg(test)]
mod testing;

pub use events::{EventSink, EventType, KubeEventSink};
pub use finalizers::{
    calculate_backoff, cleanup_backoff, CleanupDecision, CleanupState, FinalizerOrchestrator,
    CLEANUP_STARTED_ANNOTATION, DEFAULT_CLEANUP_TIMEOUT, FINALIZER, SKIP_CLEANUP_ANNOTATION,
};
pub use publisher::{reconcile_publish, KubeTargetStore, PublishRequest, TargetObject, TargetStore};
pub use reconciler::{
    apply_record, cleanup_record, run_controller, ControllerState, OperatorConfig, RecordContext,
    ADOPT_ANNOTATION,
};
pub use resolver::{resolve_duplicate, Resolution};
pub use status::{external_id_claimed_elsewhere, write_status, STATUS_WRITE_ATTEMPTS};
pub use sync::{sync_external, SyncOutcome, SyncRequest};
