//! Main reconciler for managed resources
//!
//! Implements the controller pattern using kube-rs runtime. One controller
//! runs per [`ManagedResource`] kind; both share the monitoring API client.
//!
//! The decision logic lives in [`apply_record`] and [`cleanup_record`], which
//! only see trait objects and can run against in-memory fakes. The kube glue
//! around them reads and writes annotations and status.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{
    api::{Api, ListParams},
    client::Client,
    core::NamespaceResourceScope,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::conditions::{set_error, set_ready};
use super::events::{emit, reasons, EventSink, EventType, KubeEventSink};
use super::finalizers::{
    CleanupDecision, CleanupState, FinalizerOrchestrator, CLEANUP_STARTED_ANNOTATION,
    DEFAULT_CLEANUP_TIMEOUT, FINALIZER,
};
use super::publisher::{owner_reference, reconcile_publish, KubeTargetStore, PublishRequest, TargetStore};
use super::status::{external_id_claimed_elsewhere, set_annotation, write_status};
use super::sync::{
    sync_external, validate_external_id, SyncOutcome, SyncRequest, REASON_VALIDATION_FAILED,
};
use crate::client::MonitoringApi;
use crate::crd::{MaintenanceWindow, ManagedResource, Monitor, ResourceStatus};
use crate::error::{Error, Result};

/// Names the existing external entity a record should bind to
pub const ADOPT_ANNOTATION: &str = "uptime-k8s.io/adopt-id";

const REASON_PUBLISH_FAILED: &str = "PublishFailed";

/// Runtime settings shared by every controller
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    pub cleanup_timeout: Duration,
    /// Requeue delay after a successful sync
    pub resync_interval: Duration,
    /// Component name on emitted events
    pub reporter: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
            resync_interval: Duration::from_secs(300),
            reporter: "uptime-operator".to_string(),
        }
    }
}

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub api: Arc<dyn MonitoringApi>,
    pub config: OperatorConfig,
}

/// Collaborators used while reconciling one record
pub struct RecordContext<'a> {
    pub api: &'a dyn MonitoringApi,
    pub targets: &'a dyn TargetStore,
    pub events: Option<&'a dyn EventSink>,
    pub config: &'a OperatorConfig,
}

/// Main entry point to start the controllers
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    info!("Starting uptime controllers");

    verify_crd::<Monitor>(&state).await?;
    verify_crd::<MaintenanceWindow>(&state).await?;

    futures::join!(
        run_kind::<Monitor>(state.clone()),
        run_kind::<MaintenanceWindow>(state.clone())
    );

    Ok(())
}

async fn verify_crd<K: ManagedResource>(state: &ControllerState) -> Result<()> {
    let api: Api<K> = scoped_api(state.client.clone(), state.config.namespace.as_deref());
    match api.list(&ListParams::default().limit(1)).await {
        Ok(_) => {
            info!("{} CRD is available", K::kind(&()));
            Ok(())
        }
        Err(e) => {
            error!(
                "{} CRD not found. Please install the CRD first: {:?}",
                K::kind(&()),
                e
            );
            Err(Error::ConfigError(format!("{} CRD not installed", K::kind(&()))))
        }
    }
}

async fn run_kind<K: ManagedResource>(state: Arc<ControllerState>) {
    let client = state.client.clone();
    let namespace = state.config.namespace.clone();
    let records: Api<K> = scoped_api(client.clone(), namespace.as_deref());

    info!(controller = K::CONTROLLER, "Starting controller");

    Controller::new(records, Config::default())
        // Publish targets are owned by their records
        .owns::<Secret>(scoped_api(client.clone(), namespace.as_deref()), Config::default())
        .owns::<ConfigMap>(scoped_api(client, namespace.as_deref()), Config::default())
        .shutdown_on_signal()
        .run(reconcile::<K>, error_policy::<K>, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;
}

/// Api scoped to the watched namespace, or cluster-wide
fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// The reconciliation function
async fn reconcile<K: ManagedResource>(obj: Arc<K>, ctx: Arc<ControllerState>) -> Result<Action> {
    let start = std::time::Instant::now();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<K> = Api::namespaced(ctx.client.clone(), &namespace);

    debug!(
        "Reconciling {} {}/{}",
        K::kind(&()),
        namespace,
        obj.name_any()
    );

    // Use kube-rs built-in finalizer helper for clean lifecycle management
    let result = finalizer(&api, FINALIZER, obj, |event| async {
        match event {
            FinalizerEvent::Apply(record) => apply(&ctx, &api, record.as_ref()).await,
            FinalizerEvent::Cleanup(record) => cleanup(&ctx, &api, record.as_ref()).await,
        }
    })
    .await
    .map_err(Error::from);

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_duration_seconds(K::CONTROLLER, start.elapsed().as_secs_f64());
    #[cfg(not(feature = "metrics"))]
    let _ = start;

    result
}

#[instrument(skip(ctx, api, record), fields(controller = K::CONTROLLER, name = %record.name_any(), namespace = record.namespace()))]
async fn apply<K: ManagedResource>(ctx: &ControllerState, api: &Api<K>, record: &K) -> Result<Action> {
    let namespace = record.namespace().unwrap_or_else(|| "default".to_string());
    let events = KubeEventSink::for_resource(ctx.client.clone(), record, &ctx.config.reporter);
    let targets = KubeTargetStore::new(ctx.client.clone(), &namespace);
    let cx = RecordContext {
        api: ctx.api.as_ref(),
        targets: &targets,
        events: Some(&events),
        config: &ctx.config,
    };

    let (status, result) = apply_record(record, &cx).await;
    if status_changed(record.resource_status(), &status) {
        write_status(api, &record.name_any(), &status).await?;
    }
    result
}

#[instrument(skip(ctx, api, record), fields(controller = K::CONTROLLER, name = %record.name_any(), namespace = record.namespace()))]
async fn cleanup<K: ManagedResource>(ctx: &ControllerState, api: &Api<K>, record: &K) -> Result<Action> {
    let name = record.name_any();
    let namespace = record.namespace().unwrap_or_else(|| "default".to_string());
    let now = Utc::now();

    let mut annotations = record.annotations().clone();
    let stamped = CleanupState::begin(&mut annotations, now);
    let mut state = CleanupState::from_annotations(&annotations);
    if stamped {
        let stamp = annotations
            .get(CLEANUP_STARTED_ANNOTATION)
            .cloned()
            .unwrap_or_else(|| now.to_rfc3339());
        if let Err(e) = set_annotation(api, &name, CLEANUP_STARTED_ANNOTATION, &stamp).await {
            // Fall back to the deletion timestamp
            warn!("Failed to record cleanup start for {}: {}", name, e);
            state.started_at = record
                .meta()
                .deletion_timestamp
                .as_ref()
                .map(|t| t.0)
                .or(state.started_at);
        }
    }

    let siblings = async {
        let list = scoped_api::<K>(ctx.client.clone(), ctx.config.namespace.as_deref())
            .list(&ListParams::default())
            .await?;
        Ok::<_, Error>(list.items)
    };

    let events = KubeEventSink::for_resource(ctx.client.clone(), record, &ctx.config.reporter);
    let targets = KubeTargetStore::new(ctx.client.clone(), &namespace);
    let cx = RecordContext {
        api: ctx.api.as_ref(),
        targets: &targets,
        events: Some(&events),
        config: &ctx.config,
    };

    let (status, decision) = cleanup_record(record, siblings, &state, now, &cx).await;
    if status_changed(record.resource_status(), &status) {
        if let Err(e) = write_status(api, &name, &status).await {
            if !decision.releases_finalizer() {
                return Err(e);
            }
            warn!("Failed to write final status for {}: {}", name, e);
        }
    }

    match decision {
        CleanupDecision::RetryAfter(retry_after) => Err(Error::CleanupPending {
            retry_after,
            message: format!("external cleanup for {name} not finished"),
        }),
        _ => Ok(Action::await_change()),
    }
}

/// Sync one record with the monitoring API and its publish target
///
/// Returns the status to persist alongside the reconcile result. Validation
/// failures are reported on the status only and wait for a spec change.
pub async fn apply_record<K: ManagedResource>(
    record: &K,
    cx: &RecordContext<'_>,
) -> (ResourceStatus, Result<Action>) {
    let mut status = record.resource_status().cloned().unwrap_or_default();
    let generation = record.meta().generation;

    let desired = match record.desired() {
        Ok(desired) => desired,
        Err(e) => {
            let message = e.to_string();
            warn!("Validation failed for {}: {}", record.name_any(), message);
            status.ready = false;
            status.observed_generation = generation;
            set_ready(
                &mut status.conditions,
                false,
                REASON_VALIDATION_FAILED,
                &message,
                generation,
            );
            set_error(
                &mut status.conditions,
                true,
                REASON_VALIDATION_FAILED,
                &message,
                generation,
            );
            emit(cx.events, EventType::Warning, reasons::VALIDATION_FAILED, &message).await;
            return (status, Ok(Action::await_change()));
        }
    };

    let adopt_id = record
        .annotations()
        .get(ADOPT_ANNOTATION)
        .map(String::as_str)
        .filter(|id| !id.trim().is_empty());
    let request = SyncRequest {
        collection: K::COLLECTION,
        desired: &desired,
        adopt_id,
        generation,
    };

    match sync_external(cx.api, request, &mut status).await {
        Ok(SyncOutcome::Adopted) | Ok(SyncOutcome::AdoptedDuplicate) => {
            let message = format!("Bound to existing external entity {}", status.external_id);
            emit(cx.events, EventType::Normal, reasons::ADOPTED, &message).await;
        }
        Ok(SyncOutcome::Recreated) => {
            let message = format!(
                "External entity vanished and was recreated as {}",
                status.external_id
            );
            emit(cx.events, EventType::Warning, reasons::RECREATED, &message).await;
        }
        Ok(_) => {}
        Err(e) if e.is_validation() => {
            emit(cx.events, EventType::Warning, reasons::VALIDATION_FAILED, &e.to_string()).await;
            return (status, Ok(Action::await_change()));
        }
        Err(e) => {
            emit(cx.events, EventType::Warning, reasons::SYNC_FAILED, &e.to_string()).await;
            return (status, Err(e));
        }
    }

    if let Err(e) = publish(record, cx, &mut status).await {
        let message = e.to_string();
        status.ready = false;
        set_ready(
            &mut status.conditions,
            false,
            REASON_PUBLISH_FAILED,
            &message,
            generation,
        );
        set_error(
            &mut status.conditions,
            true,
            REASON_PUBLISH_FAILED,
            &message,
            generation,
        );
        return (status, Err(e));
    }

    (status, Ok(Action::requeue(cx.config.resync_interval)))
}

async fn publish<K: ManagedResource>(
    record: &K,
    cx: &RecordContext<'_>,
    status: &mut ResourceStatus,
) -> Result<()> {
    if record.publish_spec().is_none() && status.published_target.is_none() {
        return Ok(());
    }

    let value = if record.produces_value() {
        let entity = cx.api.get(K::COLLECTION, &status.external_id).await?;
        record.published_value(&entity)
    } else {
        None
    };

    let request = PublishRequest {
        owner: owner_reference(record),
        spec: record.publish_spec(),
        value: value.as_deref(),
        default_suffix: K::PUBLISH_SUFFIX,
        default_key: K::PUBLISH_KEY,
    };
    reconcile_publish(cx.targets, request, status).await
}

/// Run one cleanup attempt for a record under deletion
///
/// `siblings` lists the records of the same kind. It is only awaited when an
/// external delete is about to happen, and the delete is skipped when a live
/// sibling still claims the entity. A failed listing counts as a failed
/// cleanup attempt, so it is retried with backoff and bounded by the timeout.
pub async fn cleanup_record<K, F>(
    record: &K,
    siblings: F,
    state: &CleanupState,
    now: DateTime<Utc>,
    cx: &RecordContext<'_>,
) -> (ResourceStatus, CleanupDecision)
where
    K: ManagedResource,
    F: Future<Output = Result<Vec<K>>>,
{
    let mut status = record.resource_status().cloned().unwrap_or_default();
    let generation = record.meta().generation;
    let external_id = status.external_id.clone();
    let mut claimed = false;

    let action = async {
        if external_id.is_empty() {
            debug!("No external entity recorded, nothing to delete");
            return Ok(());
        }
        if let Err(e) = validate_external_id(&external_id) {
            warn!("Not deleting malformed external id: {}", e);
            return Ok(());
        }
        let siblings = siblings.await?;
        if external_id_claimed_elsewhere(&siblings, record, &external_id) {
            info!(
                external_id = %external_id,
                "External entity is claimed by another resource, keeping it"
            );
            claimed = true;
            return Ok(());
        }
        cx.api
            .delete(K::COLLECTION, &external_id)
            .await
            .map_err(Error::from)
    };

    let orchestrator = FinalizerOrchestrator::new(cx.config.cleanup_timeout, cx.events);
    let decision = orchestrator
        .run(state, &mut status.conditions, generation, now, action)
        .await;

    status.ready = false;
    status.observed_generation = generation;

    #[cfg(feature = "metrics")]
    super::metrics::inc_cleanup_outcome(K::CONTROLLER, cleanup_outcome_label(&decision, claimed));

    (status, decision)
}

#[cfg(feature = "metrics")]
fn cleanup_outcome_label(decision: &CleanupDecision, claimed: bool) -> &'static str {
    match decision {
        CleanupDecision::Success if claimed => "claimed",
        CleanupDecision::Success => "success",
        CleanupDecision::ForceRemove { reason } if *reason == super::finalizers::REASON_SKIPPED => {
            "skipped"
        }
        CleanupDecision::ForceRemove { .. } => "timeout",
        CleanupDecision::RetryAfter(_) => "retry",
    }
}

/// Whether `new` differs from the stored status in anything but the sync time
///
/// The sync time alone does not justify a write; every status write triggers
/// another watch event.
pub fn status_changed(old: Option<&ResourceStatus>, new: &ResourceStatus) -> bool {
    let Some(old) = old else {
        return true;
    };
    let mut old = old.clone();
    old.last_synced_time = new.last_synced_time.clone();
    old != *new
}

/// Error policy for the controller
fn error_policy<K: ManagedResource>(record: Arc<K>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    #[cfg(feature = "metrics")]
    super::metrics::inc_reconcile_error(K::CONTROLLER, error.metric_label());

    if let Error::CleanupPending { retry_after, .. } = error {
        info!(
            "Cleanup pending for {}, retrying in {:?}",
            record.name_any(),
            retry_after
        );
        return Action::requeue(*retry_after);
    }

    error!("Reconciliation error for {}: {:?}", record.name_any(), error);

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
