//! Kubernetes Event recording
//!
//! Events are best-effort telemetry: failures are logged as warnings and
//! never propagate, and every caller accepts a missing sink.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::{Client, Resource, ResourceExt};
use tracing::warn;

/// Kubernetes event type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

/// Sink for operator-visible notices about one record
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, type_: EventType, reason: &str, message: &str);
}

/// Record an event if a sink is present
pub async fn emit(sink: Option<&dyn EventSink>, type_: EventType, reason: &str, message: &str) {
    if let Some(sink) = sink {
        sink.record(type_, reason, message).await;
    }
}

/// Well-known event reasons
pub mod reasons {
    pub const CLEANUP_SUCCEEDED: &str = "CleanupSucceeded";
    pub const CLEANUP_SKIPPED: &str = "CleanupSkipped";
    pub const CLEANUP_FAILED: &str = "CleanupFailed";
    pub const CLEANUP_TIMED_OUT: &str = "CleanupTimedOut";
    pub const SYNC_FAILED: &str = "SyncFailed";
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    pub const ADOPTED: &str = "Adopted";
    pub const RECREATED: &str = "Recreated";
}

/// Creates core/v1 Events against the involved record
pub struct KubeEventSink {
    client: Client,
    reference: ObjectReference,
    namespace: String,
    name: String,
    reporter: String,
}

impl KubeEventSink {
    pub fn for_resource<K>(client: Client, obj: &K, reporter: &str) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self {
            client,
            reference: obj.object_ref(&()),
            namespace: obj.namespace().unwrap_or_else(|| "default".to_string()),
            name: obj.name_any(),
            reporter: reporter.to_string(),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn record(&self, type_: EventType, reason: &str, message: &str) {
        let events: Api<Event> = Api::namespaced(self.client.clone(), &self.namespace);

        let time = Time(chrono::Utc::now());
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", self.name)),
                ..Default::default()
            },
            type_: Some(type_.as_str().to_string()),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            involved_object: self.reference.clone(),
            first_timestamp: Some(time.clone()),
            last_timestamp: Some(time),
            count: Some(1),
            reporting_component: Some(self.reporter.clone()),
            source: Some(EventSource {
                component: Some(self.reporter.clone()),
                host: None,
            }),
            ..Default::default()
        };

        if let Err(e) = events.create(&PostParams::default(), &event).await {
            warn!(reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}
