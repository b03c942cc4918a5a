//! Prometheus metrics for the uptime operator
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `uptime_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `uptime_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `uptime_external_calls_total` (counter): monitoring API calls labeled by collection, operation and result.
//! - `uptime_cleanup_outcomes_total` (counter): finalizer cleanup decisions labeled by controller and outcome.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use serde_json::Value;

use crate::client::{ApiError, Collection, ExternalEntity, MonitoringApi};

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "monitor"
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind/category, e.g. "kube", "validation", "api"
    pub kind: String,
}

/// Labels for monitoring API calls
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ExternalCallLabels {
    pub collection: String,
    pub operation: String,
    /// "ok" or "error"
    pub result: String,
}

/// Labels for finalizer cleanup decisions
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CleanupLabels {
    pub controller: String,
    /// "success", "skipped", "timeout", "retry" or "claimed"
    pub outcome: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

/// Counter tracking reconcile errors
pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking monitoring API calls
pub static EXTERNAL_CALLS_TOTAL: Lazy<Family<ExternalCallLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking cleanup decisions
pub static CLEANUP_OUTCOMES_TOTAL: Lazy<Family<CleanupLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "uptime_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "uptime_reconcile_errors_total",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "uptime_external_calls_total",
        "Total number of monitoring API calls",
        EXTERNAL_CALLS_TOTAL.clone(),
    );
    registry.register(
        "uptime_cleanup_outcomes_total",
        "Total number of finalizer cleanup decisions by outcome",
        CLEANUP_OUTCOMES_TOTAL.clone(),
    );

    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_external_call(collection: &str, operation: &str, ok: bool) {
    let labels = ExternalCallLabels {
        collection: collection.to_string(),
        operation: operation.to_string(),
        result: if ok { "ok" } else { "error" }.to_string(),
    };
    EXTERNAL_CALLS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_cleanup_outcome(controller: &str, outcome: &str) {
    let labels = CleanupLabels {
        controller: controller.to_string(),
        outcome: outcome.to_string(),
    };
    CLEANUP_OUTCOMES_TOTAL.get_or_create(&labels).inc();
}

/// Monitoring API decorator counting every call
pub struct MeteredMonitoringApi {
    inner: Arc<dyn MonitoringApi>,
}

impl MeteredMonitoringApi {
    pub fn new(inner: Arc<dyn MonitoringApi>) -> Self {
        Self { inner }
    }
}

fn count<T>(collection: Collection, operation: &str, result: Result<T, ApiError>) -> Result<T, ApiError> {
    inc_external_call(collection.path(), operation, result.is_ok());
    result
}

#[async_trait]
impl MonitoringApi for MeteredMonitoringApi {
    async fn create(&self, collection: Collection, payload: &Value) -> Result<String, ApiError> {
        count(collection, "create", self.inner.create(collection, payload).await)
    }

    async fn update(&self, collection: Collection, id: &str, payload: &Value) -> Result<(), ApiError> {
        count(collection, "update", self.inner.update(collection, id, payload).await)
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<ExternalEntity, ApiError> {
        count(collection, "get", self.inner.get(collection, id).await)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), ApiError> {
        count(collection, "delete", self.inner.delete(collection, id).await)
    }

    async fn list(&self, collection: Collection) -> Result<Vec<ExternalEntity>, ApiError> {
        count(collection, "list", self.inner.list(collection).await)
    }
}
