//! Shared types for managed resource specifications and status
//!
//! Every resource kind reconciled by the operator shares the same status block
//! ([`ResourceStatus`]) and condition shape ([`Condition`]), so the sync engine
//! and the finalizer orchestrator can work on any of them.
//!
//! # Type Hierarchy
//!
//! - [`Condition`] - Kubernetes-style status condition
//! - [`ResourceStatus`] - Observed state written by the reconciler
//! - [`PublishSpec`] / [`PublishTargetKind`] - Where a generated value is published
//! - [`PublishedTarget`] - The publish target the reconciler last wrote to

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Structured validation error for a resource spec
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
    pub how_to_fix: String,
}

impl SpecValidationError {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        how_to_fix: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            how_to_fix: how_to_fix.into(),
        }
    }
}

impl std::fmt::Display for SpecValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.field, self.message, self.how_to_fix)
    }
}

/// Fold a list of spec validation errors into a single operator error
pub fn validation_failure(errors: &[SpecValidationError]) -> crate::Error {
    let joined = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    crate::Error::ValidationError(joined)
}

/// Condition for status reporting (Kubernetes convention)
///
/// # Examples
///
/// ```rust,no_run
/// use uptime_k8s::crd::Condition;
///
/// let condition = Condition::new("Ready", "True", "Synced", "Monitor is synced", Some(3));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Ready", "Synced", "Error", "Deleting")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
    /// The .metadata.generation that the condition was set based upon
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn new(
        type_: &str,
        status: &str,
        reason: &str,
        message: &str,
        observed_generation: Option<i64>,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status: status.to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation,
        }
    }
}

/// Kind of object a generated value is published to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub enum PublishTargetKind {
    #[default]
    Secret,
    ConfigMap,
}

impl std::fmt::Display for PublishTargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishTargetKind::Secret => write!(f, "Secret"),
            PublishTargetKind::ConfigMap => write!(f, "ConfigMap"),
        }
    }
}

/// Publish configuration for a generated value (e.g. a heartbeat URL)
///
/// All fields are optional; defaults derive from the owning resource's name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublishSpec {
    /// Whether publishing is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Target object kind
    #[serde(default)]
    pub kind: PublishTargetKind,

    /// Target object name. Defaults to `<resource-name>-<suffix>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Key under which the value is written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Identity of the publish target the reconciler last wrote
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublishedTarget {
    pub kind: PublishTargetKind,
    pub name: String,
    pub key: String,
}

/// Observed state shared by every managed resource kind
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// Whether the external entity matches the desired state
    #[serde(default)]
    pub ready: bool,

    /// Identifier of the external entity, empty when never synced
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub external_id: String,

    /// Entity type the external identity was last synced as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_type: Option<String>,

    /// RFC 3339 timestamp of the last successful sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_time: Option<String>,

    /// Generation of the desired state that produced this status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Readiness, sync, error and deletion conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Publish target currently owned by the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_target: Option<PublishedTarget>,
}

impl ResourceStatus {
    /// Whether an external identity has been recorded
    pub fn has_external_id(&self) -> bool {
        !self.external_id.is_empty()
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_camel_case() {
        let status = ResourceStatus {
            ready: true,
            external_id: "42".to_string(),
            synced_type: Some("HTTP".to_string()),
            observed_generation: Some(2),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["externalId"], "42");
        assert_eq!(json["syncedType"], "HTTP");
        assert!(json.get("publishedTarget").is_none());
    }

    #[test]
    fn test_publish_spec_defaults() {
        let spec: PublishSpec = serde_json::from_str("{}").unwrap();
        assert!(spec.enabled);
        assert_eq!(spec.kind, PublishTargetKind::Secret);
        assert!(spec.name.is_none());
    }
}
