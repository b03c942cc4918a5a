//! Capability interface shared by every managed resource kind
//!
//! The sync engine, finalizer orchestrator and publisher are generic over
//! [`ManagedResource`]. A kind only has to describe its desired external entity,
//! the collection it lives in, and (optionally) a value it publishes.

use std::fmt::Debug;

use kube::core::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::types::{PublishSpec, ResourceStatus};
use crate::client::{Collection, ExternalEntity};
use crate::error::Result;

/// Desired external entity computed from a resource's spec
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredEntity {
    /// External entity type; a change forces delete-then-recreate
    pub entity_type: String,
    /// Canonical address used as the primary duplicate-match key
    pub url: Option<String>,
    /// Display name used as the secondary duplicate-match key
    pub name: String,
    /// Full request body sent on create and update
    pub payload: serde_json::Value,
}

/// A custom resource whose desired state is synced to the monitoring API
pub trait ManagedResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    /// Controller name used in logs, events and metrics
    const CONTROLLER: &'static str;

    /// Collection holding this kind's external entities
    const COLLECTION: Collection;

    /// Suffix for the default publish target name
    const PUBLISH_SUFFIX: &'static str = "published";

    /// Default key for the published value
    const PUBLISH_KEY: &'static str = "value";

    /// Validate the spec and build the desired external entity
    fn desired(&self) -> Result<DesiredEntity>;

    /// Current status block, if any
    fn resource_status(&self) -> Option<&ResourceStatus>;

    /// Publish configuration, if the kind supports publishing
    fn publish_spec(&self) -> Option<&PublishSpec> {
        None
    }

    /// Whether a sync needs to read back the entity to obtain a published value
    fn produces_value(&self) -> bool {
        false
    }

    /// Value to publish, extracted from the synced external entity
    fn published_value(&self, _entity: &ExternalEntity) -> Option<String> {
        None
    }
}
