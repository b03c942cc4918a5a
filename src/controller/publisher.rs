//! Side-effect publisher
//!
//! Some external entities produce a value the workload needs (a heartbeat
//! push URL). The publisher keeps one Secret or ConfigMap per record holding
//! that value. Ownership is established by the owner reference written at
//! creation, and checked before every mutation: an object of the same name
//! that the record does not own is never touched.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::{info, warn};

use crate::crd::{PublishSpec, PublishTargetKind, PublishedTarget, ResourceStatus};
use crate::error::{Error, Result};

/// A Secret or ConfigMap as seen by the publisher
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TargetObject {
    pub kind: PublishTargetKind,
    pub name: String,
    pub uid: Option<String>,
    pub resource_version: Option<String>,
    pub owners: Vec<OwnerReference>,
    pub data: BTreeMap<String, String>,
}

impl TargetObject {
    /// Whether `owner_uid` is one of the object's owners
    pub fn is_owned_by(&self, owner_uid: &str) -> bool {
        !owner_uid.is_empty() && self.owners.iter().any(|o| o.uid == owner_uid)
    }
}

/// Namespaced storage for publish targets
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn get(&self, kind: PublishTargetKind, name: &str) -> Result<Option<TargetObject>>;
    async fn create(&self, object: &TargetObject) -> Result<TargetObject>;
    /// Set `key` to `value` on an existing object and drop `stale_key`
    ///
    /// Every other entry, label and annotation on the object stays as it is.
    async fn set_entry(
        &self,
        object: &TargetObject,
        key: &str,
        value: &str,
        stale_key: Option<&str>,
    ) -> Result<()>;
    /// Deleting a missing object succeeds
    async fn delete(&self, kind: PublishTargetKind, name: &str) -> Result<()>;
}

/// Inputs for one publish pass
pub struct PublishRequest<'a> {
    /// Owner reference pointing at the record
    pub owner: OwnerReference,
    pub spec: Option<&'a PublishSpec>,
    /// Value to publish; `None` when the record produces none
    pub value: Option<&'a str>,
    /// Suffix appended to the record name for the default target name
    pub default_suffix: &'a str,
    pub default_key: &'a str,
}

impl PublishRequest<'_> {
    fn desired_target(&self) -> Option<PublishedTarget> {
        let spec = self.spec.filter(|s| s.enabled)?;
        self.value?;
        Some(PublishedTarget {
            kind: spec.kind,
            name: spec
                .name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("{}-{}", self.owner.name, self.default_suffix)),
            key: spec
                .key
                .clone()
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| self.default_key.to_string()),
        })
    }
}

/// Bring the publish target in line with the record and record its identity
pub async fn reconcile_publish(
    store: &dyn TargetStore,
    request: PublishRequest<'_>,
    status: &mut ResourceStatus,
) -> Result<()> {
    let owner_uid = request.owner.uid.clone();
    let previous = status.published_target.clone();

    let (desired, value) = match (request.desired_target(), request.value) {
        (Some(desired), Some(value)) => (desired, value),
        _ => {
            if let Some(previous) = previous {
                delete_if_owned(store, &previous, &owner_uid).await?;
                status.published_target = None;
            }
            return Ok(());
        }
    };

    let mut stale_key = None;
    if let Some(previous) = &previous {
        if previous.kind != desired.kind || previous.name != desired.name {
            delete_if_owned(store, previous, &owner_uid).await?;
            status.published_target = None;
        } else if previous.key != desired.key {
            stale_key = Some(previous.key.clone());
        }
    }

    match store.get(desired.kind, &desired.name).await? {
        None => {
            let object = TargetObject {
                kind: desired.kind,
                name: desired.name.clone(),
                owners: vec![request.owner.clone()],
                data: BTreeMap::from([(desired.key.clone(), value.to_string())]),
                ..Default::default()
            };
            store.create(&object).await?;
            info!(kind = %desired.kind, name = %desired.name, "Created publish target");
        }
        Some(existing) => {
            if !existing.is_owned_by(&owner_uid) {
                return Err(Error::NotManaged {
                    kind: desired.kind.to_string(),
                    name: desired.name.clone(),
                });
            }

            let stale_key = stale_key.filter(|k| existing.data.contains_key(k));
            let current = existing.data.get(&desired.key).map(String::as_str);
            if current != Some(value) || stale_key.is_some() {
                store
                    .set_entry(&existing, &desired.key, value, stale_key.as_deref())
                    .await?;
                info!(kind = %desired.kind, name = %desired.name, "Updated publish target");
            }
        }
    }

    status.published_target = Some(desired);
    Ok(())
}

async fn delete_if_owned(
    store: &dyn TargetStore,
    target: &PublishedTarget,
    owner_uid: &str,
) -> Result<()> {
    match store.get(target.kind, &target.name).await? {
        Some(object) if object.is_owned_by(owner_uid) => {
            store.delete(target.kind, &target.name).await?;
            info!(kind = %target.kind, name = %target.name, "Deleted publish target");
        }
        Some(_) => {
            warn!(
                kind = %target.kind,
                name = %target.name,
                "Publish target is not owned by this resource, leaving it in place"
            );
        }
        None => {}
    }
    Ok(())
}

/// Publish targets backed by Secrets and ConfigMaps in one namespace
pub struct KubeTargetStore {
    client: Client,
    namespace: String,
}

impl KubeTargetStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn metadata(&self, object: &TargetObject) -> ObjectMeta {
        ObjectMeta {
            name: Some(object.name.clone()),
            namespace: Some(self.namespace.clone()),
            resource_version: object.resource_version.clone(),
            owner_references: Some(object.owners.clone()),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_string(),
                "uptime-operator".to_string(),
            )])),
            ..Default::default()
        }
    }

    fn secret(&self, object: &TargetObject) -> Secret {
        Secret {
            metadata: self.metadata(object),
            type_: Some("Opaque".to_string()),
            data: Some(
                object
                    .data
                    .iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.clone().into_bytes())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn config_map(&self, object: &TargetObject) -> ConfigMap {
        ConfigMap {
            metadata: self.metadata(object),
            data: Some(object.data.clone()),
            ..Default::default()
        }
    }
}

fn from_meta(kind: PublishTargetKind, meta: &ObjectMeta, data: BTreeMap<String, String>) -> TargetObject {
    TargetObject {
        kind,
        name: meta.name.clone().unwrap_or_default(),
        uid: meta.uid.clone(),
        resource_version: meta.resource_version.clone(),
        owners: meta.owner_references.clone().unwrap_or_default(),
        data,
    }
}

fn from_secret(secret: &Secret) -> TargetObject {
    let mut data: BTreeMap<String, String> = secret
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.clone(), String::from_utf8_lossy(&v.0).into_owned()))
        .collect();
    if let Some(string_data) = &secret.string_data {
        data.extend(string_data.clone());
    }
    from_meta(PublishTargetKind::Secret, &secret.metadata, data)
}

fn from_config_map(cm: &ConfigMap) -> TargetObject {
    from_meta(
        PublishTargetKind::ConfigMap,
        &cm.metadata,
        cm.data.clone().unwrap_or_default(),
    )
}

/// Merge patch touching only the published entry of a target
///
/// The resource version makes the patch fail on a concurrent write instead of
/// overwriting it.
fn entry_patch(
    object: &TargetObject,
    key: &str,
    value: &str,
    stale_key: Option<&str>,
) -> Result<serde_json::Value> {
    let mut data = serde_json::Map::new();
    if let Some(stale) = stale_key.filter(|stale| *stale != key) {
        data.insert(stale.to_string(), serde_json::Value::Null);
    }
    let value = match object.kind {
        PublishTargetKind::Secret => serde_json::to_value(ByteString(value.as_bytes().to_vec()))?,
        PublishTargetKind::ConfigMap => serde_json::Value::String(value.to_string()),
    };
    data.insert(key.to_string(), value);

    let mut metadata = serde_json::Map::new();
    if let Some(version) = &object.resource_version {
        metadata.insert(
            "resourceVersion".to_string(),
            serde_json::Value::String(version.clone()),
        );
    }

    let mut patch = serde_json::Map::new();
    patch.insert("metadata".to_string(), serde_json::Value::Object(metadata));
    patch.insert("data".to_string(), serde_json::Value::Object(data));
    Ok(serde_json::Value::Object(patch))
}

fn ignore_not_found(result: std::result::Result<(), kube::Error>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(Error::KubeError(e)),
    }
}

#[async_trait]
impl TargetStore for KubeTargetStore {
    async fn get(&self, kind: PublishTargetKind, name: &str) -> Result<Option<TargetObject>> {
        Ok(match kind {
            PublishTargetKind::Secret => self.secrets().get_opt(name).await?.as_ref().map(from_secret),
            PublishTargetKind::ConfigMap => self
                .config_maps()
                .get_opt(name)
                .await?
                .as_ref()
                .map(from_config_map),
        })
    }

    async fn create(&self, object: &TargetObject) -> Result<TargetObject> {
        let pp = PostParams::default();
        Ok(match object.kind {
            PublishTargetKind::Secret => {
                let created = self.secrets().create(&pp, &self.secret(object)).await?;
                from_secret(&created)
            }
            PublishTargetKind::ConfigMap => {
                let created = self
                    .config_maps()
                    .create(&pp, &self.config_map(object))
                    .await?;
                from_config_map(&created)
            }
        })
    }

    async fn set_entry(
        &self,
        object: &TargetObject,
        key: &str,
        value: &str,
        stale_key: Option<&str>,
    ) -> Result<()> {
        let patch = Patch::Merge(entry_patch(object, key, value, stale_key)?);
        let pp = PatchParams::default();
        match object.kind {
            PublishTargetKind::Secret => {
                self.secrets().patch(&object.name, &pp, &patch).await?;
            }
            PublishTargetKind::ConfigMap => {
                self.config_maps().patch(&object.name, &pp, &patch).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, kind: PublishTargetKind, name: &str) -> Result<()> {
        let dp = DeleteParams::default();
        let result = match kind {
            PublishTargetKind::Secret => self.secrets().delete(name, &dp).await.map(|_| ()),
            PublishTargetKind::ConfigMap => self.config_maps().delete(name, &dp).await.map(|_| ()),
        };
        ignore_not_found(result)
    }
}

/// Owner reference pointing at a managed record
pub fn owner_reference<K>(obj: &K) -> OwnerReference
where
    K: kube::Resource<DynamicType = ()>,
{
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: obj.name_any(),
        uid: obj.meta().uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}
