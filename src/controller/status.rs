//! Status and metadata writes for managed records
//!
//! Status writes are optimistic: the latest object is re-read, only the
//! status block is replaced, and the write carries the read resourceVersion.
//! A 409 means someone else wrote in between, so the read-modify-write is
//! repeated instead of overwriting their change.

use std::future::Future;

use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::ResourceExt;
use serde_json::json;
use tracing::debug;

use crate::crd::{ManagedResource, ResourceStatus};
use crate::error::{Error, Result};

/// Attempts for one optimistic status write
pub const STATUS_WRITE_ATTEMPTS: u32 = 5;

/// Whether the error is an optimistic concurrency conflict
pub fn is_write_conflict(err: &Error) -> bool {
    matches!(err, Error::KubeError(kube::Error::Api(e)) if e.code == 409)
}

/// Run `op` until it succeeds, fails with something other than a conflict,
/// or `attempts` is exhausted
pub async fn retry_on_conflict<T, F, Fut>(attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if is_write_conflict(&e) && attempt < attempts => {
                debug!(attempt, "Write conflict, re-reading latest version");
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Replace the status block of `name`, preserving everything else
pub async fn write_status<K: ManagedResource>(
    api: &Api<K>,
    name: &str,
    status: &ResourceStatus,
) -> Result<()> {
    let status_value = serde_json::to_value(status)?;
    retry_on_conflict(STATUS_WRITE_ATTEMPTS, || {
        let status_value = status_value.clone();
        async move {
            let latest = api.get_status(name).await?;
            let mut object = serde_json::to_value(&latest)?;
            object["status"] = status_value;
            let data = serde_json::to_vec(&object)?;
            api.replace_status(name, &PostParams::default(), data).await?;
            Ok(())
        }
    })
    .await
}

/// Merge one annotation into the record's metadata
pub async fn set_annotation<K: ManagedResource>(
    api: &Api<K>,
    name: &str,
    key: &str,
    value: &str,
) -> Result<()> {
    let mut annotations = serde_json::Map::new();
    annotations.insert(key.to_string(), json!(value));
    let patch = json!({ "metadata": { "annotations": annotations } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Whether a live sibling record of the same kind claims `external_id`
///
/// Records that are themselves being deleted do not count, so two records
/// deleted together still release the entity.
pub fn external_id_claimed_elsewhere<K: ManagedResource>(
    records: &[K],
    current: &K,
    external_id: &str,
) -> bool {
    let current_uid = current.uid();
    records.iter().any(|other| {
        other.uid() != current_uid
            && other.meta().deletion_timestamp.is_none()
            && other
                .resource_status()
                .is_some_and(|s| s.external_id == external_id)
    })
}
