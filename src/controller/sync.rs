//! External synchronization protocol
//!
//! Decides, per record, whether the external entity has to be created,
//! adopted, updated, recreated after out-of-band deletion, or replaced after a
//! type change, and records the result on the status block as a
//! Ready/Synced/Error triple.
//!
//! | Observed state                         | Action                                  |
//! |----------------------------------------|-----------------------------------------|
//! | no external id, adoption annotation    | get + type check + update (adopt)       |
//! | no external id                         | create, resolve duplicates on conflict  |
//! | external id, same type                 | update, recreate on not-found           |
//! | external id, different type            | delete, then create                     |
//!
//! Creation is attempted once per reconcile. A duplicate-conflict answer is
//! resolved against a fresh listing so that a lost create response, or a
//! sibling record racing for the same entity, ends in adoption instead of a
//! second entity.

use chrono::Utc;
use tracing::{info, warn};

use super::conditions::{set_error, set_ready, set_synced};
use super::resolver::{resolve_duplicate, Resolution};
use crate::client::{ApiError, Collection, MonitoringApi};
use crate::crd::{DesiredEntity, ResourceStatus};
use crate::error::{Error, Result};

pub const REASON_SYNCED: &str = "Synced";
pub const REASON_NO_ERROR: &str = "NoError";
pub const REASON_VALIDATION_FAILED: &str = "ValidationFailed";
pub const REASON_SYNC_FAILED: &str = "SyncFailed";

/// What a successful sync did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A new entity was created
    Created,
    /// The entity named by the adoption annotation was bound
    Adopted,
    /// Create reported a duplicate and the existing entity was bound
    AdoptedDuplicate,
    /// The existing entity was updated in place
    Updated,
    /// The entity had vanished out-of-band and was created again
    Recreated,
    /// The entity type changed and the entity was deleted and recreated
    Replaced,
}

/// Inputs for one sync pass
#[derive(Clone, Copy, Debug)]
pub struct SyncRequest<'a> {
    pub collection: Collection,
    pub desired: &'a DesiredEntity,
    /// External id from the adoption annotation
    pub adopt_id: Option<&'a str>,
    /// Generation of the desired state being synced
    pub generation: Option<i64>,
}

/// Reject stored or annotated identities that cannot address an entity
pub fn validate_external_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') || id.chars().any(char::is_whitespace) {
        return Err(Error::ValidationError(format!(
            "external id {id:?} is malformed"
        )));
    }
    Ok(())
}

/// Run one sync pass and record the result on `status`
///
/// On success the status carries the external identity and Ready=True,
/// Synced=True, Error=False. Validation failures set Ready=False and
/// Error=True and leave Synced alone. Any other failure sets all three to
/// the failing side while keeping the previously synced identity.
pub async fn sync_external(
    api: &dyn MonitoringApi,
    request: SyncRequest<'_>,
    status: &mut ResourceStatus,
) -> Result<SyncOutcome> {
    let result = run_sync(api, &request, status).await;
    let generation = request.generation;
    status.observed_generation = generation;

    match &result {
        Ok(outcome) => {
            let message = format!("Synced with external entity {}", status.external_id);
            status.ready = true;
            status.synced_type = Some(request.desired.entity_type.clone());
            status.last_synced_time = Some(Utc::now().to_rfc3339());
            set_ready(&mut status.conditions, true, REASON_SYNCED, &message, generation);
            set_synced(&mut status.conditions, true, REASON_SYNCED, &message, generation);
            set_error(&mut status.conditions, false, REASON_NO_ERROR, "", generation);
            info!(
                collection = %request.collection,
                external_id = %status.external_id,
                ?outcome,
                "External entity synced"
            );
        }
        Err(e) if e.is_validation() => {
            let message = e.to_string();
            status.ready = false;
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
        }
        Err(e) => {
            let message = e.to_string();
            status.ready = false;
            set_ready(&mut status.conditions, false, REASON_SYNC_FAILED, &message, generation);
            set_synced(&mut status.conditions, false, REASON_SYNC_FAILED, &message, generation);
            set_error(&mut status.conditions, true, REASON_SYNC_FAILED, &message, generation);
        }
    }

    result
}

async fn run_sync(
    api: &dyn MonitoringApi,
    request: &SyncRequest<'_>,
    status: &mut ResourceStatus,
) -> Result<SyncOutcome> {
    let collection = request.collection;
    let desired = request.desired;

    if !status.has_external_id() {
        if let Some(adopt_id) = request.adopt_id {
            let id = adopt(api, request, adopt_id).await?;
            status.external_id = id;
            return Ok(SyncOutcome::Adopted);
        }

        let (id, adopted) = create_or_resolve(api, collection, desired).await?;
        status.external_id = id;
        return Ok(if adopted {
            SyncOutcome::AdoptedDuplicate
        } else {
            SyncOutcome::Created
        });
    }

    validate_external_id(&status.external_id)?;

    let type_changed = status
        .synced_type
        .as_deref()
        .is_some_and(|synced| synced != desired.entity_type);

    if type_changed {
        info!(
            collection = %collection,
            external_id = %status.external_id,
            from = ?status.synced_type,
            to = %desired.entity_type,
            "Entity type changed, replacing external entity"
        );
        // Identity stays recorded until the delete has actually happened.
        api.delete(collection, &status.external_id).await?;
        status.external_id.clear();
        status.synced_type = None;
        status.ready = false;

        let (id, _) = create_or_resolve(api, collection, desired).await?;
        status.external_id = id;
        return Ok(SyncOutcome::Replaced);
    }

    match api
        .update(collection, &status.external_id, &desired.payload)
        .await
    {
        Ok(()) => Ok(SyncOutcome::Updated),
        Err(ApiError::NotFound(_)) => {
            warn!(
                collection = %collection,
                external_id = %status.external_id,
                "External entity vanished, recreating"
            );
            let (id, _) = create_or_resolve(api, collection, desired).await?;
            status.external_id = id;
            Ok(SyncOutcome::Recreated)
        }
        Err(e) => Err(e.into()),
    }
}

/// Bind to the entity named by the adoption annotation and push the desired spec
async fn adopt(api: &dyn MonitoringApi, request: &SyncRequest<'_>, adopt_id: &str) -> Result<String> {
    let adopt_id = adopt_id.trim();
    validate_external_id(adopt_id)?;

    let entity = match api.get(request.collection, adopt_id).await {
        Ok(entity) => entity,
        Err(ApiError::NotFound(_)) => {
            return Err(Error::ValidationError(format!(
                "adoption target {adopt_id} does not exist in {}",
                request.collection
            )))
        }
        Err(e) => return Err(e.into()),
    };

    if !entity.entity_type.eq_ignore_ascii_case(&request.desired.entity_type) {
        return Err(Error::ValidationError(format!(
            "adoption target {adopt_id} has type {}, desired type is {}",
            entity.entity_type, request.desired.entity_type
        )));
    }

    api.update(request.collection, adopt_id, &request.desired.payload)
        .await?;
    info!(collection = %request.collection, external_id = %adopt_id, "Adopted external entity");
    Ok(adopt_id.to_string())
}

/// Create the entity, falling back to duplicate resolution on conflict
///
/// Returns the identity and whether it was adopted from an existing entity.
async fn create_or_resolve(
    api: &dyn MonitoringApi,
    collection: Collection,
    desired: &DesiredEntity,
) -> Result<(String, bool)> {
    let conflict = match api.create(collection, &desired.payload).await {
        Ok(id) => {
            validate_external_id(&id)?;
            return Ok((id, false));
        }
        Err(e) if e.is_conflict() => e,
        Err(e) => return Err(e.into()),
    };

    let entities = api.list(collection).await?;
    match resolve_duplicate(
        &entities,
        &desired.entity_type,
        desired.url.as_deref(),
        &desired.name,
    ) {
        Resolution::Matched(entity) => {
            info!(
                collection = %collection,
                external_id = %entity.id,
                "Create reported a duplicate, adopting existing entity"
            );
            validate_external_id(&entity.id)?;
            api.update(collection, &entity.id, &desired.payload).await?;
            Ok((entity.id.clone(), true))
        }
        Resolution::Ambiguous(count) => Err(Error::ValidationError(format!(
            "{count} existing entities in {collection} match {:?}; set the adoption annotation to pick one",
            desired.name
        ))),
        Resolution::TypeMismatch(entity) => Err(Error::ValidationError(format!(
            "existing entity {} in {collection} matches {:?} but has type {}, desired type is {}",
            entity.id, desired.name, entity.entity_type, desired.entity_type
        ))),
        Resolution::NoCandidate => Err(conflict.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_external_id() {
        assert!(validate_external_id("12345").is_ok());
        assert!(validate_external_id("abc-def").is_ok());
        assert!(validate_external_id("").is_err());
        assert!(validate_external_id("12 34").is_err());
        assert!(validate_external_id("../etc").is_err());
    }
}
