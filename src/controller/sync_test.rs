//! Tests for the external synchronization protocol

use serde_json::json;

use super::conditions::{
    find_condition, CONDITION_TYPE_ERROR, CONDITION_TYPE_READY, CONDITION_TYPE_SYNCED,
};
use super::sync::*;
use super::testing::{Fail, FakeMonitoringApi};
use crate::client::{Collection, ExternalEntity};
use crate::crd::{DesiredEntity, ResourceStatus};

fn desired(name: &str, entity_type: &str, url: &str) -> DesiredEntity {
    DesiredEntity {
        entity_type: entity_type.to_string(),
        url: Some(url.to_string()),
        name: name.to_string(),
        payload: json!({
            "friendlyName": name,
            "type": entity_type,
            "url": url,
            "interval": 300,
        }),
    }
}

fn request(desired: &DesiredEntity) -> SyncRequest<'_> {
    SyncRequest {
        collection: Collection::Monitors,
        desired,
        adopt_id: None,
        generation: Some(1),
    }
}

fn entity(id: &str, name: &str, entity_type: &str, url: &str) -> ExternalEntity {
    ExternalEntity {
        id: id.to_string(),
        entity_type: entity_type.to_string(),
        url: Some(url.to_string()),
        name: name.to_string(),
        ..Default::default()
    }
}

fn condition_status(status: &ResourceStatus, type_: &str) -> String {
    find_condition(&status.conditions, type_)
        .map(|c| c.status.clone())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_first_sync_creates_entity() {
    let api = FakeMonitoringApi::new();
    let web = desired("web", "HTTP", "https://example.com");
    let mut status = ResourceStatus::default();

    let outcome = sync_external(&api, request(&web), &mut status).await.unwrap();

    assert_eq!(outcome, SyncOutcome::Created);
    assert_eq!(status.external_id, "101");
    assert!(status.ready);
    assert_eq!(status.synced_type.as_deref(), Some("HTTP"));
    assert_eq!(status.observed_generation, Some(1));
    assert!(status.last_synced_time.is_some());
    assert_eq!(condition_status(&status, CONDITION_TYPE_READY), "True");
    assert_eq!(condition_status(&status, CONDITION_TYPE_SYNCED), "True");
    assert_eq!(condition_status(&status, CONDITION_TYPE_ERROR), "False");
}

#[tokio::test]
async fn test_second_pass_is_idempotent() {
    let api = FakeMonitoringApi::new();
    let web = desired("web", "HTTP", "https://example.com");
    let mut status = ResourceStatus::default();
    sync_external(&api, request(&web), &mut status).await.unwrap();
    let first = status.clone();
    api.clear_calls();

    let outcome = sync_external(&api, request(&web), &mut status).await.unwrap();

    assert_eq!(outcome, SyncOutcome::Updated);
    assert_eq!(api.calls(), vec!["update:101".to_string()]);
    assert_eq!(status.external_id, first.external_id);
    assert_eq!(status.conditions, first.conditions);
    assert_eq!(api.len(), 1);
}

#[tokio::test]
async fn test_out_of_band_deletion_recreates() {
    let api = FakeMonitoringApi::new();
    let web = desired("web", "HTTP", "https://example.com");
    let mut status = ResourceStatus::default();
    sync_external(&api, request(&web), &mut status).await.unwrap();
    api.remove("101");

    let outcome = sync_external(&api, request(&web), &mut status).await.unwrap();

    assert_eq!(outcome, SyncOutcome::Recreated);
    assert_eq!(status.external_id, "102");
    assert!(status.ready);
    assert_eq!(condition_status(&status, CONDITION_TYPE_ERROR), "False");
}

#[tokio::test]
async fn test_type_change_deletes_then_creates() {
    let api = FakeMonitoringApi::new();
    let mut status = ResourceStatus::default();
    let http = desired("web", "HTTP", "https://example.com");
    sync_external(&api, request(&http), &mut status).await.unwrap();
    api.clear_calls();

    let keyword = desired("web", "KEYWORD", "https://example.com");
    let outcome = sync_external(&api, request(&keyword), &mut status)
        .await
        .unwrap();

    assert_eq!(outcome, SyncOutcome::Replaced);
    assert_eq!(
        api.calls(),
        vec!["delete:101".to_string(), "create".to_string()]
    );
    assert_eq!(status.external_id, "102");
    assert_eq!(status.synced_type.as_deref(), Some("KEYWORD"));
    assert!(api.entity("101").is_none());
}

#[tokio::test]
async fn test_type_change_delete_failure_keeps_identity() {
    let api = FakeMonitoringApi::new();
    let mut status = ResourceStatus::default();
    let http = desired("web", "HTTP", "https://example.com");
    sync_external(&api, request(&http), &mut status).await.unwrap();

    api.fail_next("delete", Fail::Server);
    let keyword = desired("web", "KEYWORD", "https://example.com");
    let err = sync_external(&api, request(&keyword), &mut status)
        .await
        .unwrap_err();

    assert!(err.is_retriable());
    assert_eq!(status.external_id, "101");
    assert_eq!(status.synced_type.as_deref(), Some("HTTP"));
    assert!(!status.ready);
    assert_eq!(condition_status(&status, CONDITION_TYPE_READY), "False");
    assert_eq!(condition_status(&status, CONDITION_TYPE_SYNCED), "False");
    assert_eq!(condition_status(&status, CONDITION_TYPE_ERROR), "True");
}

#[tokio::test]
async fn test_adoption_annotation_binds_existing_entity() {
    let api = FakeMonitoringApi::new();
    api.insert(entity("555", "legacy", "HTTP", "https://example.com"));
    let web = desired("web", "HTTP", "https://example.com");
    let mut status = ResourceStatus::default();

    let outcome = sync_external(
        &api,
        SyncRequest {
            adopt_id: Some("555"),
            ..request(&web)
        },
        &mut status,
    )
    .await
    .unwrap();

    assert_eq!(outcome, SyncOutcome::Adopted);
    assert_eq!(status.external_id, "555");
    assert_eq!(api.calls(), vec!["get:555".to_string(), "update:555".to_string()]);
    assert_eq!(api.entity("555").unwrap().name, "web");
}

#[tokio::test]
async fn test_adoption_of_missing_entity_is_validation_failure() {
    let api = FakeMonitoringApi::new();
    let web = desired("web", "HTTP", "https://example.com");
    let mut status = ResourceStatus::default();

    let err = sync_external(
        &api,
        SyncRequest {
            adopt_id: Some("404"),
            ..request(&web)
        },
        &mut status,
    )
    .await
    .unwrap_err();

    assert!(err.is_validation());
    assert!(!status.has_external_id());
    assert!(!status.ready);
    assert_eq!(condition_status(&status, CONDITION_TYPE_READY), "False");
    assert_eq!(condition_status(&status, CONDITION_TYPE_ERROR), "True");
    assert!(find_condition(&status.conditions, CONDITION_TYPE_SYNCED).is_none());
    assert!(!api.calls().iter().any(|c| c == "create"));
}

#[tokio::test]
async fn test_adoption_type_mismatch_leaves_synced_untouched() {
    let api = FakeMonitoringApi::new();
    api.insert(entity("555", "legacy", "PING", "example.com"));
    let web = desired("web", "HTTP", "https://example.com");
    let mut status = ResourceStatus::default();

    let err = sync_external(
        &api,
        SyncRequest {
            adopt_id: Some("555"),
            ..request(&web)
        },
        &mut status,
    )
    .await
    .unwrap_err();

    assert!(err.is_validation());
    assert!(err.to_string().contains("PING"));
    assert!(!status.has_external_id());
    assert!(find_condition(&status.conditions, CONDITION_TYPE_SYNCED).is_none());
    assert_eq!(api.entity("555").unwrap().name, "legacy");
}

#[tokio::test]
async fn test_create_conflict_adopts_matching_entity() {
    let api = FakeMonitoringApi::new();
    api.insert(entity("42", "web", "HTTP", "https://example.com/"));
    let web = desired("web", "HTTP", "https://example.com");
    let mut status = ResourceStatus::default();

    let outcome = sync_external(&api, request(&web), &mut status).await.unwrap();

    assert_eq!(outcome, SyncOutcome::AdoptedDuplicate);
    assert_eq!(status.external_id, "42");
    assert_eq!(
        api.calls(),
        vec!["create".to_string(), "list".to_string(), "update:42".to_string()]
    );
    assert_eq!(api.len(), 1);
}

#[tokio::test]
async fn test_create_conflict_with_other_type_is_not_adopted() {
    let api = FakeMonitoringApi::new();
    api.insert(entity("42", "web", "PING", "https://example.com"));
    let web = desired("web", "HTTP", "https://example.com");
    let mut status = ResourceStatus::default();

    let err = sync_external(&api, request(&web), &mut status)
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(err.to_string().contains("PING"));
    assert!(!status.has_external_id());
    assert!(status.synced_type.is_none());
    assert!(!api.calls().iter().any(|c| c.starts_with("update")));
    assert_eq!(api.entity("42").unwrap().entity_type, "PING");
}

#[tokio::test]
async fn test_create_conflict_without_candidate_is_transient() {
    let api = FakeMonitoringApi::new();
    api.fail_next("create", Fail::Conflict);
    let web = desired("web", "HTTP", "https://example.com");
    let mut status = ResourceStatus::default();

    let err = sync_external(&api, request(&web), &mut status)
        .await
        .unwrap_err();

    assert!(!err.is_validation());
    assert!(err.is_retriable());
    assert!(!status.has_external_id());
    assert_eq!(condition_status(&status, CONDITION_TYPE_SYNCED), "False");
}

#[tokio::test]
async fn test_create_conflict_with_ambiguous_candidates_requires_adoption() {
    let api = FakeMonitoringApi::new();
    api.insert(entity("1", "web", "HTTP", "https://example.com"));
    api.insert(entity("2", "web", "HTTP", "https://example.com"));
    let web = desired("web", "HTTP", "https://example.com");
    let mut status = ResourceStatus::default();

    let err = sync_external(&api, request(&web), &mut status)
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(!status.has_external_id());
    assert!(!api.calls().iter().any(|c| c.starts_with("update")));
}

#[tokio::test]
async fn test_malformed_stored_id_is_validation_failure() {
    let api = FakeMonitoringApi::new();
    let web = desired("web", "HTTP", "https://example.com");
    let mut status = ResourceStatus {
        external_id: "12 34".to_string(),
        synced_type: Some("HTTP".to_string()),
        ..Default::default()
    };

    let err = sync_external(&api, request(&web), &mut status)
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn test_transient_update_failure_keeps_identity() {
    let api = FakeMonitoringApi::new();
    let web = desired("web", "HTTP", "https://example.com");
    let mut status = ResourceStatus::default();
    sync_external(&api, request(&web), &mut status).await.unwrap();

    api.fail_next("update", Fail::Server);
    let err = sync_external(&api, request(&web), &mut status)
        .await
        .unwrap_err();

    assert!(err.is_retriable());
    assert_eq!(status.external_id, "101");
    assert!(!status.ready);
    assert_eq!(condition_status(&status, CONDITION_TYPE_ERROR), "True");

    // Next pass recovers and clears the error.
    sync_external(&api, request(&web), &mut status).await.unwrap();
    assert!(status.ready);
    assert_eq!(condition_status(&status, CONDITION_TYPE_ERROR), "False");
}
