//! Client abstraction for the external monitoring API
//!
//! The service only offers plain CRUD over REST: no transactions and no
//! idempotency keys. Conflict and not-found responses are distinct
//! [`ApiError`] variants so the sync engine can branch on them without
//! inspecting messages.

mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpMonitoringApi;

/// Entity collections exposed by the monitoring API
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    Monitors,
    MaintenanceWindows,
}

impl Collection {
    /// URL path segment of the collection
    pub fn path(&self) -> &'static str {
        match self {
            Collection::Monitors => "monitors",
            Collection::MaintenanceWindows => "maintenance-windows",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

/// An entity as reported by the monitoring API
///
/// Only the attributes used for drift and duplicate detection are kept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExternalEntity {
    pub id: String,
    pub entity_type: String,
    pub url: Option<String>,
    pub name: String,
    pub interval: Option<u32>,
    /// Generated ping address of heartbeat monitors
    pub heartbeat_url: Option<String>,
}

/// Errors returned by the monitoring API
#[derive(Error, Debug)]
pub enum ApiError {
    /// An equivalent entity already exists
    #[error("entity already exists: {0}")]
    Conflict(String),

    /// The addressed entity does not exist
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("unauthorized (HTTP {0})")]
    Unauthorized(u16),

    #[error("rate limited by the monitoring API")]
    RateLimited,

    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// The service rejected the request body; resending it cannot succeed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }

    /// Errors that will not go away by retrying the same request
    pub fn is_terminal(&self) -> bool {
        matches!(self, ApiError::InvalidRequest(_))
    }
}

/// CRUD operations offered by the monitoring API
///
/// Every call is individually bounded by the implementation's request
/// timeout; dropping the returned future aborts the call.
#[async_trait]
pub trait MonitoringApi: Send + Sync {
    /// Create an entity and return its identifier
    async fn create(
        &self,
        collection: Collection,
        payload: &serde_json::Value,
    ) -> Result<String, ApiError>;

    /// Replace an entity's configuration
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), ApiError>;

    async fn get(&self, collection: Collection, id: &str) -> Result<ExternalEntity, ApiError>;

    /// Delete an entity; deleting a missing entity succeeds
    async fn delete(&self, collection: Collection, id: &str) -> Result<(), ApiError>;

    /// Full listing of a collection
    async fn list(&self, collection: Collection) -> Result<Vec<ExternalEntity>, ApiError>;
}
