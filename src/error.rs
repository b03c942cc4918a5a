//! Error types for the Uptime-K8s operator

use std::time::Duration;

use thiserror::Error;

use crate::client::ApiError;

/// Errors surfaced by reconciliation
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Operator configuration is invalid or incomplete
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Terminal validation failure; retrying without a spec change cannot help
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// External monitoring API failure
    #[error("Monitoring API error: {0}")]
    Api(#[from] ApiError),

    /// A publish target exists but is not owned by the record
    #[error("{kind} {name} exists and is not managed by this resource")]
    NotManaged { kind: String, name: String },

    /// External cleanup failed and should be retried after the given delay
    #[error("Cleanup pending, retry in {retry_after:?}: {message}")]
    CleanupPending {
        retry_after: Duration,
        message: String,
    },

    /// Finalizer helper failure outside of apply/cleanup
    #[error("Finalizer error: {0}")]
    FinalizerError(String),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the normal reconcile cadence should retry this error
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_) | Error::CleanupPending { .. } | Error::FinalizerError(_) => true,
            Error::Api(e) => !e.is_terminal(),
            Error::ConfigError(_)
            | Error::ValidationError(_)
            | Error::NotManaged { .. }
            | Error::SerializationError(_) => false,
        }
    }

    /// Whether this is a terminal validation failure
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::ValidationError(_) | Error::NotManaged { .. })
    }

    /// Short label used for the error metric
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::ConfigError(_) => "config",
            Error::ValidationError(_) => "validation",
            Error::Api(_) => "api",
            Error::NotManaged { .. } => "not_managed",
            Error::CleanupPending { .. } => "cleanup_pending",
            Error::FinalizerError(_) => "finalizer",
            Error::SerializationError(_) => "serialization",
        }
    }
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(err: kube::runtime::finalizer::Error<Error>) -> Self {
        use kube::runtime::finalizer::Error as FinalizerError;
        match err {
            FinalizerError::ApplyFailed(e) | FinalizerError::CleanupFailed(e) => e,
            FinalizerError::AddFinalizer(e) | FinalizerError::RemoveFinalizer(e) => {
                Error::KubeError(e)
            }
            FinalizerError::UnnamedObject => {
                Error::FinalizerError("object has no name".to_string())
            }
            FinalizerError::InvalidFinalizer => {
                Error::FinalizerError("invalid finalizer name".to_string())
            }
        }
    }
}
