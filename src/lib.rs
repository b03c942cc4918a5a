//! uptime-k8s: Kubernetes operator for uptime monitoring
//!
//! This crate reconciles `Monitor` and `MaintenanceWindow` custom resources
//! against an external monitoring API. Each record owns at most one external
//! entity; the operator creates, adopts, updates and deletes it, and keeps a
//! finalizer on the record until the external side has been cleaned up.

pub mod client;
pub mod controller;
pub mod crd;
pub mod error;
pub mod telemetry;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
