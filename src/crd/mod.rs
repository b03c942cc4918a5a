//! Custom Resource Definitions for Uptime-K8s
//!
//! This module defines the Kubernetes CRDs reconciled against the external
//! monitoring service, plus the capability trait they implement.

mod maintenance_window;
mod managed;
mod monitor;
pub mod types;

pub use maintenance_window::{MaintenanceWindow, MaintenanceWindowSpec, WindowType};
pub use managed::{DesiredEntity, ManagedResource};
pub use monitor::{
    KeywordConfig, KeywordMatch, Monitor, MonitorSpec, MonitorType, MIN_INTERVAL_SECONDS,
};
pub use types::*;
