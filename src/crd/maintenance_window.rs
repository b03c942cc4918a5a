//! MaintenanceWindow Custom Resource Definition
//!
//! Maintenance windows have no address, so duplicate detection falls back to
//! an exact, unambiguous name match.

use chrono::NaiveTime;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::managed::{DesiredEntity, ManagedResource};
use super::types::{validation_failure, ResourceStatus, SpecValidationError};
use crate::client::Collection;
use crate::error::Result;

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "uptime-k8s.io",
    version = "v1alpha1",
    kind = "MaintenanceWindow",
    namespaced,
    status = "ResourceStatus",
    shortname = "mw",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Start","type":"string","jsonPath":".spec.startTime"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceWindowSpec {
    /// Display name in the monitoring service
    pub name: String,

    #[serde(rename = "type", default)]
    pub window_type: WindowType,

    /// Start time, `HH:MM` (24h, UTC)
    pub start_time: String,

    /// Date for ONCE windows, `YYYY-MM-DD`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    /// Duration in minutes
    pub duration_minutes: u32,

    /// Days of week (1-7) for WEEKLY, days of month (1-31) for MONTHLY
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum WindowType {
    #[default]
    Once,
    Daily,
    Weekly,
    Monthly,
}

impl std::fmt::Display for WindowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowType::Once => write!(f, "ONCE"),
            WindowType::Daily => write!(f, "DAILY"),
            WindowType::Weekly => write!(f, "WEEKLY"),
            WindowType::Monthly => write!(f, "MONTHLY"),
        }
    }
}

impl MaintenanceWindowSpec {
    pub fn validate(&self) -> Result<(), Vec<SpecValidationError>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(SpecValidationError::new(
                "spec.name",
                "name must not be empty",
                "Set spec.name; it is the only key used to find an existing window.",
            ));
        }

        if NaiveTime::parse_from_str(&self.start_time, "%H:%M").is_err() {
            errors.push(SpecValidationError::new(
                "spec.startTime",
                format!("startTime {:?} is not HH:MM", self.start_time),
                "Use a 24h time such as 02:30.",
            ));
        }

        if self.duration_minutes == 0 {
            errors.push(SpecValidationError::new(
                "spec.durationMinutes",
                "durationMinutes must be greater than zero",
                "Set spec.durationMinutes to the window length.",
            ));
        }

        match self.window_type {
            WindowType::Once => {
                let valid = self
                    .date
                    .as_deref()
                    .is_some_and(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").is_ok());
                if !valid {
                    errors.push(SpecValidationError::new(
                        "spec.date",
                        "ONCE windows need a date in YYYY-MM-DD form",
                        "Set spec.date.",
                    ));
                }
            }
            WindowType::Daily => {}
            WindowType::Weekly => validate_days(&self.days, 7, &mut errors),
            WindowType::Monthly => validate_days(&self.days, 31, &mut errors),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        let mut body = json!({
            "name": self.name.trim(),
            "type": self.window_type.to_string(),
            "time": self.start_time,
            "duration": self.duration_minutes,
        });
        if let Some(date) = &self.date {
            body["date"] = json!(date);
        }
        if !self.days.is_empty() {
            body["days"] = json!(self.days);
        }
        body
    }
}

fn validate_days(days: &[u8], max: u8, errors: &mut Vec<SpecValidationError>) {
    if days.is_empty() {
        errors.push(SpecValidationError::new(
            "spec.days",
            "days must not be empty for WEEKLY and MONTHLY windows",
            format!("List the days (1-{max}) the window repeats on."),
        ));
        return;
    }
    if let Some(day) = days.iter().find(|d| **d == 0 || **d > max) {
        errors.push(SpecValidationError::new(
            "spec.days",
            format!("day {day} is out of range 1-{max}"),
            format!("Use values between 1 and {max}."),
        ));
    }
}

impl ManagedResource for MaintenanceWindow {
    const CONTROLLER: &'static str = "maintenancewindow";
    const COLLECTION: Collection = Collection::MaintenanceWindows;

    fn desired(&self) -> Result<DesiredEntity> {
        self.spec
            .validate()
            .map_err(|errors| validation_failure(&errors))?;

        Ok(DesiredEntity {
            entity_type: self.spec.window_type.to_string(),
            url: None,
            name: self.spec.name.trim().to_string(),
            payload: self.spec.payload(),
        })
    }

    fn resource_status(&self) -> Option<&ResourceStatus> {
        self.status.as_ref()
    }
}
