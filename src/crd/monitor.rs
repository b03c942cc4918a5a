//! Monitor Custom Resource Definition
//!
//! A Monitor declares an uptime check in the external monitoring service.
//! HTTP, keyword, ping and port monitors are matched against existing
//! entities by URL and friendly name; heartbeat monitors have no URL and
//! produce a generated heartbeat URL that can be published to a Secret or
//! ConfigMap.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::managed::{DesiredEntity, ManagedResource};
use super::types::{
    validation_failure, PublishSpec, ResourceStatus, SpecValidationError,
};
use crate::client::{Collection, ExternalEntity};
use crate::error::Result;

/// Smallest check interval the monitoring service accepts, in seconds
pub const MIN_INTERVAL_SECONDS: u32 = 30;

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "uptime-k8s.io",
    version = "v1alpha1",
    kind = "Monitor",
    namespaced,
    status = "ResourceStatus",
    shortname = "mon",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".spec.url"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"ID","type":"string","jsonPath":".status.externalId"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSpec {
    /// Display name in the monitoring service
    pub friendly_name: String,

    #[serde(rename = "type", default)]
    pub monitor_type: MonitorType,

    /// Address to check; not used by heartbeat monitors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Check interval in seconds
    #[serde(default = "default_interval")]
    pub interval: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<KeywordConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Publish the heartbeat URL of a HEARTBEAT monitor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishSpec>,
}

fn default_interval() -> u32 {
    300
}

/// Supported monitor types
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum MonitorType {
    #[default]
    Http,
    Keyword,
    Ping,
    Port,
    Heartbeat,
}

impl std::fmt::Display for MonitorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorType::Http => write!(f, "HTTP"),
            MonitorType::Keyword => write!(f, "KEYWORD"),
            MonitorType::Ping => write!(f, "PING"),
            MonitorType::Port => write!(f, "PORT"),
            MonitorType::Heartbeat => write!(f, "HEARTBEAT"),
        }
    }
}

/// Keyword check configuration
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeywordConfig {
    pub value: String,

    #[serde(default)]
    pub case_sensitive: bool,

    /// Alert when the keyword exists (`Exists`) or is missing (`NotExists`)
    #[serde(default)]
    pub match_type: KeywordMatch,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum KeywordMatch {
    Exists,
    #[default]
    NotExists,
}

impl MonitorSpec {
    /// Validate the spec based on monitor type
    ///
    /// # Errors
    ///
    /// Returns every problem found, not just the first one.
    pub fn validate(&self) -> Result<(), Vec<SpecValidationError>> {
        let mut errors = Vec::new();

        if self.friendly_name.trim().is_empty() {
            errors.push(SpecValidationError::new(
                "spec.friendlyName",
                "friendlyName must not be empty",
                "Set spec.friendlyName to the name shown in the monitoring dashboard.",
            ));
        }

        if self.interval < MIN_INTERVAL_SECONDS {
            errors.push(SpecValidationError::new(
                "spec.interval",
                format!("interval must be at least {MIN_INTERVAL_SECONDS} seconds"),
                format!("Raise spec.interval to {MIN_INTERVAL_SECONDS} or more."),
            ));
        }

        let url = self.url.as_deref().map(str::trim).unwrap_or_default();
        match self.monitor_type {
            MonitorType::Heartbeat => {
                if !url.is_empty() {
                    errors.push(SpecValidationError::new(
                        "spec.url",
                        "url is not used by HEARTBEAT monitors",
                        "Remove spec.url; the heartbeat URL is generated by the service.",
                    ));
                }
            }
            MonitorType::Http | MonitorType::Keyword => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    errors.push(SpecValidationError::new(
                        "spec.url",
                        "url must be an http:// or https:// address",
                        "Set spec.url to the full address to check.",
                    ));
                }
            }
            MonitorType::Ping | MonitorType::Port => {
                if url.is_empty() {
                    errors.push(SpecValidationError::new(
                        "spec.url",
                        "url is required",
                        "Set spec.url to the host to check.",
                    ));
                }
            }
        }

        match (self.monitor_type, &self.keyword) {
            (MonitorType::Keyword, None) => errors.push(SpecValidationError::new(
                "spec.keyword",
                "keyword is required for KEYWORD monitors",
                "Add spec.keyword.value.",
            )),
            (MonitorType::Keyword, Some(k)) if k.value.is_empty() => {
                errors.push(SpecValidationError::new(
                    "spec.keyword.value",
                    "keyword.value must not be empty",
                    "Set spec.keyword.value to the text to look for.",
                ))
            }
            (MonitorType::Keyword, Some(_)) | (_, None) => {}
            (_, Some(_)) => errors.push(SpecValidationError::new(
                "spec.keyword",
                "keyword is only valid for KEYWORD monitors",
                "Remove spec.keyword or change spec.type to KEYWORD.",
            )),
        }

        if self.monitor_type == MonitorType::Port && self.port.is_none() {
            errors.push(SpecValidationError::new(
                "spec.port",
                "port is required for PORT monitors",
                "Set spec.port.",
            ));
        }

        if self.publish.is_some() && self.monitor_type != MonitorType::Heartbeat {
            errors.push(SpecValidationError::new(
                "spec.publish",
                "publish is only supported for HEARTBEAT monitors",
                "Remove spec.publish or change spec.type to HEARTBEAT.",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Request body for create and update calls
    pub fn payload(&self) -> serde_json::Value {
        let mut body = json!({
            "friendlyName": self.friendly_name,
            "type": self.monitor_type.to_string(),
            "interval": self.interval,
        });
        if let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            body["url"] = json!(url.trim());
        }
        if let Some(keyword) = &self.keyword {
            body["keywordValue"] = json!(keyword.value);
            body["keywordCaseType"] = json!(if keyword.case_sensitive {
                "CaseSensitive"
            } else {
                "CaseInsensitive"
            });
            body["keywordType"] = json!(match keyword.match_type {
                KeywordMatch::Exists => "ALERT_EXISTS",
                KeywordMatch::NotExists => "ALERT_NOT_EXISTS",
            });
        }
        if let Some(port) = self.port {
            body["port"] = json!(port);
        }
        body
    }
}

impl ManagedResource for Monitor {
    const CONTROLLER: &'static str = "monitor";
    const COLLECTION: Collection = Collection::Monitors;
    const PUBLISH_SUFFIX: &'static str = "heartbeat";
    const PUBLISH_KEY: &'static str = "url";

    fn desired(&self) -> Result<DesiredEntity> {
        self.spec
            .validate()
            .map_err(|errors| validation_failure(&errors))?;

        Ok(DesiredEntity {
            entity_type: self.spec.monitor_type.to_string(),
            url: self
                .spec
                .url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(String::from),
            name: self.spec.friendly_name.trim().to_string(),
            payload: self.spec.payload(),
        })
    }

    fn resource_status(&self) -> Option<&ResourceStatus> {
        self.status.as_ref()
    }

    fn publish_spec(&self) -> Option<&PublishSpec> {
        self.spec.publish.as_ref()
    }

    fn produces_value(&self) -> bool {
        self.spec.monitor_type == MonitorType::Heartbeat
            && self.spec.publish.as_ref().is_some_and(|p| p.enabled)
    }

    fn published_value(&self, entity: &ExternalEntity) -> Option<String> {
        if self.spec.monitor_type != MonitorType::Heartbeat {
            return None;
        }
        entity.heartbeat_url.clone().filter(|u| !u.is_empty())
    }
}
