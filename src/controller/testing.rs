//! In-memory collaborators for engine tests

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::events::{EventSink, EventType};
use super::publisher::{TargetObject, TargetStore};
use crate::client::{ApiError, Collection, ExternalEntity, MonitoringApi};
use crate::crd::PublishTargetKind;
use crate::error::{Error, Result};

/// Failure to inject on the next call of an operation
#[derive(Clone, Copy, Debug)]
pub enum Fail {
    Conflict,
    NotFound,
    Server,
}

impl Fail {
    fn into_error(self, context: &str) -> ApiError {
        match self {
            Fail::Conflict => ApiError::Conflict(context.to_string()),
            Fail::NotFound => ApiError::NotFound(context.to_string()),
            Fail::Server => ApiError::Server {
                status: 503,
                message: "service unavailable".to_string(),
            },
        }
    }
}

#[derive(Default)]
struct FakeState {
    entities: BTreeMap<String, ExternalEntity>,
    payloads: HashMap<String, Value>,
    next_id: u64,
    calls: Vec<String>,
    failures: HashMap<&'static str, Vec<Fail>>,
}

/// Monitoring API backed by a map; `create` answers Conflict when an entity
/// with the same name already exists
#[derive(Default)]
pub struct FakeMonitoringApi {
    state: Mutex<FakeState>,
}

fn entity_from_payload(id: &str, payload: &Value) -> ExternalEntity {
    let name = payload["friendlyName"]
        .as_str()
        .or_else(|| payload["name"].as_str())
        .unwrap_or_default();
    ExternalEntity {
        id: id.to_string(),
        entity_type: payload["type"].as_str().unwrap_or_default().to_string(),
        url: payload["url"].as_str().map(String::from),
        name: name.to_string(),
        interval: payload["interval"].as_u64().map(|i| i as u32),
        heartbeat_url: (payload["type"] == "HEARTBEAT")
            .then(|| format!("https://heartbeat.example/{id}")),
    }
}

impl FakeMonitoringApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_id: 100,
                ..Default::default()
            }),
        }
    }

    /// Seed an entity without recording a call
    pub fn insert(&self, entity: ExternalEntity) {
        let mut state = self.state.lock().unwrap();
        state.entities.insert(entity.id.clone(), entity);
    }

    /// Remove an entity out-of-band
    pub fn remove(&self, id: &str) {
        self.state.lock().unwrap().entities.remove(id);
    }

    pub fn fail_next(&self, operation: &'static str, fail: Fail) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(operation)
            .or_default()
            .push(fail);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn entity(&self, id: &str) -> Option<ExternalEntity> {
        self.state.lock().unwrap().entities.get(id).cloned()
    }

    pub fn payload(&self, id: &str) -> Option<Value> {
        self.state.lock().unwrap().payloads.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entities.len()
    }

    fn begin(&self, call: String, operation: &'static str) -> Option<Fail> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        let queue = state.failures.get_mut(operation)?;
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }
}

#[async_trait]
impl MonitoringApi for FakeMonitoringApi {
    async fn create(&self, collection: Collection, payload: &Value) -> Result<String, ApiError> {
        if let Some(fail) = self.begin("create".to_string(), "create") {
            return Err(fail.into_error(collection.path()));
        }
        let mut state = self.state.lock().unwrap();
        let candidate = entity_from_payload("", payload);
        if state
            .entities
            .values()
            .any(|e| !candidate.name.is_empty() && e.name == candidate.name)
        {
            return Err(ApiError::Conflict(candidate.name));
        }
        state.next_id += 1;
        let id = state.next_id.to_string();
        state
            .entities
            .insert(id.clone(), entity_from_payload(&id, payload));
        state.payloads.insert(id.clone(), payload.clone());
        Ok(id)
    }

    async fn update(&self, _collection: Collection, id: &str, payload: &Value) -> Result<(), ApiError> {
        if let Some(fail) = self.begin(format!("update:{id}"), "update") {
            return Err(fail.into_error(id));
        }
        let mut state = self.state.lock().unwrap();
        if !state.entities.contains_key(id) {
            return Err(ApiError::NotFound(id.to_string()));
        }
        state
            .entities
            .insert(id.to_string(), entity_from_payload(id, payload));
        state.payloads.insert(id.to_string(), payload.clone());
        Ok(())
    }

    async fn get(&self, _collection: Collection, id: &str) -> Result<ExternalEntity, ApiError> {
        if let Some(fail) = self.begin(format!("get:{id}"), "get") {
            return Err(fail.into_error(id));
        }
        self.state
            .lock()
            .unwrap()
            .entities
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }

    async fn delete(&self, _collection: Collection, id: &str) -> Result<(), ApiError> {
        if let Some(fail) = self.begin(format!("delete:{id}"), "delete") {
            return Err(fail.into_error(id));
        }
        self.state.lock().unwrap().entities.remove(id);
        Ok(())
    }

    async fn list(&self, _collection: Collection) -> Result<Vec<ExternalEntity>, ApiError> {
        if let Some(fail) = self.begin("list".to_string(), "list") {
            return Err(fail.into_error("list"));
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .entities
            .values()
            .cloned()
            .collect())
    }
}

/// Event sink that keeps every event
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<(EventType, String, String)>>,
}

impl RecordingEventSink {
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reason, _)| reason.clone())
            .collect()
    }

    pub fn events(&self) -> Vec<(EventType, String, String)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn record(&self, type_: EventType, reason: &str, message: &str) {
        self.events
            .lock()
            .unwrap()
            .push((type_, reason.to_string(), message.to_string()));
    }
}

/// Secret/ConfigMap store backed by a map keyed by kind and name
#[derive(Default)]
pub struct FakeTargetStore {
    objects: Mutex<BTreeMap<(PublishTargetKind, String), TargetObject>>,
    uid_counter: Mutex<u64>,
    entry_writes: Mutex<usize>,
}

impl FakeTargetStore {
    pub fn insert(&self, object: TargetObject) {
        self.objects
            .lock()
            .unwrap()
            .insert((object.kind, object.name.clone()), object);
    }

    pub fn object(&self, kind: PublishTargetKind, name: &str) -> Option<TargetObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(kind, name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Number of in-place entry updates
    pub fn entry_writes(&self) -> usize {
        *self.entry_writes.lock().unwrap()
    }
}

#[async_trait]
impl TargetStore for FakeTargetStore {
    async fn get(&self, kind: PublishTargetKind, name: &str) -> Result<Option<TargetObject>> {
        Ok(self.object(kind, name))
    }

    async fn create(&self, object: &TargetObject) -> Result<TargetObject> {
        let mut objects = self.objects.lock().unwrap();
        let key = (object.kind, object.name.clone());
        if objects.contains_key(&key) {
            return Err(Error::ConfigError(format!("{} already exists", object.name)));
        }
        let mut counter = self.uid_counter.lock().unwrap();
        *counter += 1;
        let mut created = object.clone();
        created.uid = Some(format!("target-uid-{counter}"));
        objects.insert(key, created.clone());
        Ok(created)
    }

    async fn set_entry(
        &self,
        object: &TargetObject,
        key: &str,
        value: &str,
        stale_key: Option<&str>,
    ) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let existing = objects
            .get_mut(&(object.kind, object.name.clone()))
            .ok_or_else(|| Error::ConfigError(format!("{} missing", object.name)))?;
        if let Some(stale) = stale_key {
            existing.data.remove(stale);
        }
        existing.data.insert(key.to_string(), value.to_string());
        *self.entry_writes.lock().unwrap() += 1;
        Ok(())
    }

    async fn delete(&self, kind: PublishTargetKind, name: &str) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(kind, name.to_string()));
        Ok(())
    }
}
