//! reqwest-backed implementation of [`MonitoringApi`]
//!
//! Endpoints, relative to the configured base URL:
//! - `POST   /{collection}`       create, answers `{"id": ...}`
//! - `PUT    /{collection}/{id}`  update
//! - `GET    /{collection}/{id}`  get
//! - `DELETE /{collection}/{id}`  delete
//! - `GET    /{collection}?cursor=` list, answers `{"data": [...], "nextCursor": ...}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{ApiError, Collection, ExternalEntity, MonitoringApi};

/// Upper bound on list pages, guards against a cursor that never ends
const MAX_LIST_PAGES: usize = 1000;

/// Client for the monitoring service REST API
#[derive(Clone, Debug)]
pub struct HttpMonitoringApi {
    http_client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityBody {
    id: Value,
    #[serde(rename = "type", default)]
    entity_type: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, alias = "friendlyName")]
    name: String,
    #[serde(default)]
    interval: Option<u32>,
    #[serde(default)]
    heartbeat_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    data: Vec<EntityBody>,
    #[serde(default)]
    next_cursor: Option<String>,
}

impl HttpMonitoringApi {
    /// Create a new client; `timeout` bounds every individual request
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn collection_url(&self, collection: Collection) -> String {
        format!("{}/{}", self.base_url, collection.path())
    }

    fn entity_url(&self, collection: Collection, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection.path(), id)
    }
}

/// Map a non-success HTTP status onto an [`ApiError`]
async fn check_status(response: Response, context: &str) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let err = match status {
        StatusCode::NOT_FOUND => ApiError::NotFound(context.to_string()),
        StatusCode::CONFLICT => ApiError::Conflict(if body.is_empty() {
            context.to_string()
        } else {
            body
        }),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ApiError::Unauthorized(status.as_u16())
        }
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited,
        s if s.is_server_error() => ApiError::Server {
            status: s.as_u16(),
            message: body,
        },
        _ => ApiError::InvalidRequest(format!("{context}: HTTP {}: {body}", status.as_u16())),
    };
    Err(err)
}

/// Identifiers arrive as JSON numbers or strings
fn id_from_value(value: &Value) -> Result<String, ApiError> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(ApiError::Decode(format!("invalid entity id: {other}"))),
    }
}

impl TryFrom<EntityBody> for ExternalEntity {
    type Error = ApiError;

    fn try_from(body: EntityBody) -> Result<Self, Self::Error> {
        Ok(ExternalEntity {
            id: id_from_value(&body.id)?,
            entity_type: body.entity_type,
            url: body.url.filter(|u| !u.is_empty()),
            name: body.name,
            interval: body.interval,
            heartbeat_url: body.heartbeat_url,
        })
    }
}

#[async_trait]
impl MonitoringApi for HttpMonitoringApi {
    async fn create(&self, collection: Collection, payload: &Value) -> Result<String, ApiError> {
        let url = self.collection_url(collection);
        debug!("Creating entity in {}", collection);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await?;
        let response = check_status(response, collection.path()).await?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        id_from_value(&body["id"])
    }

    async fn update(&self, collection: Collection, id: &str, payload: &Value) -> Result<(), ApiError> {
        let url = self.entity_url(collection, id);
        debug!("Updating {} {}", collection, id);

        let response = self
            .http_client
            .put(&url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await?;
        check_status(response, id).await?;
        Ok(())
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<ExternalEntity, ApiError> {
        let url = self.entity_url(collection, id);
        debug!("Fetching {} {}", collection, id);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let response = check_status(response, id).await?;

        let body: EntityBody = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        body.try_into()
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), ApiError> {
        let url = self.entity_url(collection, id);
        debug!("Deleting {} {}", collection, id);

        let response = self
            .http_client
            .delete(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        match check_status(response, id).await {
            Ok(_) => Ok(()),
            Err(ApiError::NotFound(_)) => {
                debug!("{} {} already gone", collection, id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn list(&self, collection: Collection) -> Result<Vec<ExternalEntity>, ApiError> {
        let url = self.collection_url(collection);
        let mut entities = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let mut request = self.http_client.get(&url).bearer_auth(&self.api_key);
            if let Some(c) = &cursor {
                request = request.query(&[("cursor", c.as_str())]);
            }

            let response = check_status(request.send().await?, collection.path()).await?;
            let page: ListPage = response
                .json()
                .await
                .map_err(|e| ApiError::Decode(e.to_string()))?;

            for body in page.data {
                entities.push(ExternalEntity::try_from(body)?);
            }

            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    warn!("Monitoring API repeated cursor {}, stopping listing", next);
                    return Ok(entities);
                }
                Some(next) => cursor = Some(next),
                None => return Ok(entities),
            }
        }

        Err(ApiError::Decode(format!(
            "listing {} exceeded {} pages",
            collection, MAX_LIST_PAGES
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpMonitoringApi {
        HttpMonitoringApi::new(&server.uri(), "secret-token", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_create_returns_numeric_id_as_string() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/monitors"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 777})))
            .mount(&server)
            .await;

        let id = client(&server)
            .create(Collection::Monitors, &json!({"friendlyName": "a"}))
            .await
            .unwrap();
        assert_eq!(id, "777");
    }

    #[tokio::test]
    async fn test_create_conflict_is_distinguishable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/monitors"))
            .respond_with(ResponseTemplate::new(409).set_body_string("duplicate monitor"))
            .mount(&server)
            .await;

        let err = client(&server)
            .create(Collection::Monitors, &json!({}))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_create_malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/monitors"))
            .respond_with(ResponseTemplate::new(201).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let err = client(&server)
            .create(Collection::Monitors, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[tokio::test]
    async fn test_update_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/monitors/42"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server)
            .update(Collection::Monitors, "42", &json!({}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/maintenance-windows/9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(client(&server)
            .delete(Collection::MaintenanceWindows, "9")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/monitors/1"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/monitors/2"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/monitors/3"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/monitors/4"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad interval"))
            .mount(&server)
            .await;

        let api = client(&server);
        assert!(matches!(
            api.get(Collection::Monitors, "1").await,
            Err(ApiError::Server { status: 503, .. })
        ));
        assert!(matches!(
            api.get(Collection::Monitors, "2").await,
            Err(ApiError::RateLimited)
        ));
        assert!(matches!(
            api.get(Collection::Monitors, "3").await,
            Err(ApiError::Unauthorized(401))
        ));
        let err = api.get(Collection::Monitors, "4").await.unwrap_err();
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn test_get_parses_entity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/monitors/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "5",
                "type": "HEARTBEAT",
                "friendlyName": "cron",
                "interval": 300,
                "heartbeatUrl": "https://heartbeat.example/abc"
            })))
            .mount(&server)
            .await;

        let entity = client(&server).get(Collection::Monitors, "5").await.unwrap();
        assert_eq!(entity.id, "5");
        assert_eq!(entity.entity_type, "HEARTBEAT");
        assert_eq!(entity.name, "cron");
        assert_eq!(entity.url, None);
        assert_eq!(
            entity.heartbeat_url.as_deref(),
            Some("https://heartbeat.example/abc")
        );
    }

    #[tokio::test]
    async fn test_list_follows_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/monitors"))
            .and(query_param("cursor", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": 2, "type": "HTTP", "url": "https://b.com", "friendlyName": "B"}],
                "nextCursor": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/monitors"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": 1, "type": "HTTP", "url": "https://a.com", "friendlyName": "A"}],
                "nextCursor": "page-2"
            })))
            .mount(&server)
            .await;

        let entities = client(&server).list(Collection::Monitors).await.unwrap();
        let ids: Vec<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }
}
