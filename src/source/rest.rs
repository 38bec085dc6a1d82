use super::{EntityPage, EntitySource, Keyed};
use crate::core::{OpaqueId, SourceError, SourceResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Entity as returned by the dashboard backend: its key plus every other
/// field untouched.
///
/// `id` is the raw key. A row whose id field is missing holds an empty key
/// and a non-string id is kept rendered as JSON; index builds skip both as
/// malformed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteEntity {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Keyed for RemoteEntity {
    fn opaque_key(&self) -> &str {
        &self.id
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPage {
    items: Vec<Value>,
    page: u32,
    total_pages: u32,
}

/// REST client over one backend collection.
///
/// Lists with `GET {base}/{collection}?page=&limit=` and fetches with
/// `GET {base}/{collection}/{id}`.
#[derive(Debug, Clone)]
pub struct RestSource {
    client: reqwest::Client,
    collection_url: String,
    id_field: String,
    bearer_token: Option<String>,
    timeout: Duration,
}

impl RestSource {
    pub fn new(base_url: &str, collection: &str) -> SourceResult<Self> {
        let collection_url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            collection.trim_matches('/')
        );

        Ok(Self {
            client: build_client(DEFAULT_TIMEOUT)?,
            collection_url,
            id_field: "id".to_string(),
            bearer_token: None,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Name of the JSON field holding the opaque id.
    pub fn id_field(mut self, field: &str) -> Self {
        self.id_field = field.to_string();
        self
    }

    pub fn bearer_token(mut self, token: &str) -> Self {
        self.bearer_token = Some(token.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> SourceResult<Self> {
        self.client = build_client(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    pub fn collection_url(&self) -> &str {
        &self.collection_url
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn map_transport(&self, err: reqwest::Error) -> SourceError {
        if err.is_timeout() {
            SourceError::Timeout(self.timeout.as_millis() as u64)
        } else {
            SourceError::Transport(err.to_string())
        }
    }

    async fn check_status(response: reqwest::Response) -> SourceResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(SourceError::Status {
            status: status.as_u16(),
            message,
        })
    }

    fn decode_entity(&self, value: Value) -> RemoteEntity {
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => {
                return RemoteEntity {
                    id: other.to_string(),
                    fields: Map::new(),
                };
            }
        };

        let id = match fields.remove(&self.id_field) {
            Some(Value::String(id)) => id,
            Some(other) => other.to_string(),
            None => String::new(),
        };

        RemoteEntity { id, fields }
    }
}

fn build_client(timeout: Duration) -> SourceResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| SourceError::Transport(err.to_string()))
}

#[async_trait]
impl EntitySource for RestSource {
    type Entity = RemoteEntity;

    async fn list(&self, page: u32, limit: u32) -> SourceResult<EntityPage<RemoteEntity>> {
        let response = self
            .request(&self.collection_url)
            .query(&[("page", page), ("limit", limit)])
            .send()
            .await
            .map_err(|err| self.map_transport(err))?;

        let raw: RawPage = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|err| SourceError::Decode(err.to_string()))?;

        let items = raw
            .items
            .into_iter()
            .map(|value| self.decode_entity(value))
            .collect();

        Ok(EntityPage {
            items,
            page: raw.page,
            total_pages: raw.total_pages,
        })
    }

    async fn get_by_id(&self, id: &OpaqueId) -> SourceResult<RemoteEntity> {
        let url = format!("{}/{}", self.collection_url, id);
        let response = self
            .request(&url)
            .send()
            .await
            .map_err(|err| self.map_transport(err))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(id.to_string()));
        }

        let value: Value = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|err| SourceError::Decode(err.to_string()))?;

        if !value.is_object() {
            return Err(SourceError::Decode("entity is not a JSON object".to_string()));
        }
        Ok(self.decode_entity(value))
    }
}
