//! Remote gateway over a PostgREST-style REST backend.
//!
//! Tables live under `/rest/v1/<table>`, the session under `/auth/v1/user`.
//! Requests carry the project's anon key as `apikey` and the user's access
//! token (when signed in) as a bearer token.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::RemoteGateway;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult, SyncError};
use crate::types::{EntityKind, Fields, Record, RecordId};

const MAX_LOG_BODY_CHARS: usize = 512;

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionUser {
    id: String,
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    GatewayError::Network(err.to_string())
}

fn log_response(status: StatusCode, body: &str) {
    if status.is_success() {
        debug!(%status, "Gateway response");
        return;
    }
    let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
    if body.chars().count() > MAX_LOG_BODY_CHARS {
        preview.push_str("...");
    }
    debug!(%status, body = %preview, "Gateway error response");
}

/// Body sent on insert: the record's columns with the owner forced and any
/// temporary id dropped so the server assigns one.
fn insert_payload(record: &Record, owner_id: &str) -> Fields {
    let mut payload = record.fields.clone();
    if !record.id.is_temporary() {
        payload.insert("id".into(), record.id.as_str().into());
    }
    payload.insert("user_id".into(), owner_id.into());
    payload.insert(
        "created_at".into(),
        record.created_at.to_rfc3339().into(),
    );
    payload
}

fn update_payload(changes: &Fields) -> Fields {
    let mut payload = changes.clone();
    for key in ["id", "user_id", "created_at"] {
        payload.remove(key);
    }
    payload.insert("updated_at".into(), Utc::now().to_rfc3339().into());
    payload
}

/// [`RemoteGateway`] over HTTP
#[derive(Debug, Clone)]
pub struct PostgrestGateway {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
}

impl PostgrestGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, SyncError> {
        let base_url = config
            .url
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| SyncError::Config("gateway url is not set".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            anon_key: config.anon_key.clone().unwrap_or_default(),
            access_token: config.access_token.clone(),
        })
    }

    /// Replace the session token (after sign-in or refresh)
    pub fn set_access_token(&mut self, token: Option<String>) {
        self.access_token = token;
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, kind: EntityKind) -> String {
        format!("{}/rest/v1/{}", self.base_url, kind.table())
    }

    fn headers(&self) -> GatewayResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let apikey = HeaderValue::from_str(&self.anon_key)
            .map_err(|_| GatewayError::Decode("invalid anon key format".into()))?;
        headers.insert("apikey", apikey);

        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", bearer))
            .map_err(|_| GatewayError::Unauthenticated)?;
        headers.insert(AUTHORIZATION, auth_value);

        Ok(headers)
    }

    /// Send a request and return the body of a successful response.
    async fn execute(&self, request: reqwest::RequestBuilder) -> GatewayResult<String> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        log_response(status, &body);

        if status.is_success() {
            return Ok(body);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Unauthenticated);
        }

        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .ok()
            .and_then(|e| e.message.or(e.msg).or(e.error_description))
            .unwrap_or(body);
        Err(GatewayError::api(status.as_u16(), message))
    }

    fn decode_rows(body: &str) -> GatewayResult<Vec<Record>> {
        serde_json::from_str(body).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    fn first_row(body: &str, what: &RecordId) -> GatewayResult<Record> {
        Self::decode_rows(body)?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::NotFound(what.to_string()))
    }
}

#[async_trait]
impl RemoteGateway for PostgrestGateway {
    async fn list(&self, kind: EntityKind, owner_id: &str) -> GatewayResult<Vec<Record>> {
        let request = self
            .client
            .get(self.table_url(kind))
            .headers(self.headers()?)
            .query(&[
                ("select", "*".to_string()),
                ("user_id", format!("eq.{}", owner_id)),
                ("order", "created_at.desc".to_string()),
            ]);
        let body = self.execute(request).await?;
        Self::decode_rows(&body)
    }

    async fn create(
        &self,
        kind: EntityKind,
        record: &Record,
        owner_id: &str,
    ) -> GatewayResult<Record> {
        let request = self
            .client
            .post(self.table_url(kind))
            .headers(self.headers()?)
            .header("Prefer", "return=representation")
            .json(&vec![insert_payload(record, owner_id)]);
        let body = self.execute(request).await?;
        Self::first_row(&body, &record.id)
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &RecordId,
        changes: &Fields,
        owner_id: &str,
    ) -> GatewayResult<Record> {
        let request = self
            .client
            .patch(self.table_url(kind))
            .headers(self.headers()?)
            .header("Prefer", "return=representation")
            .query(&[
                ("id", format!("eq.{}", id)),
                ("user_id", format!("eq.{}", owner_id)),
            ])
            .json(&update_payload(changes));
        let body = self.execute(request).await?;
        Self::first_row(&body, id)
    }

    async fn delete(&self, kind: EntityKind, id: &RecordId, owner_id: &str) -> GatewayResult<()> {
        let request = self
            .client
            .delete(self.table_url(kind))
            .headers(self.headers()?)
            .query(&[
                ("id", format!("eq.{}", id)),
                ("user_id", format!("eq.{}", owner_id)),
            ]);
        self.execute(request).await?;
        Ok(())
    }

    async fn current_user_id(&self) -> GatewayResult<Option<String>> {
        if self.access_token.is_none() {
            return Ok(None);
        }
        let request = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .headers(self.headers()?);
        match self.execute(request).await {
            Ok(body) => {
                let user: SessionUser =
                    serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))?;
                Ok(Some(user.id))
            }
            Err(GatewayError::Unauthenticated) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
