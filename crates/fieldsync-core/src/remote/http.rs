//! `reqwest`-backed client for the remote authority API.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{RemoteApi, RemoteEntity, RemoteError, RemoteResult};
use crate::config::{EngineConfig, RetryPolicy};
use crate::models::AuditEntry;
use crate::util::truncate_for_error;
use crate::{Error, Result};

const DEVICE_ID_HEADER: &str = "X-Device-Id";
const CLIENT_VERSION_HEADER: &str = "X-Client-Version";

/// Remote authority client over HTTP.
///
/// Every call gets a bounded timeout and up to `retry.max_retries` retries on
/// transport failures, timeouts and 5xx responses. 409 responses surface as
/// `RemoteError::Conflict` carrying the server snapshot and are never retried.
#[derive(Clone)]
pub struct HttpRemoteClient {
    base_url: String,
    device_id: String,
    client_version: String,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteClient")
            .field("base_url", &self.base_url)
            .field("device_id", &self.device_id)
            .field("client_version", &self.client_version)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct CreateBody<'a> {
    id: &'a str,
    data: &'a serde_json::Value,
}

#[derive(Serialize)]
struct UpdateBody<'a> {
    data: &'a serde_json::Value,
}

#[derive(Serialize)]
struct AuditBatchBody<'a> {
    entries: &'a [AuditEntry],
}

#[derive(Deserialize)]
struct AuditBatchResponse {
    ids: Vec<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl HttpRemoteClient {
    pub fn new(config: &EngineConfig, device_id: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| Error::InvalidInput(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            base_url: config.api_base_url.clone(),
            device_id: device_id.into(),
            client_version: config.client_version.clone(),
            retry: config.http_retry,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn entity_url(&self, id: &str) -> String {
        self.url(&format!("/evaluations/{}", urlencoding::encode(id)))
    }

    fn authorized(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
        request
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(DEVICE_ID_HEADER, &self.device_id)
            .header(CLIENT_VERSION_HEADER, &self.client_version)
    }

    /// Send a request built by `build`, retrying transient failures.
    async fn send_with_retry<F>(&self, operation: &str, build: F) -> RemoteResult<Response>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut attempt = 0u32;
        loop {
            let outcome = match build().send().await {
                Ok(response) => classify_response(response).await,
                Err(error) => Err(transport_error(&error)),
            };

            match outcome {
                Err(error) if error.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    attempt += 1;
                    tracing::warn!(
                        "{operation} failed ({error}); retry {attempt}/{} in {:?}",
                        self.retry.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteClient {
    async fn fetch_changed_since(
        &self,
        token: &str,
        since: Option<i64>,
    ) -> RemoteResult<Vec<RemoteEntity>> {
        let url = self.url("/evaluations");
        let response = self
            .send_with_retry("fetch_changed_since", || {
                let request = self.client.get(&url);
                let request = match since {
                    Some(since) => request.query(&[("since", since)]),
                    None => request,
                };
                self.authorized(request, token)
            })
            .await?;
        decode_json(response).await
    }

    async fn create(
        &self,
        token: &str,
        id: &str,
        data: &serde_json::Value,
    ) -> RemoteResult<RemoteEntity> {
        let url = self.url("/evaluations");
        let body = CreateBody { id, data };
        let response = self
            .send_with_retry("create", || {
                self.authorized(self.client.post(&url).json(&body), token)
            })
            .await?;
        decode_json(response).await
    }

    async fn update(
        &self,
        token: &str,
        id: &str,
        data: &serde_json::Value,
        expected_version: i64,
    ) -> RemoteResult<RemoteEntity> {
        let url = self.entity_url(id);
        let body = UpdateBody { data };
        let precondition = format!("\"{expected_version}\"");
        let response = self
            .send_with_retry("update", || {
                self.authorized(
                    self.client
                        .patch(&url)
                        .header(reqwest::header::IF_MATCH, &precondition)
                        .json(&body),
                    token,
                )
            })
            .await?;
        decode_json(response).await
    }

    async fn delete(&self, token: &str, id: &str) -> RemoteResult<()> {
        let url = self.entity_url(id);
        let outcome = self
            .send_with_retry("delete", || {
                self.authorized(self.client.delete(&url), token)
            })
            .await;

        match outcome {
            Ok(_) | Err(RemoteError::Validation { status: 404, .. }) => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn push_audit_batch(
        &self,
        token: &str,
        entries: &[AuditEntry],
    ) -> RemoteResult<Vec<String>> {
        let url = self.url("/audit-logs/batch");
        let body = AuditBatchBody { entries };
        let response = self
            .send_with_retry("push_audit_batch", || {
                self.authorized(self.client.post(&url).json(&body), token)
            })
            .await?;
        let payload: AuditBatchResponse = decode_json(response).await?;
        Ok(payload.ids)
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(self.url("/health"))
            .header(DEVICE_ID_HEADER, &self.device_id)
            .header(CLIENT_VERSION_HEADER, &self.client_version)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::debug!("Health check failed: {}", error);
                false
            }
        }
    }
}

async fn classify_response(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::CONFLICT {
        return serde_json::from_str::<RemoteEntity>(&body)
            .map(RemoteError::Conflict)
            .map_err(|error| {
                RemoteError::InvalidPayload(format!("409 body is not a snapshot: {error}"))
            })
            .and_then(Err);
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RemoteError::Unauthorized);
    }

    let message = parse_api_error(status, &body);
    if status.is_server_error() {
        Err(RemoteError::Server {
            status: status.as_u16(),
            message,
        })
    } else {
        Err(RemoteError::Validation {
            status: status.as_u16(),
            message,
        })
    }
}

fn transport_error(error: &reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Network(error.to_string())
    }
}

async fn decode_json<T: serde::de::DeserializeOwned>(response: Response) -> RemoteResult<T> {
    let body = response
        .text()
        .await
        .map_err(|error| transport_error(&error))?;
    serde_json::from_str(&body).map_err(|error| RemoteError::InvalidPayload(error.to_string()))
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return truncate_for_error(&message);
        }
    }

    let trimmed = truncate_for_error(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_api_error_prefers_json_message() {
        let message = parse_api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message":"score out of range"}"#,
        );
        assert_eq!(message, "score out of range");
    }

    #[test]
    fn parse_api_error_falls_back_to_status() {
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
        assert_eq!(parse_api_error(StatusCode::BAD_REQUEST, "nope"), "nope");
    }

    #[test]
    fn entity_urls_escape_reserved_characters() {
        let config = EngineConfig::new("https://api.example.com").unwrap();
        let client = HttpRemoteClient::new(&config, "device-1").unwrap();
        assert_eq!(
            client.entity_url("a/b c"),
            "https://api.example.com/evaluations/a%2Fb%20c"
        );
    }
}
