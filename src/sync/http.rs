//! HTTP transport for [`RemoteApi`].
//!
//! Maps create/update/delete onto `POST {base}/{entity}` and
//! `PUT`/`DELETE {base}/{entity}/{key}`, sends the record id as an
//! `Idempotency-Key` header, and classifies the response status. There is
//! no retry loop; a transient failure waits for the next sync trigger.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tracing::debug;

use super::remote::{RemoteApi, RemoteOutcome};
use crate::config::SyncConfig;
use crate::error::ReportqError;
use crate::queue::{correlation_key, EntityType, MutationOp};

/// Header carrying the record id.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Longest response body quoted in an outcome reason.
const MAX_DETAIL_LEN: usize = 200;

/// `reqwest`-backed remote.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base: Url,
    token: Option<String>,
    correlation_field: String,
}

impl HttpRemote {
    /// Create a remote rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `ReportqError::Config` if the URL is not a usable base or the
    /// HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
        correlation_field: impl Into<String>,
    ) -> Result<Self, ReportqError> {
        let base = Url::parse(base_url)
            .map_err(|e| ReportqError::Config(format!("Invalid remote URL {base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ReportqError::Config(format!(
                "Remote URL cannot hold paths: {base_url}"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReportqError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base,
            token,
            correlation_field: correlation_field.into(),
        })
    }

    /// Create a remote from the `sync` config section.
    ///
    /// # Errors
    ///
    /// Returns `ReportqError::Config` if no remote URL is configured or it
    /// is invalid.
    pub fn from_config(config: &SyncConfig) -> Result<Self, ReportqError> {
        let url = config.remote_url.as_deref().ok_or_else(|| {
            ReportqError::Config("sync.remote_url is not set".to_string())
        })?;
        Self::new(
            url,
            config.token.clone(),
            config.timeout(),
            config.correlation_field.clone(),
        )
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(
        &self,
        operation: MutationOp,
        entity_type: &EntityType,
        payload: &Value,
        idempotency_key: &str,
    ) -> RemoteOutcome {
        let request = match operation {
            MutationOp::Create => self
                .client
                .post(self.url(&[entity_type.as_str()]))
                .json(payload),
            MutationOp::Update | MutationOp::Delete => {
                let Some(key) = correlation_key(payload, &self.correlation_field) else {
                    return RemoteOutcome::Conflict {
                        reason: format!(
                            "{operation} payload has no `{}` field",
                            self.correlation_field
                        ),
                    };
                };
                let url = self.url(&[entity_type.as_str(), &key]);
                if operation == MutationOp::Update {
                    self.client.put(url).json(payload)
                } else {
                    self.client.delete(url)
                }
            },
        };

        let mut request = request.header(IDEMPOTENCY_HEADER, idempotency_key);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                debug!(
                    idempotency_key,
                    status = status.as_u16(),
                    operation = %operation,
                    "Remote answered"
                );
                classify(operation, status, &body)
            },
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("Request timed out: {e}")
                } else if e.is_connect() {
                    format!("Connection failed: {e}")
                } else {
                    e.to_string()
                };
                RemoteOutcome::Transient { reason }
            },
        }
    }
}

/// Map an HTTP status to a replay outcome.
#[must_use]
pub fn classify(operation: MutationOp, status: StatusCode, body: &str) -> RemoteOutcome {
    if status.is_success() {
        return RemoteOutcome::Applied;
    }

    let reason = describe(status, body);
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE if operation == MutationOp::Delete => {
            RemoteOutcome::AlreadyApplied
        },
        // Credentials and rate limits say nothing about the record itself
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::PROXY_AUTHENTICATION_REQUIRED
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => RemoteOutcome::Transient { reason },
        s if s.is_client_error() => RemoteOutcome::Conflict { reason },
        _ => RemoteOutcome::Transient { reason },
    }
}

fn describe(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return status.to_string();
    }
    let detail: String = body.chars().take(MAX_DETAIL_LEN).collect();
    format!("{status}: {detail}")
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn create(
        &self,
        entity_type: &EntityType,
        payload: &Value,
        idempotency_key: &str,
    ) -> RemoteOutcome {
        self.send(MutationOp::Create, entity_type, payload, idempotency_key)
            .await
    }

    async fn update(
        &self,
        entity_type: &EntityType,
        payload: &Value,
        idempotency_key: &str,
    ) -> RemoteOutcome {
        self.send(MutationOp::Update, entity_type, payload, idempotency_key)
            .await
    }

    async fn delete(
        &self,
        entity_type: &EntityType,
        payload: &Value,
        idempotency_key: &str,
    ) -> RemoteOutcome {
        self.send(MutationOp::Delete, entity_type, payload, idempotency_key)
            .await
    }
}
