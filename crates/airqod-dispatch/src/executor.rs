//! HTTP delivery executor.
//!
//! Posts a record's payload to one destination server and classifies the
//! result into a per-destination outcome. The executor never returns a
//! transport error to the caller: every delivery attempt ends in a
//! `DestinationOutcome`, success or failure, so consumers can aggregate
//! fan-out results uniformly.

use std::time::Duration;

use airqod_core::{AuthMethod, DestinationOutcome, FailureKind, RecordId, ServerProfile};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    error::{DispatchError, Result},
    resolver::DestinationResolver,
};

/// Configuration for the delivery executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Per-request deadline.
    pub timeout: Duration,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "airqod-integrator/1.0".to_string(),
            verify_tls: true,
        }
    }
}

/// One delivery request against one destination.
#[derive(Debug, Clone)]
pub struct DeliveryTask<'a> {
    /// Record the payload belongs to.
    pub record_id: RecordId,
    /// Suffix appended to the destination's base URL.
    pub url_suffix: &'a str,
    /// Payload MIME type.
    pub content_type: &'a str,
    /// Serialized payload.
    pub body: &'a str,
    /// Attempt number, for logging.
    pub attempt: u32,
}

/// HTTP client for posting record payloads to destination servers.
#[derive(Debug, Clone)]
pub struct DeliveryExecutor {
    client: reqwest::Client,
    config: ExecutorConfig,
}

impl DeliveryExecutor {
    /// Creates an executor with the given configuration.
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DispatchError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates an executor with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ExecutorConfig::default())
    }

    /// Delivers a payload to one destination and classifies the result.
    pub async fn deliver(
        &self,
        profile: &ServerProfile,
        task: DeliveryTask<'_>,
    ) -> DestinationOutcome {
        let url = DestinationResolver::endpoint_url(profile, task.url_suffix);
        let span = info_span!(
            "delivery",
            record_id = %task.record_id,
            destination = %profile.name,
            url = %url,
            attempt = task.attempt
        );

        async move {
            debug!("posting record payload");

            let mut request = self
                .client
                .post(&url)
                .header("content-type", task.content_type)
                .header("accept", "application/json")
                .body(task.body.to_owned());
            request = apply_auth(request, &profile.auth);

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "request failed");
                    return if e.is_timeout() {
                        DestinationOutcome::failed(
                            FailureKind::Timeout,
                            format!("timed out after {:?}", self.config.timeout),
                        )
                    } else if e.is_connect() {
                        DestinationOutcome::failed(
                            FailureKind::Network,
                            format!("connection failed: {e}"),
                        )
                    } else {
                        DestinationOutcome::failed(FailureKind::Network, e.to_string())
                    };
                }
            };

            let status = response.status().as_u16();
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "failed to read response body");
                    String::new()
                }
            };

            match status {
                200..=299 => {
                    debug!(status, "destination accepted the payload");
                    DestinationOutcome::ok(status, extract_submission_id(&body))
                }
                400..=499 => {
                    warn!(status, "destination rejected the payload");
                    DestinationOutcome::failed_with_status(
                        FailureKind::Rejected,
                        status,
                        truncate(&body),
                    )
                }
                _ => {
                    warn!(status, "destination reported a server error");
                    DestinationOutcome::failed_with_status(
                        FailureKind::ServerError,
                        status,
                        truncate(&body),
                    )
                }
            }
        }
        .instrument(span)
        .await
    }
}

fn apply_auth(request: reqwest::RequestBuilder, auth: &AuthMethod) -> reqwest::RequestBuilder {
    match auth {
        AuthMethod::Basic { username, password } => {
            request.basic_auth(username, Some(password))
        }
        AuthMethod::Token { token } => {
            // DHIS2 personal access tokens use the "Token" auth scheme.
            request.header("authorization", format!("Token {token}"))
        }
        AuthMethod::None => request,
    }
}

/// Pulls the remote submission identifier out of a successful response.
///
/// Import endpoints answer either `{"response": {"id": ...}}` or a
/// top-level `{"id": ...}`; anything else leaves the id unset.
fn extract_submission_id(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("response")
        .and_then(|r| r.get("id"))
        .or_else(|| value.get("id"))
        .and_then(|id| match id {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Caps stored error detail at 1KB.
fn truncate(body: &str) -> String {
    const MAX_DETAIL: usize = 1024;
    if body.len() > MAX_DETAIL {
        let mut end = MAX_DETAIL;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}
