//! HTTP collaborator activity
//!
//! Calls an external collaborator service with the step input as a JSON body
//! and classifies the response:
//!
//! | Response                                   | Outcome     |
//! |--------------------------------------------|-------------|
//! | transport error (connect, reset, ...)      | `Transient` |
//! | 5xx, 408, 429                              | `Transient` |
//! | other 4xx                                  | `Permanent` |
//! | 2xx with `{"status": "ERROR", ...}`        | `Permanent` |
//! | 2xx otherwise                              | `Success`   |

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::{ActivityContext, ActivityError, ActivityExecutor};

/// Header carrying the request identifier to the collaborator
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Header carrying the per-step idempotency key
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Activity executor that POSTs to a collaborator endpoint
#[derive(Debug, Clone)]
pub struct HttpActivityExecutor {
    activity_type: String,
    endpoint: String,
    bearer_token: Option<String>,
    client: Client,
}

impl HttpActivityExecutor {
    /// Create an executor for the given endpoint with a default client
    pub fn new(activity_type: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::with_client(activity_type, endpoint, Client::new())
    }

    /// Create an executor sharing an existing client (connection pool)
    pub fn with_client(
        activity_type: impl Into<String>,
        endpoint: impl Into<String>,
        client: Client,
    ) -> Self {
        Self {
            activity_type: activity_type.into(),
            endpoint: endpoint.into(),
            bearer_token: None,
            client,
        }
    }

    /// Authenticate calls with a bearer token
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn classify_status(status: StatusCode, body: &str) -> ActivityError {
    let message = format!("collaborator returned {}: {}", status, truncate(body, 256));
    let error = if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        ActivityError::transient(message)
    } else {
        ActivityError::permanent(message)
    };
    error.with_type(format!("HTTP_{}", status.as_u16()))
}

/// Business-level rejection carried in a 2xx body (`{"status": "ERROR", "error": {"message": ...}}`)
fn business_error(body: &serde_json::Value) -> Option<ActivityError> {
    if body.get("status").and_then(|s| s.as_str()) != Some("ERROR") {
        return None;
    }

    let message = body
        .pointer("/error/message")
        .and_then(|m| m.as_str())
        .unwrap_or("collaborator rejected the request");

    Some(
        ActivityError::permanent(message)
            .with_type("COLLABORATOR_ERROR")
            .with_details(body.clone()),
    )
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl ActivityExecutor for HttpActivityExecutor {
    fn activity_type(&self) -> &str {
        &self.activity_type
    }

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ActivityError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(REQUEST_ID_HEADER, ctx.identifier.as_str())
            .header(IDEMPOTENCY_KEY_HEADER, ctx.idempotency_key())
            .json(&input);

        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        debug!(
            identifier = %ctx.identifier,
            endpoint = %self.endpoint,
            attempt = ctx.attempt,
            "calling collaborator"
        );

        let response = request.send().await.map_err(|e| {
            warn!(identifier = %ctx.identifier, error = %e, "collaborator transport error");
            ActivityError::transient(format!("transport error: {}", e)).with_type("TRANSPORT")
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ActivityError::transient(format!("failed to read response body: {}", e))
                .with_type("TRANSPORT")
        })?;

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }

        let value: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            ActivityError::permanent(format!("collaborator returned invalid JSON: {}", e))
                .with_type("INVALID_RESPONSE")
        })?;

        match business_error(&value) {
            Some(error) => Err(error),
            None => Ok(value),
        }
    }
}
