//! Request and result envelopes

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque key routing a request to its execution
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestIdentifier(String);

impl RequestIdentifier {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Blank identifiers are rejected at admission
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for RequestIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestIdentifier {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RequestIdentifier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for RequestIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Envelope validation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("request identifier is required")]
    MissingIdentifier,
}

/// Incoming request, immutable once admitted
///
/// Serialized as camelCase JSON. Deserialization also accepts the legacy
/// activation request shape:
///
/// ```json
/// {
///   "meta": { "requestId": "req-1" },
///   "yang": { ... },
///   "activationTransactionId": "tx-1",
///   "yang.error": "..."
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawRequestEnvelope")]
pub struct RequestEnvelope {
    pub identifier: RequestIdentifier,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,

    /// Set by the caller to pre-flag a malformed payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_error: Option<String>,
}

impl RequestEnvelope {
    pub fn new(identifier: impl Into<RequestIdentifier>) -> Self {
        Self {
            identifier: identifier.into(),
            feedback: None,
            payload: None,
            transaction_id: None,
            payload_error: None,
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn with_payload_error(mut self, error: impl Into<String>) -> Self {
        self.payload_error = Some(error.into());
        self
    }

    /// Check the envelope can be admitted
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.identifier.is_blank() {
            return Err(EnvelopeError::MissingIdentifier);
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRequestEnvelope {
    #[serde(default)]
    identifier: Option<String>,
    #[serde(default)]
    meta: Option<RawMeta>,
    #[serde(default)]
    feedback: Option<String>,
    #[serde(default, alias = "yang")]
    payload: Option<serde_json::Value>,
    #[serde(default, alias = "activationTransactionId")]
    transaction_id: Option<String>,
    #[serde(default, alias = "yang.error")]
    payload_error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMeta {
    #[serde(default)]
    request_id: Option<String>,
}

impl From<RawRequestEnvelope> for RequestEnvelope {
    fn from(raw: RawRequestEnvelope) -> Self {
        let identifier = raw
            .identifier
            .or_else(|| raw.meta.and_then(|m| m.request_id))
            .unwrap_or_default();

        Self {
            identifier: RequestIdentifier(identifier),
            feedback: raw.feedback,
            payload: raw.payload,
            transaction_id: raw.transaction_id,
            payload_error: raw.payload_error,
        }
    }
}

/// Outcome class of a [`ResultEnvelope`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultError {
    pub message: String,
}

/// Outward-facing response, derived from a terminal execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub status: ResultStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResultError>,
}

impl ResultEnvelope {
    pub fn success() -> Self {
        Self {
            status: ResultStatus::Success,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Error,
            error: Some(ResultError {
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}
