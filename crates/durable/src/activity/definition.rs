//! Activity executor trait and outcome types

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ActivityContext;
use crate::reliability::with_timeout;

/// Classification of an activity failure
///
/// The classification drives the retry decision: `Transient` and `Timeout`
/// are retried according to the step's policy, `Permanent` never is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Retryable failure (transport error, 5xx, throttling)
    Transient,

    /// Non-retryable failure (business-rule rejection, malformed input)
    Permanent,

    /// The invocation did not finish before its deadline
    Timeout,
}

impl FailureKind {
    /// Whether failures of this kind may be retried
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Permanent)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "TRANSIENT"),
            Self::Permanent => write!(f, "PERMANENT"),
            Self::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// Error type for activity failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityError {
    /// Error message
    pub message: String,

    /// Failure classification
    pub kind: FailureKind,

    /// Error type/code for programmatic handling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    /// Additional error details (for debugging)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ActivityError {
    fn with_kind(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            error_type: None,
            details: None,
        }
    }

    /// Create a retryable error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::with_kind(FailureKind::Transient, message)
    }

    /// Create a non-retryable error
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::with_kind(FailureKind::Permanent, message)
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_kind(FailureKind::Timeout, message)
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Whether this error may be retried
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActivityError {}

impl From<anyhow::Error> for ActivityError {
    fn from(err: anyhow::Error) -> Self {
        Self::transient(err.to_string())
    }
}

/// Result of a single activity invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityOutcome {
    /// The activity returned a value
    Success { value: serde_json::Value },

    /// The activity failed with a classified error
    Failure { error: ActivityError },
}

impl ActivityOutcome {
    pub fn success(value: serde_json::Value) -> Self {
        Self::Success { value }
    }

    pub fn failure(error: ActivityError) -> Self {
        Self::Failure { error }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The success value, if any
    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Success { value } => Some(value),
            Self::Failure { .. } => None,
        }
    }

    /// The failure, if any
    pub fn error(&self) -> Option<&ActivityError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error } => Some(error),
        }
    }
}

impl From<Result<serde_json::Value, ActivityError>> for ActivityOutcome {
    fn from(result: Result<serde_json::Value, ActivityError>) -> Self {
        match result {
            Ok(value) => Self::Success { value },
            Err(error) => Self::Failure { error },
        }
    }
}

/// Identifies one step of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescriptor {
    /// Zero-based position in the pipeline
    pub index: u32,

    /// Step name (used in logs and failure messages)
    pub name: String,
}

impl StepDescriptor {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for StepDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.name, self.index)
    }
}

/// A unit of work that performs external I/O on behalf of a pipeline step
///
/// Implementations are stateless across invocations: every call to
/// [`execute`](ActivityExecutor::execute) performs the external call exactly
/// once. Retries are driven by the caller, never internally.
///
/// # Example
///
/// ```ignore
/// use actflow_durable::prelude::*;
///
/// struct SendNotification;
///
/// #[async_trait]
/// impl ActivityExecutor for SendNotification {
///     fn activity_type(&self) -> &str {
///         "send_notification"
///     }
///
///     async fn execute(
///         &self,
///         ctx: &ActivityContext,
///         input: serde_json::Value,
///     ) -> Result<serde_json::Value, ActivityError> {
///         // Call the notification service...
///         Ok(json!({ "notified": ctx.identifier }))
///     }
/// }
/// ```
#[async_trait]
pub trait ActivityExecutor: Send + Sync + 'static {
    /// Type identifier for this activity (used in logs)
    fn activity_type(&self) -> &str;

    /// Perform the external call
    ///
    /// Return `ActivityError::transient()` for failures that should be retried
    /// and `ActivityError::permanent()` for business-rule rejections.
    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ActivityError>;

    /// Perform the external call under a deadline
    ///
    /// Past the deadline the in-flight call is dropped and the outcome is a
    /// `Timeout` failure, so the caller never blocks indefinitely.
    async fn invoke(
        &self,
        ctx: &ActivityContext,
        input: serde_json::Value,
        timeout: Duration,
    ) -> ActivityOutcome {
        match with_timeout(timeout, self.execute(ctx, input)).await {
            Ok(result) => ActivityOutcome::from(result),
            Err(err) => ActivityOutcome::failure(
                ActivityError::timeout(format!(
                    "activity {} for step {}: {}",
                    self.activity_type(),
                    ctx.step,
                    err
                ))
                .with_type("START_TO_CLOSE_TIMEOUT"),
            ),
        }
    }
}
