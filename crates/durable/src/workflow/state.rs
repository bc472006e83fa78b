//! Execution state and ledger records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{RequestEnvelope, RequestIdentifier, ResultEnvelope};
use crate::activity::ActivityOutcome;

/// Lifecycle status of an execution
///
/// ```text
/// CREATED ──▶ PROCESSING ──┬──▶ COMPLETED
///    │                     ├──▶ FAILED
///    └─────────────────────┴──▶ CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Created,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(format!("unknown execution status: {}", s)),
        }
    }
}

/// One attempted step, appended to the ledger before the pipeline advances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub step_index: u32,

    /// 1-based attempt number
    pub attempt: u32,

    pub outcome: ActivityOutcome,

    pub timestamp: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn new(step_index: u32, attempt: u32, outcome: ActivityOutcome) -> Self {
        Self {
            step_index,
            attempt,
            outcome,
            timestamp: Utc::now(),
        }
    }

    /// Replay order: step index, then attempt
    pub fn order_key(&self) -> (u32, u32) {
        (self.step_index, self.attempt)
    }
}

/// Final result of a COMPLETED or FAILED execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionResult {
    Completed { value: serde_json::Value },
    Failed { step_index: u32, message: String },
}

impl ExecutionResult {
    pub fn to_envelope(&self) -> ResultEnvelope {
        match self {
            Self::Completed { .. } => ResultEnvelope::success(),
            Self::Failed { message, .. } => ResultEnvelope::error(message.clone()),
        }
    }
}

/// Logical state of one request's execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub identifier: RequestIdentifier,

    /// Time-ordered run ID, stable across replays
    pub run_id: Uuid,

    pub envelope: RequestEnvelope,

    pub status: ExecutionStatus,

    /// Set only when COMPLETED or FAILED
    pub result: Option<ExecutionResult>,

    /// Ordered by (step_index, attempt)
    pub ledger: Vec<ExecutionRecord>,

    /// A cancellation was requested and not yet observed
    pub cancel_requested: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionState {
    pub fn new(identifier: RequestIdentifier, run_id: Uuid, envelope: RequestEnvelope) -> Self {
        let now = Utc::now();
        Self {
            identifier,
            run_id,
            envelope,
            status: ExecutionStatus::Created,
            result: None,
            ledger: Vec::new(),
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Derived outward response; `None` until terminal
    pub fn result_envelope(&self) -> Option<ResultEnvelope> {
        result_envelope_for(&self.identifier, self.status, self.result.as_ref())
    }

    /// Recorded success value of a step, if any
    pub fn successful_value(&self, step_index: u32) -> Option<&serde_json::Value> {
        self.ledger
            .iter()
            .filter(|r| r.step_index == step_index)
            .find_map(|r| r.outcome.value())
    }

    /// Latest recorded attempt of a step
    pub fn last_attempt(&self, step_index: u32) -> Option<&ExecutionRecord> {
        self.ledger
            .iter()
            .filter(|r| r.step_index == step_index)
            .max_by_key(|r| r.attempt)
    }
}

/// Derive the [`ResultEnvelope`] for a terminal status
pub(crate) fn result_envelope_for(
    identifier: &RequestIdentifier,
    status: ExecutionStatus,
    result: Option<&ExecutionResult>,
) -> Option<ResultEnvelope> {
    match status {
        ExecutionStatus::Cancelled => Some(ResultEnvelope::error(format!(
            "request {} was cancelled",
            identifier
        ))),
        ExecutionStatus::Completed | ExecutionStatus::Failed => Some(
            result
                .map(ExecutionResult::to_envelope)
                .unwrap_or_else(|| ResultEnvelope::error(format!("request {} has no result", identifier))),
        ),
        ExecutionStatus::Created | ExecutionStatus::Processing => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityError;
    use crate::workflow::ResultStatus;

    fn state() -> ExecutionState {
        ExecutionState::new(
            RequestIdentifier::from("req-1"),
            Uuid::now_v7(),
            RequestEnvelope::new("req-1"),
        )
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ExecutionStatus::Created.is_terminal());
        assert!(!ExecutionStatus::Processing.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_string_conversion() {
        for status in [
            ExecutionStatus::Created,
            ExecutionStatus::Processing,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>(), Ok(status));
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::json!(status.as_str())
            );
        }
        assert!("RUNNING".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn test_result_envelope_only_when_terminal() {
        let mut state = state();
        assert!(state.result_envelope().is_none());

        state.status = ExecutionStatus::Completed;
        state.result = Some(ExecutionResult::Completed {
            value: serde_json::json!({}),
        });
        assert_eq!(state.result_envelope(), Some(ResultEnvelope::success()));
    }

    #[test]
    fn test_failed_result_envelope_carries_message() {
        let mut state = state();
        state.status = ExecutionStatus::Failed;
        state.result = Some(ExecutionResult::Failed {
            step_index: 0,
            message: "step 'notify' failed".into(),
        });

        let envelope = state.result_envelope().unwrap();
        assert_eq!(envelope.status, ResultStatus::Error);
        assert_eq!(envelope.error_message(), Some("step 'notify' failed"));
    }

    #[test]
    fn test_cancelled_result_envelope() {
        let mut state = state();
        state.status = ExecutionStatus::Cancelled;

        assert_eq!(
            state.result_envelope(),
            Some(ResultEnvelope::error("request req-1 was cancelled"))
        );
    }

    #[test]
    fn test_successful_value_and_last_attempt() {
        let mut state = state();
        state.ledger.push(ExecutionRecord::new(
            0,
            1,
            ActivityOutcome::failure(ActivityError::transient("flaky")),
        ));
        state.ledger.push(ExecutionRecord::new(
            0,
            2,
            ActivityOutcome::success(serde_json::json!("ok")),
        ));
        state.ledger.push(ExecutionRecord::new(
            1,
            1,
            ActivityOutcome::failure(ActivityError::transient("flaky")),
        ));

        assert_eq!(state.successful_value(0), Some(&serde_json::json!("ok")));
        assert_eq!(state.successful_value(1), None);
        assert_eq!(state.last_attempt(1).map(|r| r.attempt), Some(1));
        assert_eq!(state.last_attempt(0).map(|r| r.attempt), Some(2));
        assert!(state.last_attempt(2).is_none());
    }
}
