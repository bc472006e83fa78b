//! Signals delivered to running executions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External signal routed to an execution by identifier
///
/// Signals are advisory: they are recorded immediately and honored by the
/// state machine at the next step boundary.
///
/// # Example
///
/// ```ignore
/// let signal = WorkflowSignal::cancel("operator aborted activation");
/// handle.signal(signal);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowSignal {
    /// Stop at the next step boundary
    Cancel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,

        sent_at: DateTime<Utc>,
    },
}

impl WorkflowSignal {
    /// Create a cancellation signal
    pub fn cancel(reason: impl Into<String>) -> Self {
        Self::Cancel {
            reason: Some(reason.into()),
            sent_at: Utc::now(),
        }
    }

    /// Create a cancellation signal without a reason
    pub fn cancel_unspecified() -> Self {
        Self::Cancel {
            reason: None,
            sent_at: Utc::now(),
        }
    }

    /// Check if this is a cancellation signal
    pub fn is_cancel(&self) -> bool {
        matches!(self, Self::Cancel { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Cancel { reason, .. } => reason.as_deref(),
        }
    }
}
