//! Activity execution context

use uuid::Uuid;

use super::StepDescriptor;
use crate::workflow::RequestIdentifier;

/// Context provided to activities during execution
///
/// The context identifies the request, the step and the attempt being
/// executed. The idempotency key is `identifier` + `step` and stays the same
/// across attempts, since the engine may re-invoke a step whose outcome was
/// never durably recorded or whose call timed out after taking effect.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    /// Unique execution attempt ID
    pub attempt_id: Uuid,

    /// Request this activity runs for
    pub identifier: RequestIdentifier,

    /// Run of the execution (stable across replays)
    pub run_id: Uuid,

    /// Pipeline step being executed
    pub step: StepDescriptor,

    /// Current attempt number (1-based)
    pub attempt: u32,

    /// Maximum attempts allowed
    pub max_attempts: u32,
}

impl ActivityContext {
    /// Create a new activity context
    pub fn new(
        identifier: RequestIdentifier,
        run_id: Uuid,
        step: StepDescriptor,
        attempt: u32,
        max_attempts: u32,
    ) -> Self {
        Self {
            attempt_id: Uuid::now_v7(),
            identifier,
            run_id,
            step,
            attempt,
            max_attempts,
        }
    }

    /// Idempotency key for the external call; shared by every attempt of a step
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.identifier, self.step.index)
    }

    /// Check if this is the last retry attempt
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
