//! ExecutionLedger trait definition

use async_trait::async_trait;
use uuid::Uuid;

use crate::workflow::{
    ExecutionRecord, ExecutionResult, ExecutionState, ExecutionStatus, RequestEnvelope,
    RequestIdentifier,
};

/// Error type for ledger operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    /// No execution for this identifier
    #[error("execution not found: {0}")]
    NotFound(RequestIdentifier),

    /// An execution already exists for this identifier
    #[error("execution already exists: {0}")]
    AlreadyExists(RequestIdentifier),

    /// A record for this (step, attempt) was already appended
    #[error("duplicate record for {identifier} step {step_index} attempt {attempt}")]
    Duplicate {
        identifier: RequestIdentifier,
        step_index: u32,
        attempt: u32,
    },

    /// The record would break (step_index, attempt) ordering
    #[error("out-of-order record for {identifier}: ({step_index}, {attempt}) after ({last_step}, {last_attempt})")]
    OutOfOrder {
        identifier: RequestIdentifier,
        step_index: u32,
        attempt: u32,
        last_step: u32,
        last_attempt: u32,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The ledger cannot currently accept writes
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Durable record of every execution and its attempted steps
///
/// The ledger is the source of truth used to resume after interruption.
/// Appending a record is the durability boundary: the state machine never
/// advances past a step before its record is stored.
///
/// Implementations must be thread-safe. Records for one identifier are only
/// ever appended by its single active state machine.
#[async_trait]
pub trait ExecutionLedger: Send + Sync + 'static {
    /// Create an execution in CREATED status
    async fn create_execution(
        &self,
        identifier: &RequestIdentifier,
        run_id: Uuid,
        envelope: &RequestEnvelope,
    ) -> Result<ExecutionState, LedgerError>;

    /// Append one step attempt
    ///
    /// Records must arrive in strictly increasing `(step_index, attempt)`
    /// order; a repeated pair fails with [`LedgerError::Duplicate`].
    async fn append(
        &self,
        identifier: &RequestIdentifier,
        record: ExecutionRecord,
    ) -> Result<(), LedgerError>;

    /// All records for an execution, in replay order
    async fn read(&self, identifier: &RequestIdentifier)
        -> Result<Vec<ExecutionRecord>, LedgerError>;

    /// Full execution state, or `None` when the identifier is unknown
    async fn read_state(
        &self,
        identifier: &RequestIdentifier,
    ) -> Result<Option<ExecutionState>, LedgerError>;

    /// Record a status transition (and the result once terminal)
    async fn update_status(
        &self,
        identifier: &RequestIdentifier,
        status: ExecutionStatus,
        result: Option<ExecutionResult>,
    ) -> Result<(), LedgerError>;

    /// Persist a cancellation request
    ///
    /// Returns `false` when the execution is already terminal.
    async fn request_cancel(&self, identifier: &RequestIdentifier) -> Result<bool, LedgerError>;

    /// Identifiers of executions not yet terminal, oldest first
    async fn list_unfinished(&self) -> Result<Vec<RequestIdentifier>, LedgerError>;
}

/// Check that `record` may follow `last` in one execution's ledger
pub(crate) fn check_order(
    identifier: &RequestIdentifier,
    last: Option<(u32, u32)>,
    record: &ExecutionRecord,
) -> Result<(), LedgerError> {
    let Some((last_step, last_attempt)) = last else {
        return Ok(());
    };

    let key = record.order_key();
    if key == (last_step, last_attempt) {
        return Err(LedgerError::Duplicate {
            identifier: identifier.clone(),
            step_index: record.step_index,
            attempt: record.attempt,
        });
    }

    if key < (last_step, last_attempt) {
        return Err(LedgerError::OutOfOrder {
            identifier: identifier.clone(),
            step_index: record.step_index,
            attempt: record.attempt,
            last_step,
            last_attempt,
        });
    }

    Ok(())
}
