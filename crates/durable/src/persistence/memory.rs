//! In-memory implementation of ExecutionLedger for testing

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;
use crate::workflow::{
    ExecutionRecord, ExecutionResult, ExecutionState, ExecutionStatus, RequestEnvelope,
    RequestIdentifier,
};

/// In-memory implementation of ExecutionLedger
///
/// Stores all data in memory with the same ordering and duplicate checks as
/// the PostgreSQL implementation. Appends can be made to fail on demand to
/// exercise ledger-outage handling.
///
/// # Example
///
/// ```
/// use actflow_durable::InMemoryExecutionLedger;
///
/// let ledger = InMemoryExecutionLedger::new();
/// ledger.fail_appends(1); // next append returns LedgerError::Unavailable
/// ```
#[derive(Default)]
pub struct InMemoryExecutionLedger {
    executions: RwLock<HashMap<RequestIdentifier, ExecutionState>>,
    failing_appends: AtomicUsize,
}

impl InMemoryExecutionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` appends fail with [`LedgerError::Unavailable`]
    pub fn fail_appends(&self, count: usize) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    /// Number of stored executions
    pub fn execution_count(&self) -> usize {
        self.executions.read().len()
    }

    /// Clear all data
    pub fn clear(&self) {
        self.executions.write().clear();
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ExecutionLedger for InMemoryExecutionLedger {
    async fn create_execution(
        &self,
        identifier: &RequestIdentifier,
        run_id: Uuid,
        envelope: &RequestEnvelope,
    ) -> Result<ExecutionState, LedgerError> {
        let mut executions = self.executions.write();
        if executions.contains_key(identifier) {
            return Err(LedgerError::AlreadyExists(identifier.clone()));
        }

        let state = ExecutionState::new(identifier.clone(), run_id, envelope.clone());
        executions.insert(identifier.clone(), state.clone());
        Ok(state)
    }

    async fn append(
        &self,
        identifier: &RequestIdentifier,
        record: ExecutionRecord,
    ) -> Result<(), LedgerError> {
        if self.take_injected_failure() {
            return Err(LedgerError::Unavailable("injected append failure".into()));
        }

        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(identifier)
            .ok_or_else(|| LedgerError::NotFound(identifier.clone()))?;

        check_order(
            identifier,
            execution.ledger.last().map(ExecutionRecord::order_key),
            &record,
        )?;

        execution.ledger.push(record);
        execution.updated_at = Utc::now();
        Ok(())
    }

    async fn read(
        &self,
        identifier: &RequestIdentifier,
    ) -> Result<Vec<ExecutionRecord>, LedgerError> {
        self.executions
            .read()
            .get(identifier)
            .map(|e| e.ledger.clone())
            .ok_or_else(|| LedgerError::NotFound(identifier.clone()))
    }

    async fn read_state(
        &self,
        identifier: &RequestIdentifier,
    ) -> Result<Option<ExecutionState>, LedgerError> {
        Ok(self.executions.read().get(identifier).cloned())
    }

    async fn update_status(
        &self,
        identifier: &RequestIdentifier,
        status: ExecutionStatus,
        result: Option<ExecutionResult>,
    ) -> Result<(), LedgerError> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(identifier)
            .ok_or_else(|| LedgerError::NotFound(identifier.clone()))?;

        execution.status = status;
        execution.result = result;
        if status.is_terminal() {
            execution.cancel_requested = false;
        }
        execution.updated_at = Utc::now();
        Ok(())
    }

    async fn request_cancel(&self, identifier: &RequestIdentifier) -> Result<bool, LedgerError> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(identifier)
            .ok_or_else(|| LedgerError::NotFound(identifier.clone()))?;

        if execution.status.is_terminal() {
            return Ok(false);
        }

        execution.cancel_requested = true;
        execution.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_unfinished(&self) -> Result<Vec<RequestIdentifier>, LedgerError> {
        let executions = self.executions.read();
        let mut unfinished: Vec<_> = executions
            .values()
            .filter(|e| !e.status.is_terminal())
            .map(|e| (e.created_at, e.run_id, e.identifier.clone()))
            .collect();
        unfinished.sort();
        Ok(unfinished.into_iter().map(|(_, _, id)| id).collect())
    }
}
