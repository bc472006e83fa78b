//! Workflow state machine
//!
//! One [`WorkflowStateMachine`] drives one request through the pipeline. It
//! is the single writer of that request's ledger entries and publishes every
//! status change on a watch channel so status queries never contend with the
//! running execution.
//!
//! Replay protocol: on start the machine reads the ledger. A terminal state
//! is published as-is. Otherwise every step with a recorded success is
//! skipped (its value feeds the next step) and execution resumes at the
//! first step without one, re-deriving the retry decision for a recorded
//! failure instead of re-running it blindly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::pipeline::{Pipeline, PipelineStep};
use super::state::result_envelope_for;
use super::{
    ExecutionRecord, ExecutionResult, ExecutionState, ExecutionStatus, RequestEnvelope,
    RequestIdentifier, ResultEnvelope, WorkflowSignal,
};
use crate::activity::{ActivityContext, ActivityError, ActivityOutcome, StepDescriptor};
use crate::persistence::{ExecutionLedger, LedgerError};
use crate::reliability::RetryDecision;

/// Faults that abort a run without reaching a terminal status
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("execution {0} is already running")]
    AlreadyRunning(RequestIdentifier),
}

/// Point-in-time view of an execution, as seen by queries
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub identifier: RequestIdentifier,

    /// Known once the ledger entry is created or read
    pub run_id: Option<Uuid>,

    pub status: ExecutionStatus,

    /// Present once terminal
    pub result: Option<ResultEnvelope>,

    /// Set when the run aborted on an engine fault
    pub fault: Option<String>,

    /// When the terminal status was published
    pub terminal_since: Option<Instant>,
}

impl StatusSnapshot {
    fn initial(identifier: RequestIdentifier) -> Self {
        Self {
            identifier,
            run_id: None,
            status: ExecutionStatus::Created,
            result: None,
            fault: None,
            terminal_since: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Terminal, or aborted by a fault; nothing more will be published
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || self.fault.is_some()
    }
}

enum StepResult {
    Succeeded(serde_json::Value),
    GaveUp(String),
}

/// Drives one request's execution
pub struct WorkflowStateMachine {
    identifier: RequestIdentifier,
    envelope: RequestEnvelope,
    pipeline: Arc<Pipeline>,
    ledger: Arc<dyn ExecutionLedger>,
    cancel_requested: AtomicBool,
    started: AtomicBool,
    status_tx: watch::Sender<StatusSnapshot>,
}

impl std::fmt::Debug for WorkflowStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowStateMachine")
            .field("identifier", &self.identifier)
            .field("snapshot", &*self.status_tx.borrow())
            .finish()
    }
}

impl WorkflowStateMachine {
    pub fn new(
        envelope: RequestEnvelope,
        pipeline: Arc<Pipeline>,
        ledger: Arc<dyn ExecutionLedger>,
    ) -> Self {
        let identifier = envelope.identifier.clone();
        let (status_tx, _) = watch::channel(StatusSnapshot::initial(identifier.clone()));

        Self {
            identifier,
            envelope,
            pipeline,
            ledger,
            cancel_requested: AtomicBool::new(false),
            started: AtomicBool::new(false),
            status_tx,
        }
    }

    pub fn identifier(&self) -> &RequestIdentifier {
        &self.identifier
    }

    /// Current status; never blocks on the running execution
    pub fn snapshot(&self) -> StatusSnapshot {
        self.status_tx.borrow().clone()
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    pub fn is_faulted(&self) -> bool {
        self.status_tx.borrow().fault.is_some()
    }

    /// Still running or yet to run
    pub fn is_live(&self) -> bool {
        !self.status_tx.borrow().is_settled()
    }

    /// Deliver a signal
    ///
    /// Returns `false` when the execution is already terminal (no-op).
    pub fn signal(&self, signal: WorkflowSignal) -> bool {
        if self.status_tx.borrow().is_terminal() {
            debug!(identifier = %self.identifier, "signal ignored, execution already terminal");
            return false;
        }

        match &signal {
            WorkflowSignal::Cancel { reason, .. } => {
                info!(
                    identifier = %self.identifier,
                    reason = reason.as_deref().unwrap_or("unspecified"),
                    "cancellation requested"
                );
                self.cancel_requested.store(true, Ordering::SeqCst);
            }
        }
        true
    }

    /// Request cancellation at the next step boundary
    pub fn cancel(&self) -> bool {
        self.signal(WorkflowSignal::cancel_unspecified())
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Wait until the execution is terminal or has faulted
    pub async fn wait_settled(&self) -> StatusSnapshot {
        let mut rx = self.status_tx.subscribe();
        let settled = match rx.wait_for(StatusSnapshot::is_settled).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        };
        settled
    }

    /// Run the execution to a terminal status
    ///
    /// May be called once per instance. A ledger fault aborts the run and is
    /// published on the snapshot; the ledger keeps the execution unfinished
    /// so a later instance can resume it.
    pub async fn run(&self) -> Result<ExecutionStatus, WorkflowError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(WorkflowError::AlreadyRunning(self.identifier.clone()));
        }

        let result = self.drive().await;
        if let Err(err) = &result {
            error!(identifier = %self.identifier, error = %err, "execution aborted");
            self.status_tx.send_modify(|s| s.fault = Some(err.to_string()));
        }
        result
    }

    async fn load_or_create(&self) -> Result<ExecutionState, WorkflowError> {
        if let Some(state) = self.ledger.read_state(&self.identifier).await? {
            info!(
                identifier = %self.identifier,
                run_id = %state.run_id,
                status = %state.status,
                records = state.ledger.len(),
                "resuming execution from ledger"
            );
            return Ok(state);
        }

        let run_id = Uuid::now_v7();
        match self
            .ledger
            .create_execution(&self.identifier, run_id, &self.envelope)
            .await
        {
            Ok(state) => {
                info!(identifier = %self.identifier, %run_id, "execution admitted");
                Ok(state)
            }
            Err(LedgerError::AlreadyExists(_)) => self
                .ledger
                .read_state(&self.identifier)
                .await?
                .ok_or_else(|| LedgerError::NotFound(self.identifier.clone()).into()),
            Err(err) => Err(err.into()),
        }
    }

    async fn drive(&self) -> Result<ExecutionStatus, WorkflowError> {
        let state = self.load_or_create().await?;
        let run_id = state.run_id;

        self.status_tx.send_modify(|s| {
            s.run_id = Some(run_id);
            s.status = state.status;
            s.result = state.result_envelope();
            if state.status.is_terminal() {
                s.terminal_since = Some(Instant::now());
            }
        });

        if state.status.is_terminal() {
            debug!(identifier = %self.identifier, status = %state.status, "execution already terminal");
            return Ok(state.status);
        }

        if state.cancel_requested {
            self.cancel_requested.store(true, Ordering::SeqCst);
        }

        if state.status == ExecutionStatus::Created {
            if self.is_cancel_requested() {
                return self.finish(run_id, ExecutionStatus::Cancelled, None).await;
            }
            self.transition(ExecutionStatus::Processing).await?;
        }

        let mut input = serde_json::to_value(&state.envelope)?;

        for (index, step) in self.pipeline.steps().iter().enumerate() {
            let step_index = index as u32;

            if let Some(value) = state.successful_value(step_index) {
                debug!(identifier = %self.identifier, step = %step.name, "reusing recorded step result");
                input = value.clone();
                continue;
            }

            if self.is_cancel_requested() {
                info!(identifier = %self.identifier, step = %step.name, "cancellation observed at step boundary");
                return self.finish(run_id, ExecutionStatus::Cancelled, None).await;
            }

            match self.run_step(&state, step_index, step, input).await? {
                StepResult::Succeeded(value) => input = value,
                StepResult::GaveUp(message) => {
                    let result = ExecutionResult::Failed {
                        step_index,
                        message,
                    };
                    return self
                        .finish(run_id, ExecutionStatus::Failed, Some(result))
                        .await;
                }
            }
        }

        self.finish(
            run_id,
            ExecutionStatus::Completed,
            Some(ExecutionResult::Completed { value: input }),
        )
        .await
    }

    async fn run_step(
        &self,
        state: &ExecutionState,
        step_index: u32,
        step: &PipelineStep,
        input: serde_json::Value,
    ) -> Result<StepResult, WorkflowError> {
        let options = self.pipeline.options_for(step);
        let policy = &options.retry_policy;
        let descriptor = StepDescriptor::new(step_index, step.name.clone());

        let mut attempt = 1;

        // A failure recorded before an interruption: replay its decision
        if let Some(last) = state.last_attempt(step_index) {
            if let Some(error) = last.outcome.error() {
                match policy.next_action(last.attempt, error) {
                    RetryDecision::GiveUp => {
                        return Ok(StepResult::GaveUp(give_up_message(step, last.attempt, error)));
                    }
                    RetryDecision::Retry { after } => {
                        let elapsed = (Utc::now() - last.timestamp)
                            .to_std()
                            .unwrap_or(Duration::ZERO);
                        let remaining = after.saturating_sub(elapsed);
                        info!(
                            identifier = %self.identifier,
                            step = %step.name,
                            attempt = last.attempt + 1,
                            delay_ms = remaining.as_millis() as u64,
                            "resuming retry of recorded failure"
                        );
                        tokio::time::sleep(remaining).await;
                    }
                }
                attempt = last.attempt + 1;
            }
        }

        loop {
            let ctx = ActivityContext::new(
                self.identifier.clone(),
                state.run_id,
                descriptor.clone(),
                attempt,
                policy.max_attempts,
            );

            info!(
                identifier = %self.identifier,
                run_id = %state.run_id,
                step = %step.name,
                attempt,
                "step started"
            );

            let outcome = step
                .executor
                .invoke(&ctx, input.clone(), options.start_to_close_timeout())
                .await;

            let record = ExecutionRecord::new(step_index, attempt, outcome.clone());
            if let Err(err) = self.ledger.append(&self.identifier, record).await {
                error!(
                    identifier = %self.identifier,
                    step = %step.name,
                    attempt,
                    error = %err,
                    "ledger append failed"
                );
                return Err(err.into());
            }

            let error = match outcome {
                ActivityOutcome::Success { value } => {
                    info!(identifier = %self.identifier, step = %step.name, attempt, "step succeeded");
                    return Ok(StepResult::Succeeded(value));
                }
                ActivityOutcome::Failure { error } => error,
            };

            warn!(
                identifier = %self.identifier,
                step = %step.name,
                attempt,
                kind = %error.kind,
                error = %error,
                "step failed"
            );

            match policy.next_action(attempt, &error) {
                RetryDecision::GiveUp => {
                    warn!(identifier = %self.identifier, step = %step.name, attempt, "giving up on step");
                    return Ok(StepResult::GaveUp(give_up_message(step, attempt, &error)));
                }
                RetryDecision::Retry { after } => {
                    info!(
                        identifier = %self.identifier,
                        step = %step.name,
                        next_attempt = attempt + 1,
                        delay_ms = after.as_millis() as u64,
                        "retry scheduled"
                    );
                    tokio::time::sleep(after).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn transition(&self, status: ExecutionStatus) -> Result<(), WorkflowError> {
        self.ledger
            .update_status(&self.identifier, status, None)
            .await?;
        self.status_tx.send_modify(|s| s.status = status);
        debug!(identifier = %self.identifier, %status, "status changed");
        Ok(())
    }

    async fn finish(
        &self,
        run_id: Uuid,
        status: ExecutionStatus,
        result: Option<ExecutionResult>,
    ) -> Result<ExecutionStatus, WorkflowError> {
        self.ledger
            .update_status(&self.identifier, status, result.clone())
            .await?;

        let envelope = result_envelope_for(&self.identifier, status, result.as_ref());
        self.status_tx.send_modify(|s| {
            s.status = status;
            s.result = envelope;
            s.terminal_since = Some(Instant::now());
        });

        info!(identifier = %self.identifier, %run_id, %status, "execution finished");
        Ok(status)
    }
}

fn give_up_message(step: &PipelineStep, attempts: u32, error: &ActivityError) -> String {
    format!(
        "step '{}' failed after {} attempt(s): {}",
        step.name, attempts, error
    )
}
