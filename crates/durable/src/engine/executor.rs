//! Workflow engine facade
//!
//! The `WorkflowEngine` is responsible for:
//! - Admitting requests and starting their state machines
//! - Routing cancellation signals and status queries by identifier
//! - Recovering unfinished executions from the ledger after a restart
//! - Evicting finished executions from the registry

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::registry::ExecutionRegistry;
use crate::config::EngineConfig;
use crate::persistence::{ExecutionLedger, LedgerError};
use crate::workflow::{
    EnvelopeError, ExecutionStatus, Pipeline, RequestEnvelope, RequestIdentifier, ResultEnvelope,
    StatusSnapshot, WorkflowError, WorkflowSignal, WorkflowStateMachine,
};

/// Caller-facing error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationError,
    NotFound,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ValidationError => write!(f, "VALIDATION_ERROR"),
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// Errors from engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The request envelope was rejected before admission
    #[error("validation error: {0}")]
    Validation(#[from] EnvelopeError),

    /// No execution exists for the identifier
    #[error("execution not found: {0}")]
    NotFound(RequestIdentifier),

    /// Ledger error
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A run aborted on an engine fault
    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Unexpected engine fault
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Ledger(_) | Self::Workflow(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Answer to a status query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub identifier: RequestIdentifier,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,

    pub status: ExecutionStatus,

    /// Present once terminal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultEnvelope>,
}

impl StatusReport {
    fn from_snapshot(snapshot: StatusSnapshot) -> Self {
        Self {
            identifier: snapshot.identifier,
            run_id: snapshot.run_id,
            status: snapshot.status,
            result: snapshot.result,
        }
    }
}

/// Durable workflow engine
///
/// # Example
///
/// ```ignore
/// use actflow_durable::prelude::*;
///
/// let pipeline = Pipeline::new().then("process_request", Arc::new(ProcessRequestActivity::new()));
/// let engine = WorkflowEngine::new(
///     Arc::new(InMemoryExecutionLedger::new()),
///     pipeline,
///     EngineConfig::default(),
/// );
///
/// let result = engine.submit_and_wait(RequestEnvelope::new("req-1")).await?;
/// assert!(result.is_success());
/// ```
pub struct WorkflowEngine {
    ledger: Arc<dyn ExecutionLedger>,
    registry: Arc<ExecutionRegistry>,
    config: EngineConfig,
}

impl WorkflowEngine {
    /// Create an engine
    ///
    /// Steps without their own options use the retry and timeout settings
    /// from `config`.
    pub fn new(ledger: Arc<dyn ExecutionLedger>, pipeline: Pipeline, config: EngineConfig) -> Self {
        let pipeline = Arc::new(pipeline.with_default_options(config.step_options()));
        let registry = Arc::new(ExecutionRegistry::new(
            pipeline,
            ledger.clone(),
            config.registry_config(),
        ));

        Self {
            ledger,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.registry
    }

    /// Get a reference to the ledger
    pub fn ledger(&self) -> &Arc<dyn ExecutionLedger> {
        &self.ledger
    }

    fn admit(&self, envelope: &RequestEnvelope) -> Arc<WorkflowStateMachine> {
        let (machine, created) = self.registry.get_or_create(envelope);
        if created {
            let runner = machine.clone();
            tokio::spawn(async move {
                // Faults are logged and published by the machine itself
                let _ = runner.run().await;
            });
        } else {
            debug!(identifier = %envelope.identifier, "execution already registered");
        }
        machine
    }

    /// Start an execution without waiting for it
    ///
    /// Re-submitting a known identifier returns the existing execution and
    /// ignores the new envelope.
    #[instrument(skip(self, envelope), fields(identifier = %envelope.identifier))]
    pub async fn submit(&self, envelope: RequestEnvelope) -> Result<RequestIdentifier, EngineError> {
        envelope.validate()?;
        self.admit(&envelope);
        Ok(envelope.identifier)
    }

    /// Start an execution and wait for its result
    #[instrument(skip(self, envelope), fields(identifier = %envelope.identifier))]
    pub async fn submit_and_wait(
        &self,
        envelope: RequestEnvelope,
    ) -> Result<ResultEnvelope, EngineError> {
        envelope.validate()?;
        let machine = self.admit(&envelope);
        let snapshot = machine.wait_settled().await;

        if let Some(fault) = snapshot.fault {
            return Err(EngineError::Internal(fault));
        }

        snapshot.result.ok_or_else(|| {
            EngineError::Internal(format!(
                "execution {} settled without a result",
                envelope.identifier
            ))
        })
    }

    /// Request cancellation
    ///
    /// Honored at the next step boundary; persisted so it survives a
    /// restart. Returns `false` when the execution is already terminal.
    #[instrument(skip(self))]
    pub async fn cancel(&self, identifier: &RequestIdentifier) -> Result<bool, EngineError> {
        if let Some(machine) = self.registry.find(identifier) {
            // Not yet loaded: the ledger may already hold a terminal status
            if machine.snapshot().run_id.is_none() {
                if let Some(state) = self.ledger.read_state(identifier).await? {
                    if state.status.is_terminal() {
                        debug!(%identifier, status = %state.status, "cancel ignored, execution already terminal");
                        return Ok(false);
                    }
                }
            }

            if !machine.signal(WorkflowSignal::cancel_unspecified()) {
                return Ok(false);
            }

            // The live flag is authoritative; the ledger row may not exist yet
            return match self.ledger.request_cancel(identifier).await {
                Ok(recorded) => Ok(recorded),
                Err(LedgerError::NotFound(_)) => Ok(true),
                Err(err) => {
                    warn!(%identifier, error = %err, "failed to persist cancellation");
                    Ok(true)
                }
            };
        }

        match self.ledger.request_cancel(identifier).await {
            Ok(recorded) => {
                if recorded {
                    info!(%identifier, "cancellation recorded for inactive execution");
                }
                Ok(recorded)
            }
            Err(LedgerError::NotFound(_)) => Err(EngineError::NotFound(identifier.clone())),
            Err(err) => Err(err.into()),
        }
    }

    /// Current status of an execution
    ///
    /// Served from the live instance once it has loaded its ledger entry,
    /// else from the ledger.
    pub async fn status(&self, identifier: &RequestIdentifier) -> Result<StatusReport, EngineError> {
        let snapshot = self.registry.find(identifier).map(|m| m.snapshot());

        if let Some(snapshot) = &snapshot {
            if snapshot.run_id.is_some() {
                return Ok(StatusReport::from_snapshot(snapshot.clone()));
            }
        }

        match self.ledger.read_state(identifier).await? {
            Some(state) => Ok(StatusReport {
                result: state.result_envelope(),
                identifier: state.identifier,
                run_id: Some(state.run_id),
                status: state.status,
            }),
            // Admitted but its ledger entry is not written yet
            None => snapshot
                .map(StatusReport::from_snapshot)
                .ok_or_else(|| EngineError::NotFound(identifier.clone())),
        }
    }

    /// Drop a settled execution from the registry
    ///
    /// The ledger keeps it, so status queries still answer.
    pub fn evict(&self, identifier: &RequestIdentifier) -> bool {
        self.registry.evict(identifier)
    }

    /// Resume every unfinished execution in the ledger
    ///
    /// Returns the number of executions started.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let unfinished = self.ledger.list_unfinished().await?;
        let mut resumed = 0;

        for identifier in unfinished {
            if let Some(machine) = self.registry.find(&identifier) {
                if !machine.is_faulted() {
                    continue;
                }
            }

            let Some(state) = self.ledger.read_state(&identifier).await? else {
                continue;
            };

            let (machine, created) = self.registry.get_or_create(&state.envelope);
            if created {
                info!(%identifier, run_id = %state.run_id, status = %state.status, "recovering execution");
                let runner = machine.clone();
                tokio::spawn(async move {
                    let _ = runner.run().await;
                });
                resumed += 1;
            }
        }

        info!(resumed, "recovery complete");
        Ok(resumed)
    }

    /// Periodically evict expired terminal executions
    pub fn spawn_retention_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = registry.sweep();
                if evicted > 0 {
                    debug!(evicted, "retention sweep");
                }
            }
        })
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}
