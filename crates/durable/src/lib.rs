//! # Durable Request Engine
//!
//! Drives identified requests through a fixed pipeline of activities,
//! recording every step attempt in an append-only ledger so a restarted
//! process resumes where it stopped instead of repeating work.
//!
//! ## Features
//!
//! - **Replay**: steps with a recorded success are never invoked again
//! - **Retries**: capped exponential backoff, decided from the error kind
//! - **Timeouts**: every activity invocation is bounded
//! - **Cancellation**: cooperative, checked at step boundaries
//! - **Status**: queries never block on a running execution
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowEngine                          │
//! │  (submit, cancel, status, recover; validates envelopes)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ExecutionRegistry                         │
//! │  (one WorkflowStateMachine per request identifier)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ExecutionLedger                           │
//! │  (in-memory or PostgreSQL: executions, step records)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use actflow_durable::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), EngineError> {
//! let pipeline = Pipeline::new().then(
//!     "process_request",
//!     Arc::new(FnActivityExecutor::new("process_request", |_ctx, _input| async move {
//!         Ok(json!({ "status": "SUCCESS" }))
//!     })),
//! );
//!
//! let engine = WorkflowEngine::new(
//!     Arc::new(InMemoryExecutionLedger::new()),
//!     pipeline,
//!     EngineConfig::default(),
//! );
//!
//! let result = engine.submit_and_wait(RequestEnvelope::new("req-1")).await?;
//! assert!(result.is_success());
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod config;
pub mod engine;
pub mod persistence;
pub mod reliability;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::activity::{
        ActivityContext, ActivityError, ActivityExecutor, ActivityOutcome, FailureKind,
        FnActivityExecutor, HttpActivityExecutor, ProcessRequestActivity, PROCESS_REQUEST,
    };
    pub use crate::config::{ConfigError, EngineConfig};
    pub use crate::engine::{EngineError, ErrorKind, StatusReport, WorkflowEngine};
    pub use crate::persistence::{
        ExecutionLedger, InMemoryExecutionLedger, LedgerError, PostgresExecutionLedger,
    };
    pub use crate::reliability::{RetryPolicy, TimeoutConfig};
    pub use crate::workflow::{
        ExecutionStatus, Pipeline, PipelineStep, RequestEnvelope, RequestIdentifier,
        ResultEnvelope, ResultStatus, StepOptions,
    };

    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{json, Value};
}

pub use activity::{
    ActivityContext, ActivityError, ActivityExecutor, ActivityOutcome, FailureKind,
    FnActivityExecutor, HttpActivityExecutor, ProcessRequestActivity, StepDescriptor,
    PROCESS_REQUEST,
};
pub use config::{ConfigError, EngineConfig};
pub use engine::{
    EngineError, ErrorKind, ExecutionRegistry, RegistryConfig, StatusReport, WorkflowEngine,
};
pub use persistence::{
    ExecutionLedger, InMemoryExecutionLedger, LedgerError, PostgresExecutionLedger,
};
pub use reliability::{RetryDecision, RetryPolicy, TimeoutConfig, TimeoutError};
pub use workflow::{
    EnvelopeError, ExecutionRecord, ExecutionResult, ExecutionState, ExecutionStatus, Pipeline,
    PipelineStep, RequestEnvelope, RequestIdentifier, ResultEnvelope, ResultError, ResultStatus,
    StatusSnapshot, StepOptions, WorkflowError, WorkflowSignal, WorkflowStateMachine,
};
