//! Workflow abstractions and types
//!
//! This module contains the core workflow primitives:
//! - [`RequestEnvelope`] / [`ResultEnvelope`] for the request boundary
//! - [`ExecutionState`] and [`ExecutionRecord`] persisted in the ledger
//! - [`Pipeline`] describing the linear sequence of steps
//! - [`WorkflowStateMachine`] driving one request through the pipeline
//! - [`WorkflowSignal`] for external communication

mod envelope;
mod machine;
mod pipeline;
mod signal;
mod state;

pub use envelope::{
    EnvelopeError, RequestEnvelope, RequestIdentifier, ResultEnvelope, ResultError, ResultStatus,
};
pub use machine::{StatusSnapshot, WorkflowError, WorkflowStateMachine};
pub use pipeline::{Pipeline, PipelineStep, StepOptions};
pub use signal::WorkflowSignal;
pub use state::{ExecutionRecord, ExecutionResult, ExecutionState, ExecutionStatus};
