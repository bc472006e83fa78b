//! Workflow execution engine
//!
//! The engine module provides the [`WorkflowEngine`] facade, which admits
//! requests and routes signals and queries through the [`ExecutionRegistry`]
//! to the matching state machine.

mod executor;
mod registry;

pub use executor::{EngineError, ErrorKind, StatusReport, WorkflowEngine};
pub use registry::{ExecutionRegistry, RegistryConfig};
