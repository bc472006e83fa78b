//! Persistence layer for durable execution
//!
//! This module provides:
//! - [`ExecutionLedger`] trait for execution and step-record persistence
//! - [`InMemoryExecutionLedger`] for testing and local runs
//! - [`PostgresExecutionLedger`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryExecutionLedger;
pub use postgres::PostgresExecutionLedger;
pub use store::{ExecutionLedger, LedgerError};
