//! Worker process for the durable request engine
//!
//! Wires the engine to a ledger backend and a pipeline from the environment,
//! then serves commands from a line-oriented stream.

pub mod config;
pub mod driver;
pub mod telemetry;

pub use config::WorkerConfig;
pub use driver::{run, Command, Response};
pub use telemetry::{init_logging, LogConfig};
