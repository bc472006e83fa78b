//! Activity abstractions
//!
//! Activities are the units of work that perform external I/O on behalf of a
//! pipeline step. They:
//! - Run exactly once per invocation (retries are driven by the state machine)
//! - Are bounded by a start-to-close timeout
//! - Report failures classified as transient, permanent or timeout

mod context;
mod definition;
mod function;
mod http;
mod process;

pub use context::ActivityContext;
pub use definition::{ActivityError, ActivityExecutor, ActivityOutcome, FailureKind, StepDescriptor};
pub use function::{ActivityHandler, FnActivityExecutor};
pub use http::{HttpActivityExecutor, IDEMPOTENCY_KEY_HEADER, REQUEST_ID_HEADER};
pub use process::{ProcessRequestActivity, PROCESS_REQUEST};
