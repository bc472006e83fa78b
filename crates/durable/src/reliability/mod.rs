//! Reliability patterns for durable execution
//!
//! This module provides:
//! - [`RetryPolicy`] - Deterministic retry decisions with exponential backoff
//! - [`TimeoutConfig`] / [`with_timeout`] - Start-to-close deadlines for activities

mod retry;
mod timeout;

pub use retry::{RetryDecision, RetryPolicy};
pub use timeout::{with_timeout, TimeoutConfig, TimeoutError};
