//! Activity timeout management

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::retry::duration_millis;

/// Timeout-related errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimeoutError {
    /// Activity exceeded start-to-close timeout
    #[error("activity execution timed out (limit {limit:?})")]
    StartToClose { limit: Duration },
}

/// Timeout configuration for activities
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Maximum time from start to completion of one invocation
    #[serde(with = "duration_millis")]
    pub start_to_close: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            start_to_close: Duration::from_secs(30),
        }
    }
}

impl TimeoutConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set start-to-close timeout
    pub fn with_start_to_close(mut self, timeout: Duration) -> Self {
        self.start_to_close = timeout;
        self
    }
}

/// Run `fut` to completion or until `limit` elapses
///
/// On expiry the future is dropped, abandoning whatever it was doing.
pub async fn with_timeout<F>(limit: Duration, fut: F) -> Result<F::Output, TimeoutError>
where
    F: Future,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TimeoutError::StartToClose { limit })
}
