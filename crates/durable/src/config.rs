// Engine configuration
//
// Retry, timeout and retention settings, loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::RegistryConfig;
use crate::reliability::{RetryPolicy, TimeoutConfig};
use crate::workflow::StepOptions;

pub const RETRY_INITIAL_INTERVAL_MS: &str = "ACTFLOW_RETRY_INITIAL_INTERVAL_MS";
pub const RETRY_MAX_INTERVAL_MS: &str = "ACTFLOW_RETRY_MAX_INTERVAL_MS";
pub const RETRY_BACKOFF_COEFFICIENT: &str = "ACTFLOW_RETRY_BACKOFF_COEFFICIENT";
pub const RETRY_MAX_ATTEMPTS: &str = "ACTFLOW_RETRY_MAX_ATTEMPTS";
pub const ACTIVITY_TIMEOUT_MS: &str = "ACTFLOW_ACTIVITY_TIMEOUT_MS";
pub const RETENTION_SECS: &str = "ACTFLOW_RETENTION_SECS";
pub const REGISTRY_CAPACITY: &str = "ACTFLOW_REGISTRY_CAPACITY";

/// Configuration errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retry policy for steps without their own
    pub retry: RetryPolicy,

    /// Timeouts for steps without their own
    pub timeout: TimeoutConfig,

    /// How long terminal executions stay in the registry
    #[serde(with = "duration_secs")]
    pub retention: Duration,

    /// Maximum terminal executions kept in the registry
    pub registry_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: TimeoutConfig::default(),
            retention: Duration::from_secs(3600),
            registry_capacity: 10_000,
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `ACTFLOW_RETRY_INITIAL_INTERVAL_MS`: First retry delay (default: 1000)
    /// - `ACTFLOW_RETRY_MAX_INTERVAL_MS`: Retry delay cap (default: 10000)
    /// - `ACTFLOW_RETRY_BACKOFF_COEFFICIENT`: Delay multiplier, at least 1.0 (default: 2.0)
    /// - `ACTFLOW_RETRY_MAX_ATTEMPTS`: Attempts per step, at least 1 (default: 3)
    /// - `ACTFLOW_ACTIVITY_TIMEOUT_MS`: Start-to-close timeout (default: 30000)
    /// - `ACTFLOW_RETENTION_SECS`: Terminal execution retention (default: 3600)
    /// - `ACTFLOW_REGISTRY_CAPACITY`: Terminal executions kept (default: 10000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let initial_ms: u64 = parse(&lookup, RETRY_INITIAL_INTERVAL_MS, 1000)?;
        let max_ms: u64 = parse(&lookup, RETRY_MAX_INTERVAL_MS, 10_000)?;
        let coefficient: f64 = parse(&lookup, RETRY_BACKOFF_COEFFICIENT, 2.0)?;
        let max_attempts: u32 = parse(&lookup, RETRY_MAX_ATTEMPTS, 3)?;
        let timeout_ms: u64 = parse(&lookup, ACTIVITY_TIMEOUT_MS, 30_000)?;
        let retention_secs: u64 = parse(&lookup, RETENTION_SECS, 3600)?;
        let capacity: usize = parse(&lookup, REGISTRY_CAPACITY, defaults.registry_capacity)?;

        if !coefficient.is_finite() || coefficient < 1.0 {
            return Err(invalid(RETRY_BACKOFF_COEFFICIENT, coefficient));
        }
        if max_attempts == 0 {
            return Err(invalid(RETRY_MAX_ATTEMPTS, max_attempts));
        }
        if timeout_ms == 0 {
            return Err(invalid(ACTIVITY_TIMEOUT_MS, timeout_ms));
        }

        Ok(Self {
            retry: RetryPolicy::exponential()
                .with_initial_interval(Duration::from_millis(initial_ms))
                .with_max_interval(Duration::from_millis(max_ms))
                .with_backoff_coefficient(coefficient)
                .with_max_attempts(max_attempts),
            timeout: TimeoutConfig::new().with_start_to_close(Duration::from_millis(timeout_ms)),
            retention: Duration::from_secs(retention_secs),
            registry_capacity: capacity,
        })
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_activity_timeout(mut self, timeout: Duration) -> Self {
        self.timeout.start_to_close = timeout;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_registry_capacity(mut self, capacity: usize) -> Self {
        self.registry_capacity = capacity;
        self
    }

    /// Step options for steps without their own
    pub fn step_options(&self) -> StepOptions {
        StepOptions {
            retry_policy: self.retry.clone(),
            timeout: self.timeout.clone(),
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            retention: self.retention,
            capacity: self.registry_capacity,
        }
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| invalid(key, raw)),
        _ => Ok(default),
    }
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Serde support for Duration as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
