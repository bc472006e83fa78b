// Worker configuration
// Decision: The ledger backend is chosen by the presence of DATABASE_URL
// Decision: The collaborator step is appended only when its URL is configured

use std::sync::Arc;
use std::time::Duration;

use actflow_durable::{
    ConfigError, EngineConfig, HttpActivityExecutor, Pipeline, ProcessRequestActivity,
    PROCESS_REQUEST,
};

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const COLLABORATOR_URL: &str = "ACTFLOW_COLLABORATOR_URL";
pub const COLLABORATOR_TOKEN: &str = "ACTFLOW_COLLABORATOR_TOKEN";
pub const SWEEP_INTERVAL_SECS: &str = "ACTFLOW_SWEEP_INTERVAL_SECS";

/// Activity type of the collaborator step
pub const COLLABORATOR_CALL: &str = "collaborator_call";

/// Configuration for the worker process
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// PostgreSQL ledger; in-memory when unset
    pub database_url: Option<String>,

    /// Collaborator endpoint for the second pipeline step
    pub collaborator_url: Option<String>,

    pub collaborator_token: Option<String>,

    /// How often expired executions are swept from the registry
    pub sweep_interval: Duration,

    pub engine: EngineConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            collaborator_url: None,
            collaborator_token: None,
            sweep_interval: Duration::from_secs(60),
            engine: EngineConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `DATABASE_URL`: PostgreSQL ledger (default: in-memory ledger)
    /// - `ACTFLOW_COLLABORATOR_URL`: Collaborator endpoint (default: none)
    /// - `ACTFLOW_COLLABORATOR_TOKEN`: Bearer token for the collaborator
    /// - `ACTFLOW_SWEEP_INTERVAL_SECS`: Registry sweep interval (default: 60)
    /// - `ACTFLOW_*` engine settings, see [`EngineConfig::from_env`]
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let sweep_interval = match non_empty(SWEEP_INTERVAL_SECS) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        key: SWEEP_INTERVAL_SECS.to_string(),
                        value: raw,
                    })
                }
            },
            None => Duration::from_secs(60),
        };

        Ok(Self {
            database_url: non_empty(DATABASE_URL),
            collaborator_url: non_empty(COLLABORATOR_URL),
            collaborator_token: non_empty(COLLABORATOR_TOKEN),
            sweep_interval,
            engine: EngineConfig::from_lookup(&lookup)?,
        })
    }

    /// Local request processing, then the collaborator call when configured
    pub fn pipeline(&self) -> Pipeline {
        let pipeline = Pipeline::new().then(PROCESS_REQUEST, Arc::new(ProcessRequestActivity::new()));

        match &self.collaborator_url {
            Some(url) => {
                let mut executor = HttpActivityExecutor::new(COLLABORATOR_CALL, url.clone());
                if let Some(token) = &self.collaborator_token {
                    executor = executor.with_bearer_token(token.clone());
                }
                pipeline.then(COLLABORATOR_CALL, Arc::new(executor))
            }
            None => pipeline,
        }
    }
}
