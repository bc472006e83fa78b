//! Linear pipeline definition

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::activity::{ActivityExecutor, StepDescriptor};
use crate::reliability::{RetryPolicy, TimeoutConfig};

/// Options for executing one pipeline step
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepOptions {
    /// Retry policy for this step
    pub retry_policy: RetryPolicy,

    /// Deadline for each invocation
    pub timeout: TimeoutConfig,
}

impl StepOptions {
    /// Create options with a specific retry policy
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the start-to-close timeout
    pub fn with_start_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.timeout.start_to_close = timeout;
        self
    }

    pub fn start_to_close_timeout(&self) -> Duration {
        self.timeout.start_to_close
    }
}

/// One step of a [`Pipeline`]
#[derive(Clone)]
pub struct PipelineStep {
    pub name: String,
    pub executor: Arc<dyn ActivityExecutor>,
    pub options: Option<StepOptions>,
}

impl PipelineStep {
    pub fn new(name: impl Into<String>, executor: Arc<dyn ActivityExecutor>) -> Self {
        Self {
            name: name.into(),
            executor,
            options: None,
        }
    }

    /// Override the engine-wide step options for this step
    pub fn with_options(mut self, options: StepOptions) -> Self {
        self.options = Some(options);
        self
    }
}

impl std::fmt::Debug for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineStep")
            .field("name", &self.name)
            .field("activity_type", &self.executor.activity_type())
            .field("options", &self.options)
            .finish()
    }
}

/// Ordered sequence of steps run strictly one after another
///
/// Step 0 receives the serialized request envelope, each later step receives
/// the previous step's value, and the last value is the execution result.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
    defaults: StepOptions,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step
    pub fn with_step(mut self, step: PipelineStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a step using the pipeline's default options
    pub fn then(self, name: impl Into<String>, executor: Arc<dyn ActivityExecutor>) -> Self {
        self.with_step(PipelineStep::new(name, executor))
    }

    /// Options used by steps without their own
    pub fn with_default_options(mut self, options: StepOptions) -> Self {
        self.defaults = options;
        self
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn descriptor(&self, index: usize) -> Option<StepDescriptor> {
        self.steps
            .get(index)
            .map(|s| StepDescriptor::new(index as u32, s.name.clone()))
    }

    /// Effective options for a step
    pub fn options_for<'a>(&'a self, step: &'a PipelineStep) -> &'a StepOptions {
        step.options.as_ref().unwrap_or(&self.defaults)
    }
}
