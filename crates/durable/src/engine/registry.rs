//! Execution registry
//!
//! Process-wide map from request identifier to its state machine. Creation
//! goes through the map's per-key entry lock, so at most one live instance
//! exists per identifier.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::persistence::ExecutionLedger;
use crate::workflow::{Pipeline, RequestEnvelope, RequestIdentifier, WorkflowStateMachine};

/// Retention limits for terminal executions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// How long a terminal execution stays cached
    pub retention: Duration,

    /// Maximum number of cached terminal executions
    pub capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(3600),
            capacity: 10_000,
        }
    }
}

/// Identifier-keyed registry of state machines
pub struct ExecutionRegistry {
    executions: DashMap<RequestIdentifier, Arc<WorkflowStateMachine>>,
    pipeline: Arc<Pipeline>,
    ledger: Arc<dyn ExecutionLedger>,
    config: RegistryConfig,
}

impl ExecutionRegistry {
    pub fn new(
        pipeline: Arc<Pipeline>,
        ledger: Arc<dyn ExecutionLedger>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            executions: DashMap::new(),
            pipeline,
            ledger,
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Look up the instance for `envelope.identifier`, creating it if absent
    ///
    /// Returns the handle and whether it was created by this call (the caller
    /// is then responsible for running it). A faulted instance is replaced so
    /// the execution can resume from the ledger.
    pub fn get_or_create(&self, envelope: &RequestEnvelope) -> (Arc<WorkflowStateMachine>, bool) {
        let machine = match self.executions.entry(envelope.identifier.clone()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_faulted() {
                    return (entry.get().clone(), false);
                }
                debug!(identifier = %envelope.identifier, "replacing faulted execution");
                let machine = self.build(envelope);
                entry.insert(machine.clone());
                machine
            }
            Entry::Vacant(entry) => {
                let machine = self.build(envelope);
                entry.insert(machine.clone());
                machine
            }
        };

        if self.executions.len() > self.config.capacity {
            self.enforce_capacity();
        }

        (machine, true)
    }

    fn build(&self, envelope: &RequestEnvelope) -> Arc<WorkflowStateMachine> {
        Arc::new(WorkflowStateMachine::new(
            envelope.clone(),
            self.pipeline.clone(),
            self.ledger.clone(),
        ))
    }

    /// Find an instance; never creates one
    pub fn find(&self, identifier: &RequestIdentifier) -> Option<Arc<WorkflowStateMachine>> {
        self.executions.get(identifier).map(|e| e.value().clone())
    }

    /// Remove a settled instance
    ///
    /// Live instances are never evicted; returns whether one was removed.
    pub fn evict(&self, identifier: &RequestIdentifier) -> bool {
        let removed = self
            .executions
            .remove_if(identifier, |_, machine| !machine.is_live())
            .is_some();

        if removed {
            info!(%identifier, "evicted execution");
        } else {
            debug!(%identifier, "nothing to evict");
        }
        removed
    }

    /// Evict terminal instances past the retention window, then enforce capacity
    ///
    /// Returns the number of evicted instances.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let retention = self.config.retention;

        let before = self.executions.len();
        self.executions.retain(|_, machine| {
            match machine.snapshot().terminal_since {
                Some(since) => now.saturating_duration_since(since) < retention,
                None => true,
            }
        });
        let expired = before.saturating_sub(self.executions.len());

        if expired > 0 {
            info!(evicted = expired, "evicted expired executions");
        }
        expired + self.enforce_capacity()
    }

    /// Evict the oldest terminal instances beyond `capacity`
    fn enforce_capacity(&self) -> usize {
        let mut terminal: Vec<(Instant, RequestIdentifier)> = self
            .executions
            .iter()
            .filter_map(|e| e.value().snapshot().terminal_since.map(|t| (t, e.key().clone())))
            .collect();

        if terminal.len() <= self.config.capacity {
            return 0;
        }

        terminal.sort();
        let excess = terminal.len() - self.config.capacity;
        let evicted = terminal
            .into_iter()
            .take(excess)
            .filter(|(_, identifier)| self.evict(identifier))
            .count();

        if evicted > 0 {
            info!(evicted, capacity = self.config.capacity, "evicted executions over capacity");
        }
        evicted
    }

    /// Number of cached instances
    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }
}

impl std::fmt::Debug for ExecutionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRegistry")
            .field("executions", &self.executions.len())
            .field("config", &self.config)
            .finish()
    }
}
