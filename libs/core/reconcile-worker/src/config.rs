//! Controller configuration

use std::time::Duration;

/// Configuration for a [`Controller`](crate::Controller)
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Controller name used in logs and metric labels
    pub name: String,

    /// Number of worker tasks; distinct keys are reconciled in parallel
    pub max_concurrent_reconciles: usize,

    /// Drop a key after this many consecutive retriable failures.
    /// `None` keeps requeueing with capped backoff.
    pub max_retries: Option<u32>,

    /// How long `run` waits for in-flight reconciles after shutdown is signalled
    pub shutdown_grace_period: Duration,
}

impl ControllerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_concurrent_reconciles: 1,
            max_retries: None,
            shutdown_grace_period: Duration::from_secs(30),
        }
    }

    /// Set the number of workers (at least one)
    pub fn with_max_concurrent_reconciles(mut self, count: usize) -> Self {
        self.max_concurrent_reconciles = count.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_shutdown_grace_period(mut self, grace: Duration) -> Self {
        self.shutdown_grace_period = grace;
        self
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::new("controller")
    }
}
