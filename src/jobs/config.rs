//! Runtime settings of the worker pool

use crate::config::QueueConfig;
use std::time::Duration;

/// Timing knobs for the per-tier loops, leases and shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Sleep between polls when a tier is idle or saturated
    pub poll_interval: Duration,
    /// Extra lock lifetime on top of the tier timeout
    pub lock_grace: Duration,
    /// Interval of the expired-lease sweep
    pub reaper_interval: Duration,
    /// How long shutdown waits for in-flight jobs
    pub shutdown_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for WorkerConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            lock_grace: config.lock_grace(),
            reaper_interval: config.reaper_interval(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_lock_grace(mut self, grace: Duration) -> Self {
        self.lock_grace = grace;
        self
    }

    #[must_use]
    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}
