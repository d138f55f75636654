//! Tiered background jobs
//!
//! Producers submit through the [`Dispatcher`], which places jobs on one
//! ordered set per tier. The [`WorkerPool`] drains each tier up to its
//! concurrency limit, retries failures with backoff and hands exhausted jobs
//! to the dead-letter manager.

mod config;
mod dispatcher;
mod job;
mod keys;
pub mod payloads;
mod registry;
mod repository;
mod tier;
mod worker;

#[cfg(test)]
mod tests;

pub use config::WorkerConfig;
pub use dispatcher::{DispatchRequest, Dispatcher, NOT_CONFIGURED, QueueStats, TierQueueStats};
pub use job::{
    DispatchOptions, DispatchResult, Job, JobOutcome, JobStatus, JobStatusRecord, priority_score,
};
pub use keys::{KeyScheme, MetricEvent};
pub use registry::{HandlerRegistry, JobHandler};
pub use repository::JobRepository;
pub use tier::{
    DEFAULT_CRITICAL_JOB_TYPES, DEFAULT_JOB_TYPES, MAX_BACKOFF, MAX_JITTER_MS, Tier, TierConfig,
    TierRegistry, TierRegistryBuilder, backoff_delay, backoff_delay_with_jitter,
};
pub use worker::WorkerPool;
