//! Tidequeue - a tiered background job queue
//!
//! Jobs are routed to one of three tiers (critical, standard, batch), each
//! with its own SLA, concurrency limit, retry budget and timeout. Failed
//! jobs retry with exponential backoff; exhausted ones land in a per-tier
//! dead-letter set with a classified error, a suggested action and
//! operator hooks. Sliding-window metrics feed a capacity planner.
//!
//! # Features
//!
//! - **Dispatcher**: idempotent, delayed and scheduled submission
//! - **Worker pool**: per-tier loops with fenced leases and graceful shutdown
//! - **Dead letters**: classification, bounded auto-retry, pattern analysis
//! - **Metrics**: throughput, latency, SLA compliance, Little's Law planning
//! - **Backends**: in-memory by default, Redis with the `redis` feature
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tidequeue::{DispatchOptions, JobOutcome, QueueConfig, QueueService};
//!
//! #[tokio::main]
//! async fn main() -> tidequeue::Result<()> {
//!     let config = QueueConfig::from_env();
//!     tidequeue::init_tracing_with_config(&config.logging);
//!
//!     let queue = QueueService::from_config(config)?;
//!     queue
//!         .handlers()
//!         .register("email.send", |_job| Box::pin(async { Ok(JobOutcome::ok()) }))
//!         .await?;
//!     queue.start().await?;
//!
//!     queue
//!         .dispatcher()
//!         .dispatch(
//!             "email.send",
//!             serde_json::json!({"to": "ana@example.com"}),
//!             DispatchOptions::new().idempotency_key("welcome-42"),
//!         )
//!         .await;
//!
//!     queue.shutdown().await;
//!     Ok(())
//! }
//! ```

#![allow(async_fn_in_trait)] // async_trait macro handles Send/Sync bounds properly

mod config;
pub mod dead_letter;
mod error;
pub mod jobs;
pub mod metrics;
mod service;
pub mod store;
pub mod testing;
pub mod traits;
mod utils;

// Re-exports for public API
pub use config::{DeadLetterConfig, LoggingConfig, QueueConfig, QueueConfigBuilder, StoreBackend};
pub use dead_letter::{
    DeadLetterEntry, DeadLetterHealth, DeadLetterHooks, DeadLetterManager, DeadLetterStats, ErrorCategory,
    ErrorPattern, HealthStatus, NoopHooks, RetryFilter, SuggestedAction, classify_error, normalize_error_message,
};
pub use error::{QueueError, Result};
pub use jobs::{
    DispatchOptions, DispatchRequest, DispatchResult, Dispatcher, HandlerRegistry, Job, JobHandler, JobOutcome,
    JobStatus, QueueStats, Tier, TierConfig, TierRegistry, WorkerConfig, WorkerPool,
};
#[cfg(feature = "metrics")]
pub use metrics::MetricsCollector;
pub use metrics::{AggregateMetrics, CapacityAnalysis, HistoryWindow, MetricsConfig, QueueMetrics, TierMetrics};
pub use service::{QueueService, QueueServiceBuilder};
pub use store::InMemoryStore;
#[cfg(feature = "redis")]
pub use store::RedisStore;
pub use traits::job::JobPayload;
pub use traits::store::QueueStore;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "tidequeue=debug")
/// - `TIDEQUEUE_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    install_subscriber(env_filter, LoggingConfig::from_env().json);
}

/// Initialize tracing from a logging configuration
pub fn init_tracing_with_config(config: &LoggingConfig) {
    install_subscriber(EnvFilter::new(&config.level), config.json);
}

fn install_subscriber(env_filter: EnvFilter, json: bool) {
    let registry = tracing_subscriber::registry().with(env_filter);
    // A subscriber may already be installed (tests, embedding apps)
    let result = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
