//! Queue metrics and capacity planning.
//!
//! Sliding-window event recording lives in the backing store so every
//! process sees the same numbers. Prometheus export is available behind the
//! `metrics` feature.

mod capacity;
mod config;
mod recorder;

#[cfg(feature = "metrics")]
mod collector;

pub use capacity::{
    AggregateMetrics, Bottleneck, CapacityAnalysis, ConcurrencyRecommendation, HEALTHY_RATIO, OverallHealth,
    TierMetrics, WindowSnapshot,
};
pub use config::{MetricsConfig, MetricsConfigBuilder};
pub use recorder::{HISTORY_BUCKETS, HistoryPoint, HistoryWindow, QueueMetrics};

#[cfg(feature = "metrics")]
pub use collector::MetricsCollector;
