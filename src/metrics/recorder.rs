//! Store-backed sliding-window metrics
//!
//! Each event is an ordered-set member scored by its timestamp. Members carry
//! a unique prefix so identical samples never collapse into one entry.

use crate::error::Result;
use crate::jobs::{KeyScheme, MetricEvent, Tier, TierRegistry};
use crate::metrics::capacity::{AggregateMetrics, CapacityAnalysis, TierMetrics, WindowSnapshot};
#[cfg(feature = "metrics")]
use crate::metrics::collector::MetricsCollector;
use crate::traits::store::QueueStore;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Most recent buckets returned by a history query
pub const HISTORY_BUCKETS: usize = 60;

const FIELD_COMPLETED: &str = "completed";
const FIELD_FAILED: &str = "failed";
const FIELD_LATENCY_MS: &str = "latency_ms";

/// Time range of a history query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryWindow {
    Hour,
    Day,
    Week,
}

impl HistoryWindow {
    pub const ALL: [HistoryWindow; 3] = [HistoryWindow::Hour, HistoryWindow::Day, HistoryWindow::Week];

    /// Width of one bucket so that 60 buckets span the window
    pub fn bucket_width_secs(&self) -> u64 {
        match self {
            HistoryWindow::Hour => 60,
            HistoryWindow::Day => 24 * 60,
            HistoryWindow::Week => 7 * 24 * 60,
        }
    }
}

/// One historical bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub bucket_start: DateTime<Utc>,
    pub completed: u64,
    pub failed: u64,
    /// Completed jobs per second over the bucket
    pub throughput: f64,
    pub avg_latency_ms: f64,
}

/// Records queue events and derives tier metrics from them
#[derive(Clone)]
pub struct QueueMetrics {
    store: Arc<dyn QueueStore>,
    keys: KeyScheme,
    tiers: TierRegistry,
    window: Duration,
    #[cfg(feature = "metrics")]
    collector: Option<Arc<MetricsCollector>>,
}

impl QueueMetrics {
    pub fn new(store: Arc<dyn QueueStore>, keys: KeyScheme, tiers: TierRegistry, window: Duration) -> Self {
        Self {
            store,
            keys,
            tiers,
            window,
            #[cfg(feature = "metrics")]
            collector: None,
        }
    }

    /// Mirror every recorded event into a Prometheus collector
    #[cfg(feature = "metrics")]
    pub fn with_collector(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    #[cfg(feature = "metrics")]
    pub fn collector(&self) -> Option<&Arc<MetricsCollector>> {
        self.collector.as_ref()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    async fn record(&self, tier: Tier, event: MetricEvent, value: f64, now_ms: i64) -> Result<()> {
        let key = self.keys.metric(tier, event);
        let member = format!("{}|{}", uuid::Uuid::new_v4().simple(), value);
        self.store.zadd(&key, &member, now_ms as f64).await?;

        let cutoff = now_ms - self.window.as_millis() as i64;
        self.store
            .zrem_range_by_score(&key, f64::NEG_INFINITY, (cutoff - 1) as f64)
            .await?;
        Ok(())
    }

    async fn record_history(&self, tier: Tier, field: &str, delta: i64, now_secs: i64) -> Result<()> {
        for window in HistoryWindow::ALL {
            let width = window.bucket_width_secs();
            let bucket = now_secs - now_secs.rem_euclid(width as i64);
            let ttl = Duration::from_secs(width * (HISTORY_BUCKETS as u64 + 1));
            self.store
                .hincr_by(&self.keys.history(tier, width, bucket), field, delta, Some(ttl))
                .await?;
        }
        Ok(())
    }

    pub async fn record_enqueued(&self, tier: Tier) -> Result<()> {
        #[cfg(feature = "metrics")]
        if let Some(c) = &self.collector {
            c.record_outcome(tier, "enqueued");
        }
        self.record(tier, MetricEvent::Enqueued, 1.0, Utc::now().timestamp_millis())
            .await
    }

    /// Record a successful run with its wait and processing times
    pub async fn record_completed(&self, tier: Tier, wait_ms: u64, processing_ms: u64, sla_met: bool) -> Result<()> {
        #[cfg(feature = "metrics")]
        if let Some(c) = &self.collector {
            c.record_outcome(tier, "completed");
            c.observe_duration(tier, Duration::from_millis(processing_ms));
        }

        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        self.record(tier, MetricEvent::Completed, 1.0, now_ms).await?;
        self.record(tier, MetricEvent::WaitTime, wait_ms as f64, now_ms).await?;
        self.record(tier, MetricEvent::ProcessingTime, processing_ms as f64, now_ms)
            .await?;
        let sla_event = if sla_met { MetricEvent::SlaHit } else { MetricEvent::SlaMiss };
        self.record(tier, sla_event, 1.0, now_ms).await?;

        self.record_history(tier, FIELD_COMPLETED, 1, now.timestamp()).await?;
        self.record_history(tier, FIELD_LATENCY_MS, (wait_ms + processing_ms) as i64, now.timestamp())
            .await
    }

    pub async fn record_failed(&self, tier: Tier) -> Result<()> {
        #[cfg(feature = "metrics")]
        if let Some(c) = &self.collector {
            c.record_outcome(tier, "failed");
        }

        let now = Utc::now();
        self.record(tier, MetricEvent::Failed, 1.0, now.timestamp_millis()).await?;
        self.record_history(tier, FIELD_FAILED, 1, now.timestamp()).await
    }

    /// A handler started running
    #[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
    pub fn job_started(&self, tier: Tier) {
        #[cfg(feature = "metrics")]
        if let Some(c) = &self.collector {
            c.jobs_in_flight.with_label_values(&[tier.as_str()]).inc();
        }
    }

    /// A handler finished running
    #[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
    pub fn job_finished(&self, tier: Tier) {
        #[cfg(feature = "metrics")]
        if let Some(c) = &self.collector {
            c.jobs_in_flight.with_label_values(&[tier.as_str()]).dec();
        }
    }

    async fn window_samples(&self, tier: Tier, event: MetricEvent, since_ms: i64) -> Result<Vec<f64>> {
        let members = self
            .store
            .zrange_by_score(&self.keys.metric(tier, event), since_ms as f64, f64::INFINITY, None)
            .await?;
        Ok(members
            .into_iter()
            .filter_map(|(member, _)| member.rsplit_once('|').and_then(|(_, v)| v.parse().ok()))
            .collect())
    }

    async fn window_count(&self, tier: Tier, event: MetricEvent, since_ms: i64) -> Result<u64> {
        self.store
            .zcount(&self.keys.metric(tier, event), since_ms as f64, f64::INFINITY)
            .await
    }

    async fn snapshot(&self, tier: Tier) -> Result<WindowSnapshot> {
        let since = Utc::now().timestamp_millis() - self.window.as_millis() as i64;
        Ok(WindowSnapshot {
            enqueued: self.window_count(tier, MetricEvent::Enqueued, since).await?,
            completed: self.window_count(tier, MetricEvent::Completed, since).await?,
            failed: self.window_count(tier, MetricEvent::Failed, since).await?,
            wait_samples: self.window_samples(tier, MetricEvent::WaitTime, since).await?,
            processing_samples: self.window_samples(tier, MetricEvent::ProcessingTime, since).await?,
            sla_hits: self.window_count(tier, MetricEvent::SlaHit, since).await?,
            sla_misses: self.window_count(tier, MetricEvent::SlaMiss, since).await?,
        })
    }

    /// Completed and failed counts over the last hour
    async fn last_hour(&self, tier: Tier) -> Result<(u64, u64)> {
        let points = self.get_historical(tier, HistoryWindow::Hour).await?;
        Ok(points
            .iter()
            .fold((0, 0), |(c, f), p| (c + p.completed, f + p.failed)))
    }

    pub async fn get_tier_metrics(&self, tier: Tier) -> Result<TierMetrics> {
        let snapshot = self.snapshot(tier).await?;
        let depth = self.store.zcard(&self.keys.queue(tier)).await?;
        let dead_letter_depth = self.store.zcard(&self.keys.dead_letter(tier)).await?;
        let hourly = self.last_hour(tier).await?;

        Ok(TierMetrics::from_snapshot(
            tier,
            &snapshot,
            self.window.as_secs_f64(),
            depth,
            dead_letter_depth,
            hourly,
        ))
    }

    pub async fn get_aggregate_metrics(&self) -> Result<AggregateMetrics> {
        let mut tiers = Vec::with_capacity(Tier::ALL.len());
        for tier in Tier::ALL {
            tiers.push(self.get_tier_metrics(tier).await?);
        }
        Ok(AggregateMetrics::from_tiers(tiers, &self.tiers))
    }

    pub async fn analyze_capacity(&self, tier: Tier) -> Result<CapacityAnalysis> {
        let metrics = self.get_tier_metrics(tier).await?;
        Ok(CapacityAnalysis::compute(
            tier,
            metrics.arrival_rate,
            metrics.throughput,
            metrics.avg_latency_ms / 1000.0,
            metrics.depth,
            self.tiers.get(tier).concurrency,
        ))
    }

    /// Up to 60 most recent non-empty buckets, oldest first
    pub async fn get_historical(&self, tier: Tier, window: HistoryWindow) -> Result<Vec<HistoryPoint>> {
        let width = window.bucket_width_secs() as i64;
        let now = Utc::now().timestamp();
        let current = now - now.rem_euclid(width);

        let mut points = Vec::new();
        for i in (0..HISTORY_BUCKETS as i64).rev() {
            let start = current - i * width;
            let fields = self
                .store
                .hget_all(&self.keys.history(tier, width as u64, start))
                .await?;
            if fields.is_empty() {
                continue;
            }

            let completed = fields.get(FIELD_COMPLETED).copied().unwrap_or(0).max(0) as u64;
            let failed = fields.get(FIELD_FAILED).copied().unwrap_or(0).max(0) as u64;
            let latency = fields.get(FIELD_LATENCY_MS).copied().unwrap_or(0).max(0) as f64;

            points.push(HistoryPoint {
                bucket_start: Utc.timestamp_opt(start, 0).single().unwrap_or_else(Utc::now),
                completed,
                failed,
                throughput: completed as f64 / width as f64,
                avg_latency_ms: if completed > 0 { latency / completed as f64 } else { 0.0 },
            });
        }

        Ok(points)
    }
}
