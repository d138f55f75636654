//! Queueing-theory analysis over window rates
//!
//! Everything here is pure so it can be checked with fixed numbers.

use crate::jobs::{Tier, TierRegistry};
use serde::{Deserialize, Serialize};

/// Success and SLA ratios below this count as an issue
pub const HEALTHY_RATIO: f64 = 0.95;

/// Derived metrics of one tier over the sliding window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierMetrics {
    pub tier: Tier,
    /// Jobs waiting in the live ordered set (ready and delayed)
    pub depth: u64,
    pub dead_letter_depth: u64,
    /// Enqueued jobs per second
    pub arrival_rate: f64,
    /// Completed jobs per second
    pub throughput: f64,
    pub avg_wait_ms: f64,
    pub avg_processing_ms: f64,
    /// Wait plus processing
    pub avg_latency_ms: f64,
    pub success_rate: f64,
    pub sla_compliance: f64,
    pub processed_last_hour: u64,
    pub failed_last_hour: u64,
    /// Little's Law `L = throughput * avg latency`
    pub predicted_depth: f64,
    pub healthy: bool,
}

/// Raw window counts for one tier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowSnapshot {
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub wait_samples: Vec<f64>,
    pub processing_samples: Vec<f64>,
    pub sla_hits: u64,
    pub sla_misses: u64,
}

fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

fn ratio(good: u64, bad: u64) -> f64 {
    if good + bad == 0 { 1.0 } else { good as f64 / (good + bad) as f64 }
}

impl TierMetrics {
    pub fn from_snapshot(
        tier: Tier,
        snapshot: &WindowSnapshot,
        window_secs: f64,
        depth: u64,
        dead_letter_depth: u64,
        hourly: (u64, u64),
    ) -> Self {
        let window_secs = window_secs.max(1.0);
        let arrival_rate = snapshot.enqueued as f64 / window_secs;
        let throughput = snapshot.completed as f64 / window_secs;
        let avg_wait_ms = mean(&snapshot.wait_samples);
        let avg_processing_ms = mean(&snapshot.processing_samples);
        let avg_latency_ms = avg_wait_ms + avg_processing_ms;
        let success_rate = ratio(snapshot.completed, snapshot.failed);
        let sla_compliance = ratio(snapshot.sla_hits, snapshot.sla_misses);

        Self {
            tier,
            depth,
            dead_letter_depth,
            arrival_rate,
            throughput,
            avg_wait_ms,
            avg_processing_ms,
            avg_latency_ms,
            success_rate,
            sla_compliance,
            processed_last_hour: hourly.0,
            failed_last_hour: hourly.1,
            predicted_depth: throughput * avg_latency_ms / 1000.0,
            healthy: sla_compliance >= HEALTHY_RATIO && success_rate >= HEALTHY_RATIO,
        }
    }
}

/// Overall health across tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Critical,
}

/// Sums and averages across tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub tiers: Vec<TierMetrics>,
    pub total_depth: u64,
    pub total_dead_letter: u64,
    pub total_arrival_rate: f64,
    pub total_throughput: f64,
    pub avg_success_rate: f64,
    pub avg_sla_compliance: f64,
    pub processed_last_hour: u64,
    pub failed_last_hour: u64,
    pub issues: Vec<String>,
    pub health: OverallHealth,
}

impl AggregateMetrics {
    pub fn from_tiers(tiers: Vec<TierMetrics>, registry: &TierRegistry) -> Self {
        let mut issues = Vec::new();
        let mut critical = false;

        for m in &tiers {
            if m.sla_compliance < HEALTHY_RATIO {
                issues.push(format!("{} tier SLA compliance at {:.1}%", m.tier, m.sla_compliance * 100.0));
            }
            if m.success_rate < HEALTHY_RATIO {
                issues.push(format!("{} tier success rate at {:.1}%", m.tier, m.success_rate * 100.0));
                critical |= m.success_rate < 0.8;
            }
            let threshold = registry.get(m.tier).dead_letter_threshold;
            if m.dead_letter_depth > threshold {
                issues.push(format!(
                    "{} tier dead-letter depth {} exceeds {}",
                    m.tier, m.dead_letter_depth, threshold
                ));
                critical |= m.tier == Tier::Critical;
            }
        }

        let health = if critical || issues.len() >= 3 {
            OverallHealth::Critical
        } else if !issues.is_empty() {
            OverallHealth::Degraded
        } else {
            OverallHealth::Healthy
        };

        let count = tiers.len().max(1) as f64;
        Self {
            total_depth: tiers.iter().map(|m| m.depth).sum(),
            total_dead_letter: tiers.iter().map(|m| m.dead_letter_depth).sum(),
            total_arrival_rate: tiers.iter().map(|m| m.arrival_rate).sum(),
            total_throughput: tiers.iter().map(|m| m.throughput).sum(),
            avg_success_rate: tiers.iter().map(|m| m.success_rate).sum::<f64>() / count,
            avg_sla_compliance: tiers.iter().map(|m| m.sla_compliance).sum::<f64>() / count,
            processed_last_hour: tiers.iter().map(|m| m.processed_last_hour).sum(),
            failed_last_hour: tiers.iter().map(|m| m.failed_last_hour).sum(),
            issues,
            health,
            tiers,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyRecommendation {
    Increase,
    Decrease,
    Maintain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bottleneck {
    Processing,
    Arrival,
    None,
}

/// Arrival versus service analysis of one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityAnalysis {
    pub tier: Tier,
    pub arrival_rate: f64,
    pub throughput: f64,
    pub is_stable: bool,
    /// Seconds to empty the queue; `None` when it never drains
    pub drain_time_secs: Option<f64>,
    pub recommendation: ConcurrencyRecommendation,
    pub bottleneck: Bottleneck,
    /// Little's Law `L = arrival rate * avg latency`
    pub predicted_depth: f64,
    pub observed_depth: u64,
    pub concurrency: usize,
}

impl CapacityAnalysis {
    pub fn compute(
        tier: Tier,
        arrival_rate: f64,
        throughput: f64,
        avg_latency_secs: f64,
        observed_depth: u64,
        concurrency: usize,
    ) -> Self {
        let is_stable = throughput >= arrival_rate * HEALTHY_RATIO;

        let net = throughput - arrival_rate;
        let drain_time_secs = (net > 0.0).then(|| observed_depth as f64 / net);

        let recommendation = if !is_stable || observed_depth > 10 * concurrency as u64 {
            ConcurrencyRecommendation::Increase
        } else if throughput > arrival_rate * 1.5 && observed_depth < concurrency as u64 {
            ConcurrencyRecommendation::Decrease
        } else {
            ConcurrencyRecommendation::Maintain
        };

        let bottleneck = if arrival_rate > throughput * 1.2 {
            Bottleneck::Processing
        } else if throughput > arrival_rate * 2.0 && observed_depth == 0 {
            Bottleneck::Arrival
        } else {
            Bottleneck::None
        };

        Self {
            tier,
            arrival_rate,
            throughput,
            is_stable,
            drain_time_secs,
            recommendation,
            bottleneck,
            predicted_depth: arrival_rate * avg_latency_secs,
            observed_depth,
            concurrency,
        }
    }
}
