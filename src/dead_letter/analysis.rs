//! Dead-letter statistics, error patterns and health
//!
//! Everything here is a pure function over a snapshot of entries so the
//! manager only has to load them.

use crate::config::DeadLetterConfig;
use crate::dead_letter::{DeadLetterEntry, ErrorCategory, normalize_error_message};
use crate::jobs::{Tier, TierRegistry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Aggregate counts over every tier's dead-letter set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterStats {
    pub total: u64,
    pub by_tier: BTreeMap<Tier, u64>,
    pub by_job_type: BTreeMap<String, u64>,
    pub by_category: BTreeMap<ErrorCategory, u64>,
    /// Age of the oldest entry in seconds
    pub oldest_age_secs: Option<i64>,
    /// Age of the newest entry in seconds
    pub newest_age_secs: Option<i64>,
    pub retryable: u64,
}

/// A repeated failure shape found by normalizing messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub pattern: String,
    pub count: u64,
    pub category: ErrorCategory,
    pub job_types: Vec<String>,
    pub sample_error: String,
    pub suggested_fix: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Overall dead-letter health level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        }
    }
}

/// Health report with one issue and one recommendation per finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterHealth {
    pub status: HealthStatus,
    pub total: u64,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Count entries by tier, job type and category
pub fn compute_stats(entries: &[DeadLetterEntry], now: DateTime<Utc>) -> DeadLetterStats {
    let mut stats = DeadLetterStats::default();

    for tier in Tier::ALL {
        stats.by_tier.insert(tier, 0);
    }

    for entry in entries {
        stats.total += 1;
        *stats.by_tier.entry(entry.job.tier).or_default() += 1;
        *stats.by_job_type.entry(entry.job.job_type.clone()).or_default() += 1;
        *stats.by_category.entry(entry.category).or_default() += 1;
        if entry.retryable {
            stats.retryable += 1;
        }
    }

    stats.oldest_age_secs = entries
        .iter()
        .map(|e| e.failed_at)
        .min()
        .map(|t| (now - t).num_seconds());
    stats.newest_age_secs = entries
        .iter()
        .map(|e| e.failed_at)
        .max()
        .map(|t| (now - t).num_seconds());

    stats
}

/// Group entries by normalized message, most frequent first
pub fn find_error_patterns(entries: &[DeadLetterEntry]) -> Vec<ErrorPattern> {
    struct Acc {
        count: u64,
        category: ErrorCategory,
        job_types: BTreeSet<String>,
        sample: String,
        first_seen: DateTime<Utc>,
        last_seen: DateTime<Utc>,
    }

    let mut groups: HashMap<String, Acc> = HashMap::new();

    for entry in entries {
        let pattern = normalize_error_message(&entry.error);
        let acc = groups.entry(pattern).or_insert_with(|| Acc {
            count: 0,
            category: entry.category,
            job_types: BTreeSet::new(),
            sample: entry.error.clone(),
            first_seen: entry.failed_at,
            last_seen: entry.failed_at,
        });
        acc.count += 1;
        acc.job_types.insert(entry.job.job_type.clone());
        acc.first_seen = acc.first_seen.min(entry.failed_at);
        acc.last_seen = acc.last_seen.max(entry.failed_at);
    }

    let mut patterns: Vec<ErrorPattern> = groups
        .into_iter()
        .map(|(pattern, acc)| ErrorPattern {
            pattern,
            count: acc.count,
            category: acc.category,
            job_types: acc.job_types.into_iter().collect(),
            sample_error: acc.sample,
            suggested_fix: acc.category.suggested_fix().to_string(),
            first_seen: acc.first_seen,
            last_seen: acc.last_seen,
        })
        .collect();

    patterns.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.pattern.cmp(&b.pattern)));
    patterns
}

/// Derive a health level from volume, tier thresholds, staleness and retryable share
pub fn assess_health(
    stats: &DeadLetterStats,
    tiers: &TierRegistry,
    config: &DeadLetterConfig,
) -> DeadLetterHealth {
    let mut status = HealthStatus::Healthy;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    if stats.total > config.health_critical_total {
        status = status.max(HealthStatus::Critical);
        issues.push(format!(
            "{} jobs in dead-letter queues (critical above {})",
            stats.total, config.health_critical_total
        ));
        recommendations.push("Analyze error patterns and fix the dominant failure before retrying".to_string());
    } else if stats.total > config.health_warning_total {
        status = status.max(HealthStatus::Warning);
        issues.push(format!(
            "{} jobs in dead-letter queues (warning above {})",
            stats.total, config.health_warning_total
        ));
        recommendations.push("Review dead-letter entries and retry or discard them".to_string());
    }

    for tier_config in tiers.all() {
        let size = stats.by_tier.get(&tier_config.tier).copied().unwrap_or(0);
        if size > tier_config.dead_letter_threshold {
            let level = if tier_config.tier == Tier::Critical {
                HealthStatus::Critical
            } else {
                HealthStatus::Warning
            };
            status = status.max(level);
            issues.push(format!(
                "{} tier has {} dead jobs (threshold {})",
                tier_config.tier, size, tier_config.dead_letter_threshold
            ));
            recommendations.push(format!(
                "Investigate {} tier failures; the threshold has been exceeded",
                tier_config.tier
            ));
        }
    }

    if let Some(age) = stats.oldest_age_secs {
        if age > config.stale_after_seconds as i64 {
            status = status.max(HealthStatus::Warning);
            issues.push(format!("Oldest dead-letter entry is {} hours old", age / 3600));
            recommendations.push("Retry or discard stale entries before they expire".to_string());
        }
    }

    if stats.total > 0 && stats.retryable * 2 > stats.total {
        status = status.max(HealthStatus::Warning);
        issues.push(format!(
            "{} of {} dead jobs failed with transient errors",
            stats.retryable, stats.total
        ));
        recommendations.push(
            "Retry entries with timeout, rate_limit or external_service errors once upstreams recover"
                .to_string(),
        );
    }

    DeadLetterHealth {
        status,
        total: stats.total,
        issues,
        recommendations,
    }
}
