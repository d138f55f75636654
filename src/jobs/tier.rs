//! Queue tiers and retry backoff
//!
//! A tier is a priority/SLA/concurrency class. Every job type maps to a
//! default tier; submissions may override it.

use crate::error::{QueueError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for any retry delay
pub const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Upper bound for the random jitter added to a retry delay
pub const MAX_JITTER_MS: u64 = 1_000;

/// Queue tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Fast, user-facing work (emails, notifications, payments)
    Critical,
    /// Regular background work
    Standard,
    /// Long-running batch work
    Batch,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Critical, Tier::Standard, Tier::Batch];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Critical => "critical",
            Tier::Standard => "standard",
            Tier::Batch => "batch",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "critical" | "fast" => Ok(Tier::Critical),
            "standard" | "default" => Ok(Tier::Standard),
            "batch" | "long-running" | "long_running" => Ok(Tier::Batch),
            other => Err(QueueError::not_found(format!("Unknown tier: {}", other))),
        }
    }
}

/// Static configuration of a tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub tier: Tier,
    /// Lower runs first when scores tie
    pub priority: u32,
    /// Target end-to-end latency (wait + processing)
    pub sla: Duration,
    /// Maximum concurrently running handlers
    pub concurrency: usize,
    /// Default retry budget for jobs in this tier
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub base_retry_delay: Duration,
    /// Hard per-job handler timeout
    pub timeout: Duration,
    /// Dead-letter size above which the threshold hook fires
    pub dead_letter_threshold: u64,
    /// Upper bound of the random jitter added to retry delays
    #[serde(default = "default_max_jitter")]
    pub max_jitter: Duration,
}

fn default_max_jitter() -> Duration {
    Duration::from_millis(MAX_JITTER_MS)
}

impl TierConfig {
    pub fn critical() -> Self {
        Self {
            tier: Tier::Critical,
            priority: 1,
            sla: Duration::from_secs(30),
            concurrency: 20,
            max_retries: 3,
            base_retry_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
            dead_letter_threshold: 10,
            max_jitter: default_max_jitter(),
        }
    }

    pub fn standard() -> Self {
        Self {
            tier: Tier::Standard,
            priority: 5,
            sla: Duration::from_secs(5 * 60),
            concurrency: 10,
            max_retries: 5,
            base_retry_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(2 * 60),
            dead_letter_threshold: 50,
            max_jitter: default_max_jitter(),
        }
    }

    pub fn batch() -> Self {
        Self {
            tier: Tier::Batch,
            priority: 10,
            sla: Duration::from_secs(60 * 60),
            concurrency: 3,
            max_retries: 3,
            base_retry_delay: Duration::from_secs(30),
            timeout: Duration::from_secs(30 * 60),
            dead_letter_threshold: 100,
            max_jitter: default_max_jitter(),
        }
    }

    pub fn default_for(tier: Tier) -> Self {
        match tier {
            Tier::Critical => Self::critical(),
            Tier::Standard => Self::standard(),
            Tier::Batch => Self::batch(),
        }
    }

    /// Backoff delay for a failed attempt, with random jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let max_jitter_ms = self.max_jitter.as_millis().min(MAX_JITTER_MS as u128) as u64;
        backoff_delay_with_jitter(self.base_retry_delay, attempt, fastrand::u64(0..=max_jitter_ms))
    }
}

/// Exponential backoff with jitter: `min(base * 2^attempt + rand(0..=1000ms), 5min)`
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    backoff_delay_with_jitter(base, attempt, fastrand::u64(0..=MAX_JITTER_MS))
}

/// Deterministic variant of [`backoff_delay`] with an explicit jitter
pub fn backoff_delay_with_jitter(base: Duration, attempt: u32, jitter_ms: u64) -> Duration {
    let factor = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
    let base_ms = base.as_millis().min(u64::MAX as u128) as u64;
    let delay_ms = base_ms
        .saturating_mul(factor)
        .saturating_add(jitter_ms.min(MAX_JITTER_MS));
    Duration::from_millis(delay_ms).min(MAX_BACKOFF)
}

/// Job types that ship with a default tier mapping
pub const DEFAULT_JOB_TYPES: &[(&str, Tier)] = &[
    ("email.send", Tier::Critical),
    ("whatsapp.send", Tier::Critical),
    ("notification.push", Tier::Critical),
    ("payment.process", Tier::Critical),
    ("invoice.generate", Tier::Standard),
    ("pdf.generate", Tier::Standard),
    ("tax.submit", Tier::Standard),
    ("webhook.deliver", Tier::Standard),
    ("audio.transcribe", Tier::Batch),
    ("report.generate", Tier::Batch),
    ("data.export", Tier::Batch),
];

/// Job types whose dead-lettering needs immediate operator attention
pub const DEFAULT_CRITICAL_JOB_TYPES: &[&str] = &["payment.process", "invoice.generate", "tax.submit"];

/// Immutable tier and job-type registry
#[derive(Debug, Clone)]
pub struct TierRegistry {
    tiers: BTreeMap<Tier, TierConfig>,
    job_types: BTreeMap<String, Tier>,
    critical_job_types: BTreeSet<String>,
}

impl TierRegistry {
    /// Create a builder starting from the default tiers and job types
    pub fn builder() -> TierRegistryBuilder {
        TierRegistryBuilder::new()
    }

    /// Configuration of a tier
    pub fn get(&self, tier: Tier) -> &TierConfig {
        // Every tier is populated at build time
        &self.tiers[&tier]
    }

    /// Look up a tier configuration by name
    pub fn get_by_name(&self, name: &str) -> Result<&TierConfig> {
        let tier: Tier = name.parse()?;
        Ok(self.get(tier))
    }

    /// All tier configurations, highest priority first
    pub fn all(&self) -> impl Iterator<Item = &TierConfig> {
        self.tiers.values()
    }

    /// Default tier for a job type (standard for unknown types)
    pub fn tier_for(&self, job_type: &str) -> Tier {
        self.job_types.get(job_type).copied().unwrap_or(Tier::Standard)
    }

    /// Whether a job type has a registered tier mapping
    pub fn is_known(&self, job_type: &str) -> bool {
        self.job_types.contains_key(job_type)
    }

    /// Every known job type
    pub fn job_types(&self) -> impl Iterator<Item = &str> {
        self.job_types.keys().map(String::as_str)
    }

    /// Whether a job type is on the critical list
    pub fn is_critical(&self, job_type: &str) -> bool {
        self.critical_job_types.contains(job_type)
    }
}

impl Default for TierRegistry {
    fn default() -> Self {
        TierRegistryBuilder::new().build()
    }
}

/// Builder for [`TierRegistry`]
#[must_use = "builder does nothing until you call build()"]
pub struct TierRegistryBuilder {
    tiers: BTreeMap<Tier, TierConfig>,
    job_types: BTreeMap<String, Tier>,
    critical_job_types: BTreeSet<String>,
}

impl TierRegistryBuilder {
    pub fn new() -> Self {
        Self {
            tiers: Tier::ALL.iter().map(|t| (*t, TierConfig::default_for(*t))).collect(),
            job_types: DEFAULT_JOB_TYPES
                .iter()
                .map(|(name, tier)| (name.to_string(), *tier))
                .collect(),
            critical_job_types: DEFAULT_CRITICAL_JOB_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace a tier's configuration
    pub fn tier(mut self, config: TierConfig) -> Self {
        self.tiers.insert(config.tier, config);
        self
    }

    /// Adjust a tier's configuration in place
    pub fn configure(mut self, tier: Tier, f: impl FnOnce(&mut TierConfig)) -> Self {
        if let Some(config) = self.tiers.get_mut(&tier) {
            f(config);
        }
        self
    }

    /// Map a job type to its default tier
    pub fn job_type(mut self, job_type: impl Into<String>, tier: Tier) -> Self {
        self.job_types.insert(job_type.into(), tier);
        self
    }

    /// Add a job type to the critical list
    pub fn critical_job_type(mut self, job_type: impl Into<String>) -> Self {
        self.critical_job_types.insert(job_type.into());
        self
    }

    pub fn build(self) -> TierRegistry {
        TierRegistry {
            tiers: self.tiers,
            job_types: self.job_types,
            critical_job_types: self.critical_job_types,
        }
    }
}

impl Default for TierRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tiers_increase_sla_and_decrease_concurrency() {
        let registry = TierRegistry::default();
        let critical = registry.get(Tier::Critical);
        let standard = registry.get(Tier::Standard);
        let batch = registry.get(Tier::Batch);

        assert!(critical.sla < standard.sla && standard.sla < batch.sla);
        assert!(critical.concurrency > standard.concurrency && standard.concurrency > batch.concurrency);
        assert!(critical.priority < standard.priority && standard.priority < batch.priority);
    }

    #[test]
    fn test_tier_lookup_by_name() {
        let registry = TierRegistry::default();
        assert_eq!(registry.get_by_name("critical").unwrap().tier, Tier::Critical);
        assert_eq!(registry.get_by_name("BATCH").unwrap().tier, Tier::Batch);
        assert!(registry.get_by_name("express").is_err());
    }

    #[test]
    fn test_job_type_mapping() {
        let registry = TierRegistry::builder()
            .job_type("custom.thing", Tier::Batch)
            .build();

        assert_eq!(registry.tier_for("email.send"), Tier::Critical);
        assert_eq!(registry.tier_for("audio.transcribe"), Tier::Batch);
        assert_eq!(registry.tier_for("custom.thing"), Tier::Batch);
        assert_eq!(registry.tier_for("never.heard.of"), Tier::Standard);
        assert!(registry.is_critical("tax.submit"));
        assert!(!registry.is_critical("email.send"));
    }

    #[test]
    fn test_configure_overrides_tier() {
        let registry = TierRegistry::builder()
            .configure(Tier::Standard, |c| c.concurrency = 2)
            .build();
        assert_eq!(registry.get(Tier::Standard).concurrency, 2);
    }

    #[test]
    fn test_backoff_grows_exponentially_without_jitter() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay_with_jitter(base, 0, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay_with_jitter(base, 1, 0), Duration::from_secs(2));
        assert_eq!(backoff_delay_with_jitter(base, 3, 0), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_is_capped() {
        let base = Duration::from_secs(30);
        assert_eq!(backoff_delay_with_jitter(base, 10, 1_000), MAX_BACKOFF);
        assert_eq!(backoff_delay_with_jitter(base, 200, 0), MAX_BACKOFF);
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..100 {
            let delay = backoff_delay(base, 1);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(1_200));
        }
    }
}
