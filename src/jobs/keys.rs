//! Deterministic key naming for store-resident structures
//!
//! Every key lives under a configurable prefix and is namespaced by tier or
//! job id, so unrelated structures never collide.

use crate::jobs::tier::Tier;

/// Event streams kept in the metrics sliding window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricEvent {
    Enqueued,
    Completed,
    Failed,
    WaitTime,
    ProcessingTime,
    SlaHit,
    SlaMiss,
}

impl MetricEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricEvent::Enqueued => "enqueued",
            MetricEvent::Completed => "completed",
            MetricEvent::Failed => "failed",
            MetricEvent::WaitTime => "wait",
            MetricEvent::ProcessingTime => "processing",
            MetricEvent::SlaHit => "sla_hit",
            MetricEvent::SlaMiss => "sla_miss",
        }
    }
}

/// Key builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScheme {
    prefix: String,
}

impl KeyScheme {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Ordered set of ready/delayed job ids for a tier
    pub fn queue(&self, tier: Tier) -> String {
        format!("{}:queue:{}", self.prefix, tier)
    }

    /// Ordered set of in-flight job ids scored by lease deadline
    pub fn processing(&self, tier: Tier) -> String {
        format!("{}:processing:{}", self.prefix, tier)
    }

    /// Full job record
    pub fn job(&self, job_id: &str) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    /// Status-only record
    pub fn status(&self, job_id: &str) -> String {
        format!("{}:status:{}", self.prefix, job_id)
    }

    pub fn idempotency(&self, key: &str) -> String {
        format!("{}:idempotency:{}", self.prefix, key)
    }

    /// Ordered set of dead job ids for a tier, scored by failure time
    pub fn dead_letter(&self, tier: Tier) -> String {
        format!("{}:dlq:{}", self.prefix, tier)
    }

    pub fn dead_letter_meta(&self, job_id: &str) -> String {
        format!("{}:dlq:meta:{}", self.prefix, job_id)
    }

    pub fn auto_retry(&self, job_id: &str) -> String {
        format!("{}:dlq:auto_retry:{}", self.prefix, job_id)
    }

    /// Ordered set of parked job ids scored by when their automatic retry is due
    pub fn auto_retry_schedule(&self, tier: Tier) -> String {
        format!("{}:dlq_retry:{}", self.prefix, tier)
    }

    pub fn lock(&self, job_id: &str) -> String {
        format!("{}:lock:{}", self.prefix, job_id)
    }

    /// Sliding-window event set
    pub fn metric(&self, tier: Tier, event: MetricEvent) -> String {
        format!("{}:metrics:{}:{}", self.prefix, tier, event.as_str())
    }

    /// Historical bucket hash
    pub fn history(&self, tier: Tier, width_secs: u64, bucket_start: i64) -> String {
        format!("{}:metrics:{}:history:{}:{}", self.prefix, tier, width_secs, bucket_start)
    }
}

impl Default for KeyScheme {
    fn default() -> Self {
        Self::new("tidequeue")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_keys_are_namespaced() {
        let keys = KeyScheme::new("app");
        assert_eq!(keys.queue(Tier::Critical), "app:queue:critical");
        assert_eq!(keys.job("abc"), "app:job:abc");
        assert_eq!(keys.status("abc"), "app:status:abc");
        assert_eq!(keys.dead_letter(Tier::Batch), "app:dlq:batch");
        assert_eq!(keys.metric(Tier::Standard, MetricEvent::SlaMiss), "app:metrics:standard:sla_miss");
        assert_eq!(keys.history(Tier::Standard, 60, 1_700_000_040), "app:metrics:standard:history:60:1700000040");
    }

    #[test]
    fn test_keys_never_collide() {
        let keys = KeyScheme::default();
        let id = "job-1";
        let mut all = HashSet::new();
        for tier in Tier::ALL {
            assert!(all.insert(keys.queue(tier)));
            assert!(all.insert(keys.processing(tier)));
            assert!(all.insert(keys.dead_letter(tier)));
            assert!(all.insert(keys.auto_retry_schedule(tier)));
            assert!(all.insert(keys.metric(tier, MetricEvent::Enqueued)));
        }
        for key in [
            keys.job(id),
            keys.status(id),
            keys.idempotency(id),
            keys.dead_letter_meta(id),
            keys.auto_retry(id),
            keys.lock(id),
        ] {
            assert!(all.insert(key));
        }
    }
}
