//! Test fixtures for tiers and payload data

use crate::jobs::{Tier, TierConfig, TierRegistry};
use std::time::Duration;
use uuid::Uuid;

/// A tier tuned for tests: millisecond retries, no jitter and a short timeout
pub fn fast_tier(tier: Tier) -> TierConfig {
    let mut config = TierConfig::default_for(tier);
    config.base_retry_delay = Duration::from_millis(5);
    config.max_jitter = Duration::ZERO;
    config.timeout = Duration::from_millis(500);
    config.sla = Duration::from_secs(5);
    config
}

/// Default job-type mapping with every tier replaced by [`fast_tier`]
pub fn fast_tiers() -> TierRegistry {
    Tier::ALL
        .into_iter()
        .fold(TierRegistry::builder(), |builder, tier| builder.tier(fast_tier(tier)))
        .build()
}

/// Helper functions for generating fake payload data
pub mod fake {
    use super::*;

    /// Generate a fake email address
    pub fn email() -> String {
        format!("test-{}@example.com", Uuid::new_v4().simple())
    }

    /// Generate a fake UUID as a string
    pub fn uuid() -> String {
        Uuid::new_v4().to_string()
    }

    /// Generate a fake phone number in E.164 format
    pub fn phone() -> String {
        format!("+5511{:09}", fastrand::u32(0..999_999_999))
    }

    /// Generate a fake invoice number
    pub fn invoice_id() -> String {
        format!("INV-{:06}", fastrand::u32(0..999_999))
    }

    /// Generate a fake idempotency key for a job type
    pub fn idempotency_key(job_type: &str) -> String {
        format!("{}:{}", job_type, &Uuid::new_v4().simple().to_string()[..12])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_tiers_keep_job_type_mapping() {
        let tiers = fast_tiers();
        assert_eq!(tiers.tier_for("email.send"), Tier::Critical);
        for config in tiers.all() {
            assert_eq!(config.max_jitter, Duration::ZERO);
            assert_eq!(config.base_retry_delay, Duration::from_millis(5));
        }
        // Concurrency is untouched
        assert_eq!(tiers.get(Tier::Batch).concurrency, TierConfig::batch().concurrency);
    }

    #[test]
    fn test_fake_email() {
        let email = fake::email();
        assert!(email.contains("@example.com"));
        assert!(email.starts_with("test-"));
    }

    #[test]
    fn test_fake_values_are_unique() {
        assert_ne!(fake::uuid(), fake::uuid());
        assert_ne!(fake::idempotency_key("email.send"), fake::idempotency_key("email.send"));
        assert!(fake::phone().starts_with("+55"));
        assert!(fake::invoice_id().starts_with("INV-"));
    }
}
