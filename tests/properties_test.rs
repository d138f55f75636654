use proptest::prelude::*;
use std::time::Duration;
use tidequeue::jobs::{MAX_BACKOFF, MAX_JITTER_MS, backoff_delay, backoff_delay_with_jitter};
use tidequeue::{ErrorCategory, classify_error, normalize_error_message};

proptest! {
    #[test]
    fn backoff_never_exceeds_cap(base_ms in 0u64..120_000, attempt in 0u32..64) {
        let delay = backoff_delay(Duration::from_millis(base_ms), attempt);
        prop_assert!(delay <= MAX_BACKOFF);
    }

    #[test]
    fn backoff_is_monotonic_in_attempts(base_ms in 1u64..10_000, attempt in 0u32..20, jitter in 0u64..=MAX_JITTER_MS) {
        let base = Duration::from_millis(base_ms);
        let now = backoff_delay_with_jitter(base, attempt, jitter);
        let next = backoff_delay_with_jitter(base, attempt + 1, jitter);
        prop_assert!(next >= now);
    }

    #[test]
    fn backoff_jitter_is_bounded(base_ms in 0u64..1_000, attempt in 0u32..4, jitter in 0u64..5_000) {
        let base = Duration::from_millis(base_ms);
        let without = backoff_delay_with_jitter(base, attempt, 0);
        let with = backoff_delay_with_jitter(base, attempt, jitter);
        prop_assert!(with - without <= Duration::from_millis(MAX_JITTER_MS));
    }

    #[test]
    fn classification_ignores_case(message in "[a-zA-Z0-9 :._-]{0,60}") {
        prop_assert_eq!(classify_error(&message), classify_error(&message.to_uppercase()));
    }

    #[test]
    fn normalization_is_idempotent(message in "[a-zA-Z0-9 :./@-]{0,80}") {
        let once = normalize_error_message(&message);
        prop_assert_eq!(normalize_error_message(&once), once.clone());
    }

    #[test]
    fn timeouts_group_regardless_of_numbers(a in 1u32..100_000, b in 1u32..100_000) {
        let first = format!("request {} timed out after {}ms", a, b);
        let second = format!("request {} timed out after {}ms", b, a);
        prop_assert_eq!(normalize_error_message(&first), normalize_error_message(&second));
        prop_assert_eq!(classify_error(&first), ErrorCategory::Timeout);
    }
}
