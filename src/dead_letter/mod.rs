//! Dead-letter handling.
//!
//! Jobs that exhaust their retries are classified, parked per tier with their
//! failure metadata, and kept until an operator (or a bounded automatic
//! retry) requeues them, discards them, or retention cleanup removes them.

mod analysis;
mod classify;
mod hooks;
mod manager;

pub use analysis::{
    DeadLetterHealth, DeadLetterStats, ErrorPattern, HealthStatus, assess_health, compute_stats,
    find_error_patterns,
};
pub use classify::{ErrorCategory, SuggestedAction, classify_error, normalize_error_message, suggested_action};
pub use hooks::{DeadLetterHooks, NoopHooks};
pub use manager::{DeadLetterEntry, DeadLetterManager, RetryFilter};
