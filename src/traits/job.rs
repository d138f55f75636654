//! Typed job payloads
//!
//! A payload type pins its job type (and optionally its tier and
//! idempotency key) so producers cannot submit it under the wrong name.

use crate::jobs::Tier;
use serde::Serialize;
use std::fmt::Debug;

/// A serializable payload bound to one job type
pub trait JobPayload: Serialize + Send + Sync + Debug {
    /// Job type this payload is submitted as (e.g., "email.send")
    const JOB_TYPE: &'static str;

    /// Tier override; `None` uses the job type's default tier
    fn tier(&self) -> Option<Tier> {
        None
    }

    /// Deduplication token derived from the payload, if any
    fn idempotency_key(&self) -> Option<String> {
        None
    }
}
