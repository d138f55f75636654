//! Backing store trait for queue state
//!
//! The queue engine keeps every piece of shared state (job records, ordered
//! sets, locks, metrics) behind this trait, so any store offering atomic
//! ordered sets, TTL key-values and counters can be swapped in.

use crate::error::{QueueError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Shared store contract consumed by the dispatcher, workers, dead-letter
/// manager and metrics.
///
/// Scores are plain `f64` values; the engine uses epoch milliseconds.
#[async_trait]
#[allow(async_fn_in_trait)] // async_trait macro handles Send/Sync bounds
pub trait QueueStore: Send + Sync {
    /// Get a string value. Returns `Ok(None)` if missing or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a string value with an optional TTL
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Set a value only if the key does not exist.
    ///
    /// Returns `true` when the value was written.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete a key of any type
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete a key only if its current value equals `expected`
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool>;

    /// Whether a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Increment an integer counter, refreshing its TTL. Returns the new value.
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64>;

    /// Increment a hash field by `delta`, refreshing the hash TTL
    async fn hincr_by(&self, key: &str, field: &str, delta: i64, ttl: Option<Duration>) -> Result<i64>;

    /// Read every field of a hash
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, i64>>;

    /// Add or update a member in an ordered set
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;

    /// Remove a member. Returns `true` if it was present.
    async fn zrem(&self, key: &str, member: &str) -> Result<bool>;

    /// Score of a member
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>>;

    /// Members with `min <= score <= max`, ascending, optionally limited
    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> Result<Vec<(String, f64)>>;

    /// Members by rank (inclusive, negative indexes count from the end)
    async fn zrange(&self, key: &str, start: isize, stop: isize, rev: bool) -> Result<Vec<(String, f64)>>;

    /// Atomically fetch and remove up to `limit` members with score <= `max`
    ///
    /// Two concurrent callers never receive the same member.
    async fn zpop_by_score(&self, key: &str, max: f64, limit: usize) -> Result<Vec<String>>;

    /// Remove members with `min <= score <= max`. Returns the count removed.
    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64>;

    /// Remove members by rank (inclusive). Returns the count removed.
    async fn zrem_range_by_rank(&self, key: &str, start: isize, stop: isize) -> Result<u64>;

    /// Number of members
    async fn zcard(&self, key: &str) -> Result<u64>;

    /// Number of members with `min <= score <= max`
    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64>;

    /// Round-trip to the store and update the cached health flag
    async fn ping(&self) -> bool;

    /// Cached health status
    fn is_healthy(&self) -> bool;
}

/// Get and deserialize a JSON value
pub async fn get_json<T>(store: &dyn QueueStore, key: &str) -> Result<Option<T>>
where
    T: serde::de::DeserializeOwned,
{
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| QueueError::Serialization(format!("Failed to deserialize {}: {}", key, e))),
        None => Ok(None),
    }
}

/// Serialize and set a JSON value
pub async fn set_json<T>(store: &dyn QueueStore, key: &str, value: &T, ttl: Option<Duration>) -> Result<()>
where
    T: serde::Serialize + Sync,
{
    let raw = serde_json::to_string(value)
        .map_err(|e| QueueError::Serialization(format!("Failed to serialize {}: {}", key, e)))?;
    store.set(key, &raw, ttl).await
}
