//! Redis-backed queue store implementation
//!
//! Ordered sets map to Redis sorted sets, TTL values to `SET ... PX`, and the
//! two compound operations (fetch-and-remove by score, compare-and-delete)
//! run as Lua scripts so they stay atomic across worker processes.

use crate::error::{QueueError, Result};
use crate::traits::store::QueueStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Pop up to ARGV[2] members with score <= ARGV[1]
const ZPOP_BY_SCORE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
if #ids > 0 then
    redis.call('ZREM', KEYS[1], unpack(ids))
end
return ids
"#;

/// Delete KEYS[1] only if it still holds ARGV[1]
const DELETE_IF_EQUALS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis-backed queue store
///
/// Uses Redis data structures directly:
/// - strings with `PX` expiry for job records, status records, locks, idempotency keys
/// - sorted sets for tier queues, processing leases, dead-letter sets, metric windows
/// - hashes for historical metric buckets
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    zpop_script: Arc<redis::Script>,
    delete_if_equals_script: Arc<redis::Script>,
    /// Cached health status (updated by ping operations)
    health_status: Arc<AtomicBool>,
}

impl RedisStore {
    /// Create a new Redis store
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| QueueError::store(format!("Failed to create Redis client: {}", e)))?;

        Ok(Self {
            client,
            zpop_script: Arc::new(redis::Script::new(ZPOP_BY_SCORE_SCRIPT)),
            delete_if_equals_script: Arc::new(redis::Script::new(DELETE_IF_EQUALS_SCRIPT)),
            health_status: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Get a Redis connection
    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                self.health_status.store(false, Ordering::Release);
                QueueError::store(format!("Failed to get Redis connection: {}", e))
            })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

fn redis_err(op: &str) -> impl FnOnce(redis::RedisError) -> QueueError + '_ {
    move |e| QueueError::store(format!("Redis {} failed: {}", op, e))
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(redis_err("GET"))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(redis_err("SET"))?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(redis_err("SET NX"))?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(redis_err("DEL"))?;
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let deleted: i64 = self
            .delete_if_equals_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_err("compare-and-delete"))?;
        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let count: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(redis_err("EXISTS"))?;
        Ok(count > 0)
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64> {
        let mut conn = self.get_connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("INCR").arg(key);
        if let Some(ttl) = ttl {
            pipe.cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)).ignore();
        }
        let (value,): (i64,) = pipe.query_async(&mut conn).await.map_err(redis_err("INCR"))?;
        Ok(value)
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64, ttl: Option<Duration>) -> Result<i64> {
        let mut conn = self.get_connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("HINCRBY").arg(key).arg(field).arg(delta);
        if let Some(ttl) = ttl {
            pipe.cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)).ignore();
        }
        let (value,): (i64,) = pipe.query_async(&mut conn).await.map_err(redis_err("HINCRBY"))?;
        Ok(value)
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, i64>> {
        let mut conn = self.get_connection().await?;
        let values: HashMap<String, i64> = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(redis_err("HGETALL"))?;
        Ok(values)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let _: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(redis_err("ZADD"))?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let removed: i64 = redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(redis_err("ZREM"))?;
        Ok(removed > 0)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let mut conn = self.get_connection().await?;
        let score: Option<f64> = redis::cmd("ZSCORE")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(redis_err("ZSCORE"))?;
        Ok(score)
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> Result<Vec<(String, f64)>> {
        let mut conn = self.get_connection().await?;
        let mut cmd = redis::cmd("ZRANGEBYSCORE");
        cmd.arg(key).arg(score_arg(min)).arg(score_arg(max)).arg("WITHSCORES");
        if let Some(limit) = limit {
            cmd.arg("LIMIT").arg(0).arg(limit);
        }
        let members: Vec<(String, f64)> = cmd
            .query_async(&mut conn)
            .await
            .map_err(redis_err("ZRANGEBYSCORE"))?;
        Ok(members)
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize, rev: bool) -> Result<Vec<(String, f64)>> {
        let mut conn = self.get_connection().await?;
        let command = if rev { "ZREVRANGE" } else { "ZRANGE" };
        let members: Vec<(String, f64)> = redis::cmd(command)
            .arg(key)
            .arg(start)
            .arg(stop)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(redis_err(command))?;
        Ok(members)
    }

    async fn zpop_by_score(&self, key: &str, max: f64, limit: usize) -> Result<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let ids: Vec<String> = self
            .zpop_script
            .key(key)
            .arg(score_arg(max))
            .arg(limit)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_err("fetch-and-remove"))?;
        Ok(ids)
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let mut conn = self.get_connection().await?;
        let removed: u64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(score_arg(min))
            .arg(score_arg(max))
            .query_async(&mut conn)
            .await
            .map_err(redis_err("ZREMRANGEBYSCORE"))?;
        Ok(removed)
    }

    async fn zrem_range_by_rank(&self, key: &str, start: isize, stop: isize) -> Result<u64> {
        let mut conn = self.get_connection().await?;
        let removed: u64 = redis::cmd("ZREMRANGEBYRANK")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .map_err(redis_err("ZREMRANGEBYRANK"))?;
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.get_connection().await?;
        let count: u64 = redis::cmd("ZCARD")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(redis_err("ZCARD"))?;
        Ok(count)
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let mut conn = self.get_connection().await?;
        let count: u64 = redis::cmd("ZCOUNT")
            .arg(key)
            .arg(score_arg(min))
            .arg(score_arg(max))
            .query_async(&mut conn)
            .await
            .map_err(redis_err("ZCOUNT"))?;
        Ok(count)
    }

    async fn ping(&self) -> bool {
        match self.get_connection().await {
            Ok(mut conn) => {
                let result: redis::RedisResult<String> = redis::cmd("PING")
                    .query_async(&mut conn)
                    .await;
                let healthy = result.is_ok();
                self.health_status.store(healthy, Ordering::Release);
                healthy
            }
            Err(e) => {
                tracing::warn!("Redis queue store ping failed: {}", e);
                self.health_status.store(false, Ordering::Release);
                false
            }
        }
    }

    fn is_healthy(&self) -> bool {
        // Cached status from the last ping() or failed connection attempt
        self.health_status.load(Ordering::Acquire)
    }
}

/// Render a score bound, mapping infinities to Redis' `-inf`/`+inf`
fn score_arg(score: f64) -> String {
    if score == f64::INFINITY || score == f64::MAX {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY || score == f64::MIN {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}
