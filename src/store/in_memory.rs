//! In-memory queue store implementation
//!
//! This implementation keeps all queue state in process memory and is suitable
//! for development, testing, and single-instance deployments.

use crate::error::Result;
use crate::traits::store::QueueStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, i64>),
    ZSet(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
}

impl Inner {
    /// Look up a live entry, evicting it if expired
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn zset(&mut self, key: &str) -> Option<&mut HashMap<String, f64>> {
        match self.live(key) {
            Some(Entry { value: Value::ZSet(set), .. }) => Some(set),
            _ => None,
        }
    }

    fn zset_or_insert(&mut self, key: &str) -> &mut HashMap<String, f64> {
        if !matches!(self.live(key), Some(Entry { value: Value::ZSet(_), .. })) {
            self.entries.insert(
                key.to_string(),
                Entry { value: Value::ZSet(HashMap::new()), expires_at: None },
            );
        }
        match self.entries.get_mut(key) {
            Some(Entry { value: Value::ZSet(set), .. }) => set,
            _ => unreachable!("zset entry was just inserted"),
        }
    }

    /// Members sorted by (score, member), like Redis
    fn sorted(&mut self, key: &str) -> Vec<(String, f64)> {
        let mut members: Vec<(String, f64)> = match self.zset(key) {
            Some(set) => set.iter().map(|(m, s)| (m.clone(), *s)).collect(),
            None => Vec::new(),
        };
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        members
    }

    fn drop_if_empty(&mut self, key: &str) {
        if self.zset(key).is_some_and(|set| set.is_empty()) {
            self.entries.remove(key);
        }
    }
}

/// Resolve inclusive rank bounds the way Redis does
fn rank_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn expiry(ttl: Option<Duration>) -> Option<Instant> {
    ttl.map(|d| Instant::now() + d)
}

/// In-memory queue store
///
/// All operations run under a single lock, which makes `zpop_by_score` and
/// `set_nx` atomic across concurrent workers in the same process.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
    health_status: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            health_status: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mark the store healthy or unhealthy (used to simulate outages in tests)
    pub fn set_healthy(&self, healthy: bool) {
        self.health_status.store(healthy, Ordering::Release);
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.entries.retain(|_, e| !e.is_expired(now));
        inner.entries.len()
    }

    /// Whether the store holds no live keys
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Live keys starting with `prefix`
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.entries.retain(|_, e| !e.is_expired(now));
        let mut keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock().await;
        Ok(match inner.live(key) {
            Some(Entry { value: Value::Str(s), .. }) => Some(s.clone()),
            _ => None,
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.entries.insert(
            key.to_string(),
            Entry { value: Value::Str(value.to_string()), expires_at: expiry(ttl) },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.live(key).is_some() {
            return Ok(false);
        }
        inner.entries.insert(
            key.to_string(),
            Entry { value: Value::Str(value.to_string()), expires_at: expiry(Some(ttl)) },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.entries.remove(key);
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let matches = matches!(
            inner.live(key),
            Some(Entry { value: Value::Str(s), .. }) if s.as_str() == expected
        );
        if matches {
            inner.entries.remove(key);
        }
        Ok(matches)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner.live(key).is_some())
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64> {
        let mut inner = self.inner.lock().await;
        let current = match inner.live(key) {
            Some(Entry { value: Value::Str(s), .. }) => s.parse::<i64>().unwrap_or(0),
            _ => 0,
        };
        let next = current + 1;
        let expires_at = match ttl {
            Some(_) => expiry(ttl),
            None => inner.live(key).and_then(|e| e.expires_at),
        };
        inner.entries.insert(
            key.to_string(),
            Entry { value: Value::Str(next.to_string()), expires_at },
        );
        Ok(next)
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64, ttl: Option<Duration>) -> Result<i64> {
        let mut inner = self.inner.lock().await;
        if !matches!(inner.live(key), Some(Entry { value: Value::Hash(_), .. })) {
            inner.entries.insert(
                key.to_string(),
                Entry { value: Value::Hash(HashMap::new()), expires_at: None },
            );
        }
        let Some(entry) = inner.entries.get_mut(key) else {
            return Ok(0);
        };
        if ttl.is_some() {
            entry.expires_at = expiry(ttl);
        }
        let Value::Hash(hash) = &mut entry.value else {
            return Ok(0);
        };
        let value = hash.entry(field.to_string()).or_insert(0);
        *value += delta;
        Ok(*value)
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, i64>> {
        let mut inner = self.inner.lock().await;
        Ok(match inner.live(key) {
            Some(Entry { value: Value::Hash(h), .. }) => h.clone(),
            _ => HashMap::new(),
        })
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.zset_or_insert(key).insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let removed = inner.zset(key).is_some_and(|set| set.remove(member).is_some());
        inner.drop_if_empty(key);
        Ok(removed)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.zset(key).and_then(|set| set.get(member).copied()))
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> Result<Vec<(String, f64)>> {
        let mut inner = self.inner.lock().await;
        let matching = inner
            .sorted(key)
            .into_iter()
            .filter(|(_, s)| *s >= min && *s <= max);
        Ok(match limit {
            Some(n) => matching.take(n).collect(),
            None => matching.collect(),
        })
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize, rev: bool) -> Result<Vec<(String, f64)>> {
        let mut inner = self.inner.lock().await;
        let mut members = inner.sorted(key);
        if rev {
            members.reverse();
        }
        Ok(match rank_bounds(members.len(), start, stop) {
            Some((from, to)) => members[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn zpop_by_score(&self, key: &str, max: f64, limit: usize) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        let ready: Vec<String> = inner
            .sorted(key)
            .into_iter()
            .filter(|(_, s)| *s <= max)
            .take(limit)
            .map(|(m, _)| m)
            .collect();
        if let Some(set) = inner.zset(key) {
            for member in &ready {
                set.remove(member);
            }
        }
        inner.drop_if_empty(key);
        Ok(ready)
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let removed = match inner.zset(key) {
            Some(set) => {
                let before = set.len();
                set.retain(|_, s| *s < min || *s > max);
                (before - set.len()) as u64
            }
            None => 0,
        };
        inner.drop_if_empty(key);
        Ok(removed)
    }

    async fn zrem_range_by_rank(&self, key: &str, start: isize, stop: isize) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let members = inner.sorted(key);
        let Some((from, to)) = rank_bounds(members.len(), start, stop) else {
            return Ok(0);
        };
        if let Some(set) = inner.zset(key) {
            for (member, _) in &members[from..=to] {
                set.remove(member);
            }
        }
        inner.drop_if_empty(key);
        Ok((to - from + 1) as u64)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        Ok(inner.zset(key).map_or(0, |set| set.len() as u64))
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .zset(key)
            .map_or(0, |set| set.values().filter(|s| **s >= min && **s <= max).count() as u64))
    }

    async fn ping(&self) -> bool {
        self.health_status.load(Ordering::Acquire)
    }

    fn is_healthy(&self) -> bool {
        self.health_status.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = InMemoryStore::new();
        store.set("short", "v", Some(Duration::from_millis(20))).await.unwrap();
        assert!(store.exists("short").await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("short").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_nx() {
        let store = InMemoryStore::new();
        assert!(store.set_nx("lock", "a", Duration::from_secs(5)).await.unwrap());
        assert!(!store.set_nx("lock", "b", Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_delete_if_equals() {
        let store = InMemoryStore::new();
        store.set("lock", "token-1", None).await.unwrap();

        assert!(!store.delete_if_equals("lock", "token-2").await.unwrap());
        assert!(store.exists("lock").await.unwrap());

        assert!(store.delete_if_equals("lock", "token-1").await.unwrap());
        assert!(!store.exists("lock").await.unwrap());
    }

    #[tokio::test]
    async fn test_counters_and_hashes() {
        let store = InMemoryStore::new();
        assert_eq!(store.incr("c", None).await.unwrap(), 1);
        assert_eq!(store.incr("c", None).await.unwrap(), 2);

        store.hincr_by("h", "count", 3, None).await.unwrap();
        store.hincr_by("h", "count", 2, None).await.unwrap();
        store.hincr_by("h", "sum", 100, None).await.unwrap();
        let hash = store.hget_all("h").await.unwrap();
        assert_eq!(hash.get("count"), Some(&5));
        assert_eq!(hash.get("sum"), Some(&100));
    }

    #[tokio::test]
    async fn test_zset_ordering_and_ranges() {
        let store = InMemoryStore::new();
        store.zadd("z", "c", 30.0).await.unwrap();
        store.zadd("z", "a", 10.0).await.unwrap();
        store.zadd("z", "b", 20.0).await.unwrap();

        let all = store.zrange("z", 0, -1, false).await.unwrap();
        let names: Vec<&str> = all.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let newest = store.zrange("z", 0, 0, true).await.unwrap();
        assert_eq!(newest[0].0, "c");

        let mid = store.zrange_by_score("z", 15.0, 30.0, None).await.unwrap();
        assert_eq!(mid.len(), 2);
        assert_eq!(store.zcount("z", 0.0, 20.0).await.unwrap(), 2);
        assert_eq!(store.zscore("z", "b").await.unwrap(), Some(20.0));
    }

    #[tokio::test]
    async fn test_zpop_by_score_removes_members() {
        let store = InMemoryStore::new();
        for (i, member) in ["a", "b", "c", "d"].iter().enumerate() {
            store.zadd("q", member, i as f64).await.unwrap();
        }

        let popped = store.zpop_by_score("q", 2.0, 2).await.unwrap();
        assert_eq!(popped, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.zcard("q").await.unwrap(), 2);

        let popped = store.zpop_by_score("q", 2.0, 10).await.unwrap();
        assert_eq!(popped, vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_zpop_never_duplicates() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..100 {
            store.zadd("q", &format!("job-{}", i), i as f64).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                loop {
                    let batch = store.zpop_by_score("q", f64::MAX, 3).await.unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    got.extend(batch);
                }
                got
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 100);
        assert_eq!(unique.len(), 100);
    }

    #[tokio::test]
    async fn test_zrem_ranges() {
        let store = InMemoryStore::new();
        for i in 0..10 {
            store.zadd("z", &i.to_string(), i as f64).await.unwrap();
        }

        assert_eq!(store.zrem_range_by_score("z", f64::NEG_INFINITY, 2.0).await.unwrap(), 3);
        assert_eq!(store.zcard("z").await.unwrap(), 7);

        // Oldest two by rank
        assert_eq!(store.zrem_range_by_rank("z", 0, 1).await.unwrap(), 2);
        let first = store.zrange("z", 0, 0, false).await.unwrap();
        assert_eq!(first[0].0, "5");
    }
}
