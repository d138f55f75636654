//! Dead-letter persistence, recovery and cleanup

use crate::config::DeadLetterConfig;
use crate::dead_letter::analysis::{
    DeadLetterHealth, DeadLetterStats, ErrorPattern, assess_health, compute_stats, find_error_patterns,
};
use crate::dead_letter::hooks::{DeadLetterHooks, NoopHooks, run_hook};
use crate::dead_letter::{ErrorCategory, SuggestedAction, classify_error, suggested_action};
use crate::error::{QueueError, Result};
use crate::jobs::{Job, JobRepository, JobStatus, Tier, TierRegistry};
use crate::metrics::QueueMetrics;
use crate::traits::store::{get_json, set_json};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// A dead job together with its failure metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job: Job,
    pub error: String,
    pub category: ErrorCategory,
    pub retryable: bool,
    pub suggested_action: SuggestedAction,
    pub failed_at: DateTime<Utc>,
    /// Automatic retries already spent on this job
    pub auto_retry_count: u32,
    /// When a pending automatic retry will requeue the job
    pub auto_retry_at: Option<DateTime<Utc>>,
}

/// Metadata stored next to the dead-letter set member
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeadLetterMeta {
    failed_at: DateTime<Utc>,
    category: ErrorCategory,
    error: String,
    attempts: u32,
    retryable: bool,
    suggested_action: SuggestedAction,
    job_type: String,
    tier: Tier,
    #[serde(default)]
    auto_retry_at: Option<DateTime<Utc>>,
}

/// Selects dead-letter entries for a bulk retry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryFilter {
    /// Only these job types
    pub job_types: Option<Vec<String>>,
    /// Only these error categories
    pub error_categories: Option<Vec<ErrorCategory>>,
    /// Only entries that failed at most this long ago
    #[serde(skip)]
    pub max_age: Option<Duration>,
}

impl RetryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_types<I, S>(mut self, job_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.job_types = Some(job_types.into_iter().map(Into::into).collect());
        self
    }

    pub fn error_categories(mut self, categories: impl IntoIterator<Item = ErrorCategory>) -> Self {
        self.error_categories = Some(categories.into_iter().collect());
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn matches(&self, entry: &DeadLetterEntry, now: DateTime<Utc>) -> bool {
        if let Some(types) = &self.job_types {
            if !types.iter().any(|t| t == &entry.job.job_type) {
                return false;
            }
        }

        if let Some(categories) = &self.error_categories {
            if !categories.contains(&entry.category) {
                return false;
            }
        }

        if let Some(max_age) = self.max_age {
            let age = (now - entry.failed_at).to_std().unwrap_or_default();
            if age > max_age {
                return false;
            }
        }

        true
    }
}

/// Due automatic retries requeued per tier per sweep
const AUTO_RETRY_BATCH: usize = 100;

/// Parks exhausted jobs and manages their recovery
#[derive(Clone)]
pub struct DeadLetterManager {
    repo: JobRepository,
    tiers: TierRegistry,
    config: DeadLetterConfig,
    metrics: QueueMetrics,
    hooks: Arc<dyn DeadLetterHooks>,
}

impl DeadLetterManager {
    pub fn new(repo: JobRepository, tiers: TierRegistry, config: DeadLetterConfig, metrics: QueueMetrics) -> Self {
        Self {
            repo,
            tiers,
            config,
            metrics,
            hooks: Arc::new(NoopHooks),
        }
    }

    /// Replace the operator hooks
    pub fn with_hooks(mut self, hooks: Arc<dyn DeadLetterHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(&self) -> &DeadLetterConfig {
        &self.config
    }

    /// Park a job that exhausted its retries
    ///
    /// A typed `category` from the handler wins over text classification.
    pub async fn move_to_dead_letter(
        &self,
        mut job: Job,
        error: &str,
        category: Option<ErrorCategory>,
    ) -> Result<DeadLetterEntry> {
        let category = category.unwrap_or_else(|| classify_error(error));
        let is_critical = self.tiers.is_critical(&job.job_type);
        let action = suggested_action(category, is_critical);
        let now = Utc::now();

        job.status = JobStatus::Dead;
        job.error = Some(error.to_string());
        job.error_category = Some(category);
        job.updated_at = now;
        job.completed_at = Some(now);
        job.lease_token = None;
        self.repo.save(&job).await?;

        let auto_retry_at = self.reserve_auto_retry(&job, category, now).await;
        let meta = DeadLetterMeta {
            failed_at: now,
            category,
            error: error.to_string(),
            attempts: job.attempts,
            retryable: category.is_retryable(),
            suggested_action: action,
            job_type: job.job_type.clone(),
            tier: job.tier,
            auto_retry_at,
        };
        let store = self.repo.store();
        let keys = self.repo.keys();
        set_json(
            store.as_ref(),
            &keys.dead_letter_meta(&job.id),
            &meta,
            Some(self.config.retention()),
        )
        .await?;

        let dlq_key = keys.dead_letter(job.tier);
        let previous_size = store.zcard(&dlq_key).await?;
        store.zadd(&dlq_key, &job.id, now.timestamp_millis() as f64).await?;
        let size = store.zcard(&dlq_key).await?;

        if let Some(due) = auto_retry_at {
            store
                .zadd(&keys.auto_retry_schedule(job.tier), &job.id, due.timestamp_millis() as f64)
                .await?;
        }

        if let Err(e) = self.metrics.record_failed(job.tier).await {
            tracing::warn!(tier = %job.tier, error = %e, "Failed to record failure metric");
        }

        let auto_retry_count = self.auto_retry_count(&job.id).await?;
        let entry = DeadLetterEntry {
            job,
            error: error.to_string(),
            category,
            retryable: category.is_retryable(),
            suggested_action: action,
            failed_at: now,
            auto_retry_count,
            auto_retry_at,
        };

        tracing::warn!(
            job_id = %entry.job.id,
            job_type = %entry.job.job_type,
            tier = %entry.job.tier,
            category = %category,
            attempts = entry.job.attempts,
            error = %error,
            "Job moved to dead-letter queue"
        );

        run_hook("on_job_dead", self.hooks.on_job_dead(&entry)).await;

        if is_critical {
            run_hook("on_critical_failure", self.hooks.on_critical_failure(&entry)).await;
        }

        let threshold = self.tiers.get(entry.job.tier).dead_letter_threshold;
        if previous_size <= threshold && size > threshold {
            tracing::error!(tier = %entry.job.tier, size, threshold, "Dead-letter threshold exceeded");
            run_hook(
                "on_threshold_exceeded",
                self.hooks.on_threshold_exceeded(entry.job.tier, size, threshold),
            )
            .await;
        }

        if let Some(due) = auto_retry_at {
            tracing::info!(
                job_id = %entry.job.id,
                category = %category,
                due = %due,
                "Automatic dead-letter retry scheduled"
            );
        }

        Ok(entry)
    }

    /// Spend one auto-retry budget unit on an eligible failure
    ///
    /// Returns when the job becomes due for requeueing. The entry stays
    /// parked until then.
    async fn reserve_auto_retry(&self, job: &Job, category: ErrorCategory, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.config.auto_retry_categories.contains(&category)
            || self.auto_retry_count(&job.id).await.unwrap_or(0) >= self.config.auto_retry_max
        {
            return None;
        }

        let key = self.repo.keys().auto_retry(&job.id);
        match self.repo.store().incr(&key, Some(self.config.retention())).await {
            Ok(n) if n <= i64::from(self.config.auto_retry_max) => {
                let delay = chrono::Duration::from_std(self.config.auto_retry_delay())
                    .unwrap_or_else(|_| chrono::Duration::zero());
                Some(now + delay)
            }
            Ok(_) => None,
            Err(e) if e.is_store() => {
                tracing::warn!(job_id = %job.id, error = %e, "Store unavailable, auto-retry not reserved");
                None
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to reserve auto-retry");
                None
            }
        }
    }

    /// Requeue every parked job whose automatic retry is due
    ///
    /// The job gets exactly one more run: its attempts are set to the retry
    /// limit, so another failure parks it again. Returns the number requeued.
    pub async fn run_due_auto_retries(&self) -> Result<usize> {
        let store = self.repo.store();
        let now = Utc::now();
        let mut requeued = 0;

        for tier in Tier::ALL {
            let due = store
                .zpop_by_score(
                    &self.repo.keys().auto_retry_schedule(tier),
                    now.timestamp_millis() as f64,
                    AUTO_RETRY_BATCH,
                )
                .await?;

            for job_id in due {
                let job = match self.repo.load(&job_id).await? {
                    Some(job) if job.status == JobStatus::Dead => job,
                    _ => continue,
                };
                match self.requeue_once(job, now).await {
                    Ok(()) => requeued += 1,
                    Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Automatic dead-letter retry failed"),
                }
            }
        }

        Ok(requeued)
    }

    async fn requeue_once(&self, mut job: Job, run_at: DateTime<Utc>) -> Result<()> {
        self.clear_artifacts(job.tier, &job.id).await?;
        job.reset_for_retry(run_at);
        job.attempts = job.max_retries;
        self.repo.restore(&job).await?;
        tracing::info!(job_id = %job.id, tier = %job.tier, "Dead-lettered job requeued for its automatic retry");
        Ok(())
    }

    async fn auto_retry_count(&self, job_id: &str) -> Result<u32> {
        let raw = self.repo.store().get(&self.repo.keys().auto_retry(job_id)).await?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Load one entry; `None` if the job is not (or no longer) dead-lettered
    pub async fn get_entry(&self, job_id: &str) -> Result<Option<DeadLetterEntry>> {
        let meta: Option<DeadLetterMeta> =
            get_json(self.repo.store().as_ref(), &self.repo.keys().dead_letter_meta(job_id)).await?;
        let Some(meta) = meta else {
            return Ok(None);
        };
        let Some(job) = self.repo.load(job_id).await? else {
            return Ok(None);
        };

        Ok(Some(DeadLetterEntry {
            job,
            error: meta.error,
            category: meta.category,
            retryable: meta.retryable,
            suggested_action: meta.suggested_action,
            failed_at: meta.failed_at,
            auto_retry_count: self.auto_retry_count(job_id).await?,
            auto_retry_at: meta.auto_retry_at,
        }))
    }

    /// Entries of a tier, newest first
    pub async fn get_entries(&self, tier: Tier, limit: usize) -> Result<Vec<DeadLetterEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let ids = self
            .repo
            .store()
            .zrange(&self.repo.keys().dead_letter(tier), 0, limit as isize - 1, true)
            .await?;
        self.load_entries(ids.into_iter().map(|(id, _)| id)).await
    }

    async fn all_entries(&self, tier: Tier) -> Result<Vec<DeadLetterEntry>> {
        let ids = self
            .repo
            .store()
            .zrange(&self.repo.keys().dead_letter(tier), 0, -1, true)
            .await?;
        self.load_entries(ids.into_iter().map(|(id, _)| id)).await
    }

    async fn load_entries(&self, ids: impl Iterator<Item = String>) -> Result<Vec<DeadLetterEntry>> {
        let mut entries = Vec::new();
        for id in ids {
            if let Some(entry) = self.get_entry(&id).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Put a dead job back on its queue, optionally after a delay
    pub async fn retry_job(&self, job_id: &str, delay: Option<Duration>) -> Result<Job> {
        let mut job = self
            .repo
            .load(job_id)
            .await?
            .ok_or_else(|| QueueError::not_found(format!("Job {} not found", job_id)))?;

        if job.status != JobStatus::Dead {
            return Err(QueueError::invalid_state(format!(
                "Job {} is {}, only dead jobs can be retried from the dead-letter queue",
                job_id, job.status
            )));
        }

        self.clear_artifacts(job.tier, job_id).await?;

        let delay = delay
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .unwrap_or_else(chrono::Duration::zero);
        self.repo.requeue(&mut job, Utc::now() + delay).await?;

        tracing::info!(job_id = %job.id, tier = %job.tier, "Dead-lettered job requeued");
        Ok(job)
    }

    /// Remove the dead-letter set member, metadata and any pending automatic
    /// retry, keeping the auto-retry counter
    pub(crate) async fn clear_artifacts(&self, tier: Tier, job_id: &str) -> Result<()> {
        let store = self.repo.store();
        let keys = self.repo.keys();
        store.zrem(&keys.dead_letter(tier), job_id).await?;
        store.zrem(&keys.auto_retry_schedule(tier), job_id).await?;
        store.delete(&keys.dead_letter_meta(job_id)).await
    }

    /// Retry every entry of a tier; returns the number requeued
    pub async fn retry_all(&self, tier: Tier) -> Result<usize> {
        self.retry_matching(tier, &RetryFilter::default()).await
    }

    /// Retry every entry of a tier matching `filter`; returns the number requeued
    pub async fn retry_matching(&self, tier: Tier, filter: &RetryFilter) -> Result<usize> {
        let now = Utc::now();
        let mut retried = 0;

        for entry in self.all_entries(tier).await? {
            if !filter.matches(&entry, now) {
                continue;
            }
            match self.retry_job(&entry.job.id, None).await {
                Ok(_) => retried += 1,
                Err(e) => tracing::warn!(job_id = %entry.job.id, error = %e, "Dead-letter retry failed"),
            }
        }

        tracing::info!(tier = %tier, retried, "Bulk dead-letter retry finished");
        Ok(retried)
    }

    /// Permanently delete every artifact of a dead job
    pub async fn discard_job(&self, job_id: &str) -> Result<bool> {
        let tier = match self.repo.load(job_id).await? {
            Some(job) => Some(job.tier),
            None => {
                let meta: Option<DeadLetterMeta> =
                    get_json(self.repo.store().as_ref(), &self.repo.keys().dead_letter_meta(job_id)).await?;
                meta.map(|m| m.tier)
            }
        };

        let removed = match tier {
            Some(tier) => self.purge(tier, job_id).await?,
            None => {
                let mut removed = false;
                for tier in Tier::ALL {
                    removed |= self.purge(tier, job_id).await?;
                }
                removed
            }
        };

        if removed {
            tracing::info!(job_id = %job_id, "Dead-lettered job discarded");
        }
        Ok(removed)
    }

    async fn purge(&self, tier: Tier, job_id: &str) -> Result<bool> {
        let store = self.repo.store();
        let keys = self.repo.keys();
        let removed = store.zrem(&keys.dead_letter(tier), job_id).await?;
        store.zrem(&keys.auto_retry_schedule(tier), job_id).await?;

        if let Some(job) = self.repo.load(job_id).await? {
            if let Some(key) = &job.idempotency_key {
                self.repo.clear_idempotency(key, job_id).await?;
            }
        }

        store.delete(&keys.dead_letter_meta(job_id)).await?;
        store.delete(&keys.auto_retry(job_id)).await?;
        self.repo.delete(job_id).await?;
        Ok(removed)
    }

    /// Discard every entry of a tier; returns the number removed
    pub async fn clear(&self, tier: Tier) -> Result<u64> {
        let ids = self
            .repo
            .store()
            .zrange(&self.repo.keys().dead_letter(tier), 0, -1, false)
            .await?;

        let mut removed = 0;
        for (id, _) in ids {
            if self.purge(tier, &id).await? {
                removed += 1;
            }
        }

        tracing::info!(tier = %tier, removed, "Dead-letter queue cleared");
        Ok(removed)
    }

    /// Drop entries past retention, then evict the oldest beyond the size cap
    pub async fn cleanup(&self, tier: Tier) -> Result<u64> {
        let store = self.repo.store();
        let dlq_key = self.repo.keys().dead_letter(tier);
        let retention = chrono::Duration::from_std(self.config.retention()).unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = Utc::now() - retention;

        let mut removed = 0;

        let expired = store
            .zrange_by_score(&dlq_key, f64::NEG_INFINITY, cutoff.timestamp_millis() as f64, None)
            .await?;
        for (id, _) in expired {
            if self.purge(tier, &id).await? {
                removed += 1;
            }
        }

        let size = store.zcard(&dlq_key).await?;
        if size > self.config.max_size {
            let excess = (size - self.config.max_size) as isize;
            let oldest = store.zrange(&dlq_key, 0, excess - 1, false).await?;
            for (id, _) in oldest {
                if self.purge(tier, &id).await? {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            tracing::info!(tier = %tier, removed, "Dead-letter cleanup removed entries");
            run_hook("on_cleanup", self.hooks.on_cleanup(tier, removed)).await;
        }

        Ok(removed)
    }

    /// Run cleanup on every tier
    pub async fn cleanup_all(&self) -> Result<u64> {
        let mut removed = 0;
        for tier in Tier::ALL {
            removed += self.cleanup(tier).await?;
        }
        Ok(removed)
    }

    /// Number of entries in a tier's dead-letter set
    pub async fn size(&self, tier: Tier) -> Result<u64> {
        self.repo.store().zcard(&self.repo.keys().dead_letter(tier)).await
    }

    /// Oldest failure time in a tier's dead-letter set
    pub async fn oldest_failure(&self, tier: Tier) -> Result<Option<DateTime<Utc>>> {
        let oldest = self
            .repo
            .store()
            .zrange(&self.repo.keys().dead_letter(tier), 0, 0, false)
            .await?;
        Ok(oldest
            .first()
            .and_then(|(_, score)| Utc.timestamp_millis_opt(*score as i64).single()))
    }

    async fn snapshot(&self) -> Result<Vec<DeadLetterEntry>> {
        let mut entries = Vec::new();
        for tier in Tier::ALL {
            entries.extend(self.all_entries(tier).await?);
        }
        Ok(entries)
    }

    pub async fn get_dlq_stats(&self) -> Result<DeadLetterStats> {
        Ok(compute_stats(&self.snapshot().await?, Utc::now()))
    }

    /// Repeated failure shapes in a tier, most frequent first
    pub async fn analyze_dlq_errors(&self, tier: Tier) -> Result<Vec<ErrorPattern>> {
        Ok(find_error_patterns(&self.all_entries(tier).await?))
    }

    pub async fn get_dlq_health(&self) -> Result<DeadLetterHealth> {
        let stats = self.get_dlq_stats().await?;
        Ok(assess_health(&stats, &self.tiers, &self.config))
    }
}
