//! Job record persistence shared by the dispatcher, workers and dead-letter manager

use crate::error::Result;
use crate::jobs::job::{Job, JobStatusRecord};
use crate::jobs::keys::KeyScheme;
use crate::traits::store::{QueueStore, get_json, set_json};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Reads and writes job records and ordered-set membership
#[derive(Clone)]
pub struct JobRepository {
    store: Arc<dyn QueueStore>,
    keys: KeyScheme,
    job_ttl: Duration,
    idempotency_ttl: Duration,
}

impl JobRepository {
    pub fn new(store: Arc<dyn QueueStore>, keys: KeyScheme, job_ttl: Duration, idempotency_ttl: Duration) -> Self {
        Self {
            store,
            keys,
            job_ttl,
            idempotency_ttl,
        }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn keys(&self) -> &KeyScheme {
        &self.keys
    }

    pub fn idempotency_ttl(&self) -> Duration {
        self.idempotency_ttl
    }

    pub async fn load(&self, job_id: &str) -> Result<Option<Job>> {
        get_json(self.store.as_ref(), &self.keys.job(job_id)).await
    }

    pub async fn load_status(&self, job_id: &str) -> Result<Option<JobStatusRecord>> {
        get_json(self.store.as_ref(), &self.keys.status(job_id)).await
    }

    /// Persist the full record and the status-only record
    pub async fn save(&self, job: &Job) -> Result<()> {
        set_json(self.store.as_ref(), &self.keys.job(&job.id), job, Some(self.job_ttl)).await?;
        set_json(
            self.store.as_ref(),
            &self.keys.status(&job.id),
            &job.status_record(),
            Some(self.job_ttl),
        )
        .await
    }

    /// Insert into the tier's live ordered set at the job's score
    pub async fn enqueue(&self, job: &Job) -> Result<()> {
        self.store.zadd(&self.keys.queue(job.tier), &job.id, job.score()).await
    }

    /// Remove from the tier's live ordered set
    pub async fn dequeue(&self, job: &Job) -> Result<bool> {
        self.store.zrem(&self.keys.queue(job.tier), &job.id).await
    }

    /// Reset a job to pending and put it back on its tier's queue
    pub async fn requeue(&self, job: &mut Job, run_at: DateTime<Utc>) -> Result<()> {
        job.reset_for_retry(run_at);
        self.restore(job).await
    }

    /// Persist an already reset job, enqueue it and reclaim its idempotency key
    ///
    /// A key reused by a newer job since this one left the queue keeps
    /// pointing at the newer job.
    pub async fn restore(&self, job: &Job) -> Result<()> {
        self.save(job).await?;
        self.enqueue(job).await?;
        if let Some(key) = &job.idempotency_key {
            if !self.reserve_idempotency(key, &job.id).await? {
                let current = self.lookup_idempotency(key).await?;
                if current.as_deref() != Some(job.id.as_str()) {
                    tracing::warn!(
                        job_id = %job.id,
                        idempotency_key = %key,
                        holder = current.as_deref().unwrap_or(""),
                        "Idempotency key already taken by another job, leaving it in place"
                    );
                }
            }
        }
        Ok(())
    }

    /// Reserve an idempotency key for a job id; returns `false` if already taken
    pub async fn reserve_idempotency(&self, key: &str, job_id: &str) -> Result<bool> {
        self.store
            .set_nx(&self.keys.idempotency(key), job_id, self.idempotency_ttl)
            .await
    }

    /// Write (or overwrite) an idempotency mapping
    pub async fn map_idempotency(&self, key: &str, job_id: &str) -> Result<()> {
        self.store
            .set(&self.keys.idempotency(key), job_id, Some(self.idempotency_ttl))
            .await
    }

    pub async fn lookup_idempotency(&self, key: &str) -> Result<Option<String>> {
        self.store.get(&self.keys.idempotency(key)).await
    }

    /// Remove an idempotency mapping if it still points at `job_id`
    pub async fn clear_idempotency(&self, key: &str, job_id: &str) -> Result<()> {
        self.store.delete_if_equals(&self.keys.idempotency(key), job_id).await?;
        Ok(())
    }

    /// Delete the job and its status record
    pub async fn delete(&self, job_id: &str) -> Result<()> {
        self.store.delete(&self.keys.job(job_id)).await?;
        self.store.delete(&self.keys.status(job_id)).await
    }
}
