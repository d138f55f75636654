//! Job submission and queue management

use crate::dead_letter::DeadLetterManager;
use crate::error::{QueueError, Result};
use crate::jobs::job::{DispatchOptions, DispatchResult, Job, JobStatus, JobStatusRecord};
use crate::jobs::repository::JobRepository;
use crate::jobs::tier::{Tier, TierRegistry};
use crate::metrics::QueueMetrics;
use crate::traits::job::JobPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Error reported when no backing store is available
pub const NOT_CONFIGURED: &str = "queue not configured";

/// One item of a batch submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub job_type: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub options: DispatchOptions,
}

impl DispatchRequest {
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            options: DispatchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }
}

/// Depth of one tier's structures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierQueueStats {
    /// Eligible to run now
    pub ready: u64,
    /// Scheduled for later
    pub delayed: u64,
    /// Currently held by a worker
    pub processing: u64,
    pub dead_letter: u64,
}

/// Depth of every tier plus totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub tiers: BTreeMap<Tier, TierQueueStats>,
    pub total_ready: u64,
    pub total_delayed: u64,
    pub total_processing: u64,
    pub total_dead_letter: u64,
}

#[derive(Clone)]
struct Backend {
    repo: JobRepository,
    metrics: QueueMetrics,
    dead_letter: DeadLetterManager,
}

/// Submits jobs to tier queues and manages their lifecycle
#[derive(Clone)]
pub struct Dispatcher {
    tiers: TierRegistry,
    backend: Option<Backend>,
}

impl Dispatcher {
    pub fn new(
        repo: JobRepository,
        tiers: TierRegistry,
        metrics: QueueMetrics,
        dead_letter: DeadLetterManager,
    ) -> Self {
        Self {
            tiers,
            backend: Some(Backend {
                repo,
                metrics,
                dead_letter,
            }),
        }
    }

    /// A dispatcher without a backing store; every submission fails softly
    pub fn unconfigured(tiers: TierRegistry) -> Self {
        Self { tiers, backend: None }
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    fn backend(&self) -> Result<&Backend> {
        self.backend.as_ref().ok_or(QueueError::NotConfigured)
    }

    /// Submit a job
    ///
    /// Never fails: errors are reported in the returned [`DispatchResult`].
    pub async fn dispatch(&self, job_type: &str, payload: serde_json::Value, options: DispatchOptions) -> DispatchResult {
        let Some(backend) = &self.backend else {
            tracing::warn!(job_type = %job_type, "Dispatch attempted without a configured queue");
            return DispatchResult::failed(NOT_CONFIGURED);
        };

        let store = backend.repo.store();
        if !store.is_healthy() && !store.ping().await {
            tracing::warn!(job_type = %job_type, "Dispatch attempted while the store is unreachable");
            return DispatchResult::failed(NOT_CONFIGURED);
        }

        match self.try_dispatch(backend, job_type, payload, options).await {
            Ok(result) => result,
            Err(e) if e.is_store() => {
                tracing::error!(job_type = %job_type, error = %e, "Store unavailable, job not dispatched");
                DispatchResult::failed(NOT_CONFIGURED)
            }
            Err(e) => {
                tracing::error!(job_type = %job_type, error = %e, "Failed to dispatch job");
                DispatchResult::failed(e.to_string())
            }
        }
    }

    async fn try_dispatch(
        &self,
        backend: &Backend,
        job_type: &str,
        payload: serde_json::Value,
        options: DispatchOptions,
    ) -> Result<DispatchResult> {
        let tier = options.tier.unwrap_or_else(|| self.tiers.tier_for(job_type));
        let config = self.tiers.get(tier);
        let now = Utc::now();

        let mut job = Job::new(job_type, tier, payload, options.max_retries.unwrap_or(config.max_retries));
        job.scheduled_at = options.resolve_schedule(now);
        job.priority = options.priority.unwrap_or(0);
        job.idempotency_key = options.idempotency_key.clone();
        job.organization_id = options.organization_id;
        job.user_id = options.user_id;
        job.correlation_id = options.correlation_id;

        if let Some(key) = &options.idempotency_key {
            if !backend.repo.reserve_idempotency(key, &job.id).await? {
                match backend.repo.lookup_idempotency(key).await? {
                    Some(existing) => {
                        tracing::debug!(
                            job_type = %job_type,
                            job_id = %existing,
                            idempotency_key = %key,
                            "Duplicate submission collapsed"
                        );
                        return Ok(DispatchResult::deduplicated(existing));
                    }
                    // Expired between the two calls
                    None => backend.repo.map_idempotency(key, &job.id).await?,
                }
            }
        }

        if let Err(e) = self.persist(backend, &job).await {
            if let Some(key) = &job.idempotency_key {
                if let Err(clear_err) = backend.repo.clear_idempotency(key, &job.id).await {
                    tracing::warn!(job_id = %job.id, error = %clear_err, "Failed to release idempotency key");
                }
            }
            return Err(e);
        }

        tracing::info!(
            job_id = %job.id,
            job_type = %job_type,
            tier = %tier,
            scheduled_at = ?job.scheduled_at,
            "Job dispatched"
        );
        Ok(DispatchResult::created(job.id, tier))
    }

    async fn persist(&self, backend: &Backend, job: &Job) -> Result<()> {
        backend.repo.save(job).await?;
        backend.repo.enqueue(job).await?;
        if let Err(e) = backend.metrics.record_enqueued(job.tier).await {
            tracing::warn!(tier = %job.tier, error = %e, "Failed to record enqueue metric");
        }
        Ok(())
    }

    /// Submit several jobs; one result per request, in order
    pub async fn dispatch_batch(&self, requests: Vec<DispatchRequest>) -> Vec<DispatchResult> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.dispatch(&request.job_type, request.payload, request.options).await);
        }
        results
    }

    /// Submit a job that becomes eligible after `delay`
    pub async fn dispatch_delayed(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        delay: Duration,
        options: DispatchOptions,
    ) -> DispatchResult {
        self.dispatch(job_type, payload, options.delay(delay)).await
    }

    /// Submit a job that becomes eligible at `at`
    pub async fn dispatch_scheduled(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        at: DateTime<Utc>,
        options: DispatchOptions,
    ) -> DispatchResult {
        self.dispatch(job_type, payload, options.scheduled_at(at)).await
    }

    /// Submit a typed payload under its own job type
    ///
    /// The payload's tier and idempotency key apply unless `options` sets them.
    pub async fn dispatch_job<P: JobPayload>(&self, payload: &P, mut options: DispatchOptions) -> DispatchResult {
        if options.tier.is_none() {
            options.tier = payload.tier();
        }
        if options.idempotency_key.is_none() {
            options.idempotency_key = payload.idempotency_key();
        }

        match serde_json::to_value(payload) {
            Ok(value) => self.dispatch(P::JOB_TYPE, value, options).await,
            Err(e) => DispatchResult::failed(QueueError::from(e).to_string()),
        }
    }

    /// Cancel a pending job before any worker claims it
    pub async fn cancel_job(&self, job_id: &str) -> Result<Job> {
        let backend = self.backend()?;
        let mut job = self.load_existing(backend, job_id).await?;

        if job.status != JobStatus::Pending {
            return Err(QueueError::invalid_state(format!(
                "Job {} is {}, only pending jobs can be cancelled",
                job_id, job.status
            )));
        }

        if !backend.repo.dequeue(&job).await? {
            return Err(QueueError::invalid_state(format!(
                "Job {} was already claimed by a worker",
                job_id
            )));
        }

        let now = Utc::now();
        job.status = JobStatus::Failed;
        job.error = Some("cancelled".to_string());
        job.updated_at = now;
        job.completed_at = Some(now);
        backend.repo.save(&job).await?;

        if let Some(key) = &job.idempotency_key {
            backend.repo.clear_idempotency(key, &job.id).await?;
        }

        tracing::info!(job_id = %job_id, tier = %job.tier, "Job cancelled");
        Ok(job)
    }

    /// Requeue a cancelled or dead job from scratch
    pub async fn retry_job(&self, job_id: &str) -> Result<Job> {
        let backend = self.backend()?;
        let job = self.load_existing(backend, job_id).await?;

        match job.status {
            JobStatus::Dead => backend.dead_letter.retry_job(job_id, None).await,
            JobStatus::Failed => {
                let mut job = job;
                backend.repo.requeue(&mut job, Utc::now()).await?;
                tracing::info!(job_id = %job_id, tier = %job.tier, "Job requeued");
                Ok(job)
            }
            status => Err(QueueError::invalid_state(format!(
                "Job {} is {}, only failed or dead jobs can be retried",
                job_id, status
            ))),
        }
    }

    async fn load_existing(&self, backend: &Backend, job_id: &str) -> Result<Job> {
        backend
            .repo
            .load(job_id)
            .await?
            .ok_or_else(|| QueueError::not_found(format!("Job {} not found", job_id)))
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        self.backend()?.repo.load(job_id).await
    }

    pub async fn get_job_status(&self, job_id: &str) -> Result<Option<JobStatusRecord>> {
        self.backend()?.repo.load_status(job_id).await
    }

    /// Jobs waiting in a tier's live ordered set (ready and delayed)
    pub async fn get_queue_length(&self, tier: Tier) -> Result<u64> {
        let backend = self.backend()?;
        backend.repo.store().zcard(&backend.repo.keys().queue(tier)).await
    }

    /// Ready, delayed, in-flight and dead-lettered counts per tier
    pub async fn get_queue_stats(&self) -> Result<QueueStats> {
        let backend = self.backend()?;
        let store = backend.repo.store();
        let keys = backend.repo.keys();
        let now_ms = Utc::now().timestamp_millis() as f64;

        let mut stats = QueueStats::default();
        for tier in Tier::ALL {
            let queue = keys.queue(tier);
            let total = store.zcard(&queue).await?;
            let ready = store.zcount(&queue, f64::NEG_INFINITY, now_ms).await?;
            let tier_stats = TierQueueStats {
                ready,
                delayed: total.saturating_sub(ready),
                processing: store.zcard(&keys.processing(tier)).await?,
                dead_letter: store.zcard(&keys.dead_letter(tier)).await?,
            };

            stats.total_ready += tier_stats.ready;
            stats.total_delayed += tier_stats.delayed;
            stats.total_processing += tier_stats.processing;
            stats.total_dead_letter += tier_stats.dead_letter;
            stats.tiers.insert(tier, tier_stats);
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeadLetterConfig;
    use crate::jobs::keys::KeyScheme;
    use crate::jobs::payloads::{GenerateInvoice, SendEmail};
    use crate::store::InMemoryStore;
    use crate::traits::store::QueueStore;
    use std::sync::Arc;

    fn dispatcher() -> Dispatcher {
        let store: Arc<dyn QueueStore> = Arc::new(InMemoryStore::new());
        let keys = KeyScheme::default();
        let tiers = TierRegistry::default();
        let repo = JobRepository::new(store.clone(), keys.clone(), Duration::from_secs(3600), Duration::from_secs(3600));
        let metrics = QueueMetrics::new(store, keys, tiers.clone(), Duration::from_secs(300));
        let dead_letter = DeadLetterManager::new(repo.clone(), tiers.clone(), DeadLetterConfig::default(), metrics.clone());
        Dispatcher::new(repo, tiers, metrics, dead_letter)
    }

    #[tokio::test]
    async fn test_dispatch_uses_job_type_tier() {
        let d = dispatcher();
        let result = d.dispatch("email.send", serde_json::json!({}), DispatchOptions::new()).await;
        assert!(result.success);
        assert_eq!(result.tier, Some(Tier::Critical));
        assert!(!result.deduplicated);

        let job = d.get_job(result.job_id.as_deref().unwrap()).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.max_retries, 3);
        assert_eq!(d.get_queue_length(Tier::Critical).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_type_goes_to_standard_and_overrides_apply() {
        let d = dispatcher();
        let result = d.dispatch("misc.job", serde_json::Value::Null, DispatchOptions::new()).await;
        assert_eq!(result.tier, Some(Tier::Standard));

        let result = d
            .dispatch(
                "misc.job",
                serde_json::Value::Null,
                DispatchOptions::new().tier(Tier::Batch).max_retries(7),
            )
            .await;
        let job = d.get_job(result.job_id.as_deref().unwrap()).await.unwrap().unwrap();
        assert_eq!(job.tier, Tier::Batch);
        assert_eq!(job.max_retries, 7);
    }

    #[tokio::test]
    async fn test_idempotent_dispatch() {
        let d = dispatcher();
        let opts = DispatchOptions::new().idempotency_key("welcome-42");
        let first = d.dispatch("email.send", serde_json::json!({}), opts.clone()).await;
        let second = d.dispatch("email.send", serde_json::json!({}), opts).await;

        assert!(second.success);
        assert!(second.deduplicated);
        assert_eq!(first.job_id, second.job_id);
        assert_eq!(d.get_queue_length(Tier::Critical).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_dispatch_fails_softly() {
        let d = Dispatcher::unconfigured(TierRegistry::default());
        let result = d.dispatch("email.send", serde_json::json!({}), DispatchOptions::new()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(NOT_CONFIGURED));
        assert!(matches!(d.get_queue_stats().await, Err(QueueError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_delayed_jobs_count_as_delayed() {
        let d = dispatcher();
        d.dispatch("pdf.generate", serde_json::Value::Null, DispatchOptions::new()).await;
        d.dispatch_delayed("pdf.generate", serde_json::Value::Null, Duration::from_secs(600), DispatchOptions::new())
            .await;
        d.dispatch_scheduled(
            "data.export",
            serde_json::Value::Null,
            Utc::now() + chrono::Duration::hours(1),
            DispatchOptions::new(),
        )
        .await;

        let stats = d.get_queue_stats().await.unwrap();
        assert_eq!(stats.tiers[&Tier::Standard].ready, 1);
        assert_eq!(stats.tiers[&Tier::Standard].delayed, 1);
        assert_eq!(stats.tiers[&Tier::Batch].delayed, 1);
        assert_eq!(stats.total_ready, 1);
        assert_eq!(stats.total_delayed, 2);
    }

    #[tokio::test]
    async fn test_cancel_and_retry() {
        let d = dispatcher();
        let result = d
            .dispatch("email.send", serde_json::json!({}), DispatchOptions::new().idempotency_key("k1"))
            .await;
        let id = result.job_id.unwrap();

        let cancelled = d.cancel_job(&id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Failed);
        assert_eq!(cancelled.error.as_deref(), Some("cancelled"));
        assert_eq!(d.get_queue_length(Tier::Critical).await.unwrap(), 0);
        assert!(matches!(d.cancel_job(&id).await, Err(QueueError::InvalidState(_))));

        // The key is free again after cancellation
        let again = d
            .dispatch("email.send", serde_json::json!({}), DispatchOptions::new().idempotency_key("k1"))
            .await;
        assert!(!again.deduplicated);

        let retried = d.retry_job(&id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        // The newer job keeps the reused key
        let repo = &d.backend().unwrap().repo;
        assert_eq!(repo.lookup_idempotency("k1").await.unwrap(), again.job_id);
        assert_eq!(d.get_job_status(&id).await.unwrap().unwrap().status, JobStatus::Pending);
        assert!(matches!(d.retry_job(&id).await, Err(QueueError::InvalidState(_))));
        assert!(matches!(d.cancel_job("missing").await, Err(QueueError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_dispatch_typed_payloads() {
        let d = dispatcher();
        let email = SendEmail {
            to: "a@example.com".to_string(),
            subject: "Hi".to_string(),
            body: "Hello".to_string(),
            template: None,
        };
        let result = d.dispatch_job(&email, DispatchOptions::new()).await;
        assert_eq!(result.tier, Some(Tier::Critical));

        let invoice = GenerateInvoice {
            invoice_id: "inv-1".to_string(),
            customer_id: "c-1".to_string(),
            render_pdf: true,
        };
        let first = d.dispatch_job(&invoice, DispatchOptions::new()).await;
        let second = d.dispatch_job(&invoice, DispatchOptions::new()).await;
        assert_eq!(first.tier, Some(Tier::Standard));
        assert!(second.deduplicated);
    }

    #[tokio::test]
    async fn test_batch_dispatch() {
        let d = dispatcher();
        let results = d
            .dispatch_batch(vec![
                DispatchRequest::new("email.send", serde_json::json!({})),
                DispatchRequest::new("report.generate", serde_json::json!({}))
                    .with_options(DispatchOptions::new().priority(2)),
            ])
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(results[1].tier, Some(Tier::Batch));
    }
}
