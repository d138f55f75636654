//! Per-tier worker loops
//!
//! Each tier polls its own ordered set and fans out up to its concurrency
//! limit. A claimed job is held under a TTL lock whose value doubles as a
//! fencing token: terminal writes only happen while the stored record still
//! carries the worker's token.

use crate::dead_letter::{DeadLetterManager, ErrorCategory};
use crate::error::{QueueError, Result};
use crate::jobs::config::WorkerConfig;
use crate::jobs::job::{Job, JobOutcome, JobStatus};
use crate::jobs::registry::HandlerRegistry;
use crate::jobs::repository::JobRepository;
use crate::jobs::tier::{Tier, TierRegistry};
use crate::metrics::QueueMetrics;
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep};

/// Maximum expired leases handled per tier per sweep
const REAPER_BATCH: usize = 100;

struct PoolInner {
    repo: JobRepository,
    tiers: TierRegistry,
    handlers: HandlerRegistry,
    dead_letter: DeadLetterManager,
    metrics: QueueMetrics,
    config: WorkerConfig,
    active: BTreeMap<Tier, AtomicUsize>,
    shutdown: AtomicBool,
    /// Wakes sleeping loops on shutdown
    wake: Notify,
    /// Signalled whenever a job finishes
    idle: Notify,
}

/// A job claimed by a loop, with the token it was locked under
struct Claim {
    job: Job,
    token: String,
}

/// An expired processing entry and the lease token it was selected under
pub(crate) struct ExpiredLease {
    pub(crate) job_id: String,
    pub(crate) token: Option<String>,
}

/// Keeps a tier's active count accurate on every exit path
struct ActiveGuard {
    inner: Arc<PoolInner>,
    tier: Tier,
}

impl ActiveGuard {
    fn new(inner: Arc<PoolInner>, tier: Tier) -> Self {
        inner.active[&tier].fetch_add(1, Ordering::SeqCst);
        Self { inner, tier }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.inner.active[&self.tier].fetch_sub(1, Ordering::SeqCst);
        self.inner.idle.notify_waiters();
    }
}

/// Runs one polling loop per tier plus the lease reaper
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl WorkerPool {
    /// Create a new worker pool
    pub fn new(
        repo: JobRepository,
        tiers: TierRegistry,
        handlers: HandlerRegistry,
        dead_letter: DeadLetterManager,
        metrics: QueueMetrics,
        config: WorkerConfig,
    ) -> Self {
        let active = Tier::ALL.into_iter().map(|t| (t, AtomicUsize::new(0))).collect();
        Self {
            inner: Arc::new(PoolInner {
                repo,
                tiers,
                handlers,
                dead_letter,
                metrics,
                config,
                active,
                shutdown: AtomicBool::new(false),
                wake: Notify::new(),
                idle: Notify::new(),
            }),
            handles: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Spawn the tier loops and the reaper; a second call is a no-op
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Worker pool already running");
            return;
        }
        self.inner.shutdown.store(false, Ordering::SeqCst);

        let mut handles = self.handles.lock().await;
        for tier in Tier::ALL {
            let inner = self.inner.clone();
            handles.push(tokio::spawn(async move {
                inner.run_tier(tier).await;
            }));
        }

        let inner = self.inner.clone();
        handles.push(tokio::spawn(async move {
            inner.run_reaper().await;
        }));

        tracing::info!(tiers = Tier::ALL.len(), "Worker pool started");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Handlers currently running for a tier
    pub fn active_count(&self, tier: Tier) -> usize {
        self.inner.active_count(tier)
    }

    /// Handlers currently running across all tiers
    pub fn total_active(&self) -> usize {
        Tier::ALL.into_iter().map(|t| self.inner.active_count(t)).sum()
    }

    /// Run a single poll cycle for a tier; returns the number of jobs started
    pub async fn poll_once(&self, tier: Tier) -> Result<usize> {
        self.inner.clone().poll_once(tier).await
    }

    /// Sweep expired leases of every tier; returns the number recovered
    pub async fn reap_expired(&self) -> Result<usize> {
        let mut reaped = 0;
        for tier in Tier::ALL {
            reaped += self.inner.reap(tier).await?;
        }
        Ok(reaped)
    }

    pub(crate) async fn expired_leases(&self, tier: Tier) -> Result<Vec<ExpiredLease>> {
        self.inner.expired_leases(tier).await
    }

    pub(crate) async fn recover_lease(&self, tier: Tier, lease: &ExpiredLease) -> Result<bool> {
        self.inner.recover(tier, lease).await
    }

    /// Stop admitting work and wait for in-flight jobs
    ///
    /// Returns `false` if jobs were still running when the grace period ran
    /// out. Those handlers are not cancelled.
    pub async fn shutdown(&self) -> bool {
        tracing::info!("Shutting down worker pool...");
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.wake.notify_waiters();

        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
        self.running.store(false, Ordering::SeqCst);

        let deadline = Instant::now() + self.inner.config.shutdown_grace;
        loop {
            let active = self.total_active();
            if active == 0 {
                tracing::info!("Worker pool shut down");
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(active, "Shutdown grace period elapsed with jobs still running");
                return false;
            }

            let step = (deadline - now).min(Duration::from_millis(50));
            tokio::select! {
                _ = self.inner.idle.notified() => {}
                _ = sleep(step) => {}
            }
        }
    }
}

impl PoolInner {
    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn active_count(&self, tier: Tier) -> usize {
        self.active[&tier].load(Ordering::SeqCst)
    }

    async fn run_tier(self: Arc<Self>, tier: Tier) {
        tracing::info!(tier = %tier, concurrency = self.tiers.get(tier).concurrency, "Tier worker started");

        while !self.is_shutting_down() {
            let started = match self.clone().poll_once(tier).await {
                Ok(started) => started,
                Err(e) if e.is_store() => {
                    tracing::warn!(tier = %tier, error = %e, "Store unavailable, skipping poll");
                    0
                }
                Err(e) => {
                    tracing::error!(tier = %tier, error = %e, "Error polling tier queue");
                    0
                }
            };

            if started == 0 {
                tokio::select! {
                    _ = self.wake.notified() => {}
                    _ = sleep(self.config.poll_interval) => {}
                }
            }
        }

        tracing::info!(tier = %tier, "Tier worker stopped");
    }

    async fn run_reaper(self: Arc<Self>) {
        while !self.is_shutting_down() {
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = sleep(self.config.reaper_interval) => {}
            }
            if self.is_shutting_down() {
                break;
            }

            for tier in Tier::ALL {
                match self.reap(tier).await {
                    Ok(0) => {}
                    Ok(reaped) => tracing::warn!(tier = %tier, reaped, "Recovered jobs with expired leases"),
                    Err(e) if e.is_store() => {
                        tracing::warn!(tier = %tier, error = %e, "Store unavailable, lease sweep skipped")
                    }
                    Err(e) => tracing::error!(tier = %tier, error = %e, "Lease sweep failed"),
                }
            }

            match self.dead_letter.run_due_auto_retries().await {
                Ok(0) => {}
                Ok(requeued) => tracing::info!(requeued, "Requeued dead-lettered jobs due for automatic retry"),
                Err(e) if e.is_store() => {
                    tracing::warn!(error = %e, "Store unavailable, auto-retry sweep skipped")
                }
                Err(e) => tracing::error!(error = %e, "Auto-retry sweep failed"),
            }
        }
    }

    async fn poll_once(self: Arc<Self>, tier: Tier) -> Result<usize> {
        if self.is_shutting_down() {
            return Ok(0);
        }

        let concurrency = self.tiers.get(tier).concurrency;
        let active = self.active_count(tier);
        if active >= concurrency {
            return Ok(0);
        }

        let store = self.repo.store();
        let now_ms = Utc::now().timestamp_millis() as f64;
        let ids = store
            .zpop_by_score(&self.repo.keys().queue(tier), now_ms, concurrency - active)
            .await?;

        let mut started = 0;
        for id in ids {
            match self.claim(tier, &id).await {
                Ok(Some(claim)) => {
                    let guard = ActiveGuard::new(self.clone(), tier);
                    let inner = self.clone();
                    tokio::spawn(async move {
                        inner.execute(claim, guard).await;
                    });
                    started += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(tier = %tier, job_id = %id, error = %e, "Failed to claim job");
                    // Put it back so it is not lost
                    if let Err(e) = store.zadd(&self.repo.keys().queue(tier), &id, now_ms).await {
                        tracing::error!(tier = %tier, job_id = %id, error = %e, "Failed to return job to queue");
                    }
                }
            }
        }

        Ok(started)
    }

    /// Lock a popped id and mark the job as processing
    async fn claim(&self, tier: Tier, job_id: &str) -> Result<Option<Claim>> {
        let store = self.repo.store();
        let keys = self.repo.keys();
        let config = self.tiers.get(tier);
        let lease = config.timeout + self.config.lock_grace;
        let token = uuid::Uuid::new_v4().to_string();
        let lock_key = keys.lock(job_id);

        if !store.set_nx(&lock_key, &token, lease).await? {
            tracing::debug!(tier = %tier, job_id = %job_id, "Job lock held elsewhere, skipping");
            return Ok(None);
        }

        let job = match self.repo.load(job_id).await? {
            Some(job) if matches!(job.status, JobStatus::Pending | JobStatus::Retrying) => job,
            Some(job) => {
                tracing::debug!(job_id = %job_id, status = %job.status, "Skipping job that is not runnable");
                store.delete_if_equals(&lock_key, &token).await?;
                return Ok(None);
            }
            None => {
                tracing::debug!(job_id = %job_id, "Skipping job with missing record");
                store.delete_if_equals(&lock_key, &token).await?;
                return Ok(None);
            }
        };

        let now = Utc::now();
        if job.scheduled_at.is_some_and(|at| at > now) {
            self.repo.enqueue(&job).await?;
            store.delete_if_equals(&lock_key, &token).await?;
            return Ok(None);
        }

        let mut job = job;
        job.status = JobStatus::Processing;
        job.started_at = Some(now);
        job.updated_at = now;
        job.lease_token = Some(token.clone());
        self.repo.save(&job).await?;

        let deadline = now + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::zero());
        store
            .zadd(&keys.processing(tier), job_id, deadline.timestamp_millis() as f64)
            .await?;

        Ok(Some(Claim { job, token }))
    }

    async fn execute(self: Arc<Self>, claim: Claim, _guard: ActiveGuard) {
        let Claim { job, token } = claim;
        let tier = job.tier;
        let job_id = job.id.clone();

        self.metrics.job_started(tier);
        match AssertUnwindSafe(self.process(job, &token)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(tier = %tier, job_id = %job_id, error = %e, "Failed to record job result");
            }
            Err(panic) => {
                tracing::error!(
                    tier = %tier,
                    job_id = %job_id,
                    panic = %panic_message(panic.as_ref()),
                    "Job processing panicked"
                );
            }
        }
        self.release(tier, &job_id, &token).await;
        self.metrics.job_finished(tier);
    }

    /// Run the handler and write the outcome
    async fn process(&self, job: Job, token: &str) -> Result<()> {
        let config = self.tiers.get(job.tier);

        let Some(handler) = self.handlers.get(&job.job_type).await else {
            let error = format!("No handler registered for job type: {}", job.job_type);
            tracing::error!(job_id = %job.id, job_type = %job.job_type, "{}", error);
            if let Some(current) = self.owned_record(&job.id, token).await? {
                self.dead_letter
                    .move_to_dead_letter(current, &error, Some(ErrorCategory::Internal))
                    .await?;
            }
            return Ok(());
        };

        tracing::debug!(job_id = %job.id, job_type = %job.job_type, tier = %job.tier, "Processing job");

        let started = Instant::now();
        let result = tokio::time::timeout(config.timeout, AssertUnwindSafe(handler(job.clone())).catch_unwind()).await;
        let processing = started.elapsed();

        let outcome: std::result::Result<JobOutcome, (String, Option<ErrorCategory>)> = match result {
            Err(_) => Err((QueueError::Timeout(config.timeout).to_string(), Some(ErrorCategory::Timeout))),
            Ok(Err(panic)) => Err((
                format!("Handler panicked: {}", panic_message(panic.as_ref())),
                Some(ErrorCategory::Internal),
            )),
            Ok(Ok(Err(QueueError::Handler(message)))) => Err((message, None)),
            Ok(Ok(Err(e))) => Err((e.to_string(), None)),
            Ok(Ok(Ok(outcome))) if outcome.success => Ok(outcome),
            Ok(Ok(Ok(outcome))) => Err((
                outcome.error.unwrap_or_else(|| "Job reported failure".to_string()),
                outcome.category,
            )),
        };

        let Some(mut current) = self.owned_record(&job.id, token).await? else {
            tracing::warn!(job_id = %job.id, tier = %job.tier, "Lease lost before completion, discarding result");
            return Ok(());
        };

        let now = Utc::now();
        match outcome {
            Ok(outcome) => {
                current.status = JobStatus::Completed;
                current.result = outcome.data;
                current.error = None;
                current.error_category = None;
                current.completed_at = Some(now);
                current.updated_at = now;
                current.lease_token = None;
                self.repo.save(&current).await?;

                let started_at = current.started_at.unwrap_or(now);
                let wait_ms = (started_at - current.run_at()).num_milliseconds().max(0) as u64;
                let processing_ms = processing.as_millis() as u64;
                let sla_met = Duration::from_millis(wait_ms + processing_ms) <= config.sla;
                if let Err(e) = self
                    .metrics
                    .record_completed(current.tier, wait_ms, processing_ms, sla_met)
                    .await
                {
                    tracing::warn!(tier = %current.tier, error = %e, "Failed to record completion metric");
                }

                tracing::info!(
                    job_id = %current.id,
                    job_type = %current.job_type,
                    tier = %current.tier,
                    wait_ms,
                    processing_ms,
                    sla_met,
                    "Job completed"
                );
            }
            Err((error, category)) => self.fail(current, &error, category).await?,
        }

        Ok(())
    }

    /// Schedule a retry or hand the job to the dead-letter manager
    async fn fail(&self, mut job: Job, error: &str, category: Option<ErrorCategory>) -> Result<()> {
        if !job.should_retry() {
            self.dead_letter.move_to_dead_letter(job, error, category).await?;
            return Ok(());
        }

        let config = self.tiers.get(job.tier);
        job.attempts += 1;
        let delay = config.backoff(job.attempts);
        let now = Utc::now();

        job.status = JobStatus::Retrying;
        job.error = Some(error.to_string());
        job.error_category = category;
        job.lease_token = None;
        job.updated_at = now;
        job.scheduled_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()));
        self.repo.save(&job).await?;
        self.repo.enqueue(&job).await?;

        if let Err(e) = self.metrics.record_failed(job.tier).await {
            tracing::warn!(tier = %job.tier, error = %e, "Failed to record failure metric");
        }

        tracing::warn!(
            job_id = %job.id,
            job_type = %job.job_type,
            tier = %job.tier,
            attempts = job.attempts,
            max_retries = job.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Job failed, retry scheduled"
        );
        Ok(())
    }

    /// The stored record, if it is still leased under `token`
    async fn owned_record(&self, job_id: &str, token: &str) -> Result<Option<Job>> {
        Ok(self
            .repo
            .load(job_id)
            .await?
            .filter(|job| job.lease_token.as_deref() == Some(token)))
    }

    /// Drop the lock and processing entry if they still belong to `token`
    async fn release(&self, tier: Tier, job_id: &str, token: &str) {
        let store = self.repo.store();
        let keys = self.repo.keys();

        let result: Result<()> = async {
            let owned = store.delete_if_equals(&keys.lock(job_id), token).await?;
            let taken_over = match self.repo.load(job_id).await? {
                Some(job) => job.lease_token.is_some_and(|t| t != token),
                None => false,
            };
            if owned || !taken_over {
                store.zrem(&keys.processing(tier), job_id).await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!(tier = %tier, job_id = %job_id, error = %e, "Failed to release job lock");
        }
    }

    /// Recover jobs whose worker vanished without finishing
    async fn reap(&self, tier: Tier) -> Result<usize> {
        let mut reaped = 0;
        for lease in self.expired_leases(tier).await? {
            if self.recover(tier, &lease).await? {
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    /// Processing entries past their deadline whose lock has lapsed
    async fn expired_leases(&self, tier: Tier) -> Result<Vec<ExpiredLease>> {
        let store = self.repo.store();
        let keys = self.repo.keys();
        let processing_key = keys.processing(tier);
        let now_ms = Utc::now().timestamp_millis() as f64;

        let expired = store
            .zrange_by_score(&processing_key, f64::NEG_INFINITY, now_ms, Some(REAPER_BATCH))
            .await?;

        let mut leases = Vec::new();
        for (job_id, _) in expired {
            if store.exists(&keys.lock(&job_id)).await? {
                continue;
            }
            match self.repo.load(&job_id).await? {
                Some(job) if job.status == JobStatus::Processing => leases.push(ExpiredLease {
                    token: job.lease_token,
                    job_id,
                }),
                _ => {
                    store.zrem(&processing_key, &job_id).await?;
                }
            }
        }
        Ok(leases)
    }

    /// Fail an expired lease through the normal retry path
    ///
    /// The record is re-read under the reaper's lock and only touched while it
    /// is still processing under the token seen when the lease was selected.
    async fn recover(&self, tier: Tier, lease: &ExpiredLease) -> Result<bool> {
        let store = self.repo.store();
        let keys = self.repo.keys();
        let processing_key = keys.processing(tier);
        let lock_key = keys.lock(&lease.job_id);

        // Holding the lock keeps the stale worker and other reapers out
        let token = uuid::Uuid::new_v4().to_string();
        if !store.set_nx(&lock_key, &token, self.config.lock_grace).await? {
            return Ok(false);
        }

        let result: Result<bool> = async {
            let job = match self.repo.load(&lease.job_id).await? {
                Some(job) if job.status == JobStatus::Processing && job.lease_token == lease.token => job,
                Some(job) if job.status == JobStatus::Processing => {
                    tracing::debug!(job_id = %lease.job_id, "Lease renewed by another claim, skipping");
                    return Ok(false);
                }
                _ => {
                    tracing::debug!(job_id = %lease.job_id, "Job finished before its lease was reaped");
                    store.zrem(&processing_key, &lease.job_id).await?;
                    return Ok(false);
                }
            };

            store.zrem(&processing_key, &lease.job_id).await?;
            let timeout = self.tiers.get(tier).timeout;
            let error = format!("Lease expired after {:?} without a result", timeout);
            tracing::warn!(tier = %tier, job_id = %lease.job_id, attempts = job.attempts, "Reaping expired lease");

            let mut job = job;
            job.lease_token = None;
            self.fail(job, &error, Some(ErrorCategory::Timeout)).await?;
            Ok(true)
        }
        .await;

        store.delete_if_equals(&lock_key, &token).await?;
        result
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
