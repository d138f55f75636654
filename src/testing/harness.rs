//! In-memory queue harness for tests
//!
//! Wraps a [`QueueService`] on an [`InMemoryStore`] with fast tiers and
//! short polling intervals, and adds polling helpers and fluent job
//! assertions.

use crate::config::QueueConfig;
use crate::error::Result;
use crate::jobs::{DispatchOptions, DispatchResult, Job, JobOutcome, JobStatus, TierRegistry, WorkerConfig};
use crate::service::QueueService;
use crate::store::InMemoryStore;
use crate::testing::fixtures::fast_tiers;
use crate::testing::hooks::RecordingHooks;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Default time budget of the polling helpers
const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// A queue service wired for tests
pub struct TestQueue {
    service: QueueService,
    store: Arc<InMemoryStore>,
    hooks: Arc<RecordingHooks>,
}

impl TestQueue {
    /// Harness with [`fast_tiers`]
    pub fn new() -> Self {
        Self::with_tiers(fast_tiers())
    }

    /// Harness with custom tiers
    pub fn with_tiers(tiers: TierRegistry) -> Self {
        Self::with_config(tiers, QueueConfig::default())
    }

    /// Harness with custom tiers and queue configuration
    ///
    /// Worker timings are always shortened for tests.
    pub fn with_config(tiers: TierRegistry, config: QueueConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let hooks = Arc::new(RecordingHooks::new());
        let worker_config = WorkerConfig::from(&config)
            .with_poll_interval(Duration::from_millis(10))
            .with_lock_grace(Duration::from_millis(100))
            .with_reaper_interval(Duration::from_millis(50))
            .with_shutdown_grace(Duration::from_secs(2));

        let service = QueueService::builder()
            .config(config)
            .tiers(tiers)
            .store(store.clone())
            .hooks(hooks.clone())
            .worker_config(worker_config)
            .build()
            .expect("in-memory queue service should build");

        Self { service, store, hooks }
    }

    pub fn service(&self) -> &QueueService {
        &self.service
    }

    pub fn store(&self) -> &Arc<InMemoryStore> {
        &self.store
    }

    pub fn hooks(&self) -> &Arc<RecordingHooks> {
        &self.hooks
    }

    /// Register a handler from an async closure
    pub async fn handle<F, Fut>(&self, job_type: &str, handler: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JobOutcome>> + Send + 'static,
    {
        self.service
            .handlers()
            .register(job_type, move |job| Box::pin(handler(job)))
            .await
            .expect("job type should be known to the tier registry");
    }

    pub async fn start(&self) {
        self.service.start().await.expect("in-memory store is always reachable");
    }

    pub async fn shutdown(&self) -> bool {
        self.service.shutdown().await
    }

    /// Submit a job and return its id, panicking if submission fails
    pub async fn dispatch(&self, job_type: &str, payload: serde_json::Value) -> String {
        self.dispatch_with(job_type, payload, DispatchOptions::new())
            .await
            .job_id
            .expect("dispatch should succeed")
    }

    pub async fn dispatch_with(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        options: DispatchOptions,
    ) -> DispatchResult {
        let result = self.service.dispatcher().dispatch(job_type, payload, options).await;
        assert!(result.success, "dispatch of {} failed: {:?}", job_type, result.error);
        result
    }

    /// Poll until the job reaches `status`, returning `None` on timeout
    pub async fn wait_for_status(&self, job_id: &str, status: JobStatus, timeout: Duration) -> Option<Job> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(Some(job)) = self.service.dispatcher().get_job(job_id).await {
                if job.status == status {
                    return Some(job);
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(Duration::from_millis(5)).await;
        }
    }

    /// Poll until `check` returns true, returning `false` on timeout
    pub async fn wait_until<F, Fut>(&self, timeout: Duration, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if check().await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(5)).await;
        }
    }

    /// Assert on the job's current state
    pub async fn assert_job(&self, job_id: &str) -> JobAssert {
        let job = self
            .service
            .dispatcher()
            .get_job(job_id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| panic!("job {} not found", job_id));
        JobAssert { job }
    }

    /// Wait for the job to reach `status`, then assert on it
    pub async fn await_job(&self, job_id: &str, status: JobStatus) -> JobAssert {
        match self.wait_for_status(job_id, status, DEFAULT_WAIT).await {
            Some(job) => JobAssert { job },
            None => {
                let current = self.service.dispatcher().get_job(job_id).await.ok().flatten();
                panic!(
                    "job {} did not reach {} within {:?}; current: {:?}",
                    job_id,
                    status,
                    DEFAULT_WAIT,
                    current.map(|j| (j.status, j.attempts, j.error))
                );
            }
        }
    }
}

impl Default for TestQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent assertions on a loaded job
#[derive(Debug)]
pub struct JobAssert {
    job: Job,
}

impl JobAssert {
    pub fn has_status(self, status: JobStatus) -> Self {
        assert_eq!(self.job.status, status, "unexpected status for job {}", self.job.id);
        self
    }

    pub fn has_attempts(self, attempts: u32) -> Self {
        assert_eq!(self.job.attempts, attempts, "unexpected attempts for job {}", self.job.id);
        self
    }

    pub fn has_error_containing(self, needle: &str) -> Self {
        let error = self.job.error.as_deref().unwrap_or_default();
        assert!(
            error.contains(needle),
            "expected error of job {} to contain {:?}, got {:?}",
            self.job.id,
            needle,
            error
        );
        self
    }

    pub fn has_result(self, expected: serde_json::Value) -> Self {
        assert_eq!(self.job.result.as_ref(), Some(&expected), "unexpected result for job {}", self.job.id);
        self
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn into_job(self) -> Job {
        self.job
    }
}
