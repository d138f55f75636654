use crate::config::{DeadLetterConfig, QueueConfig};
use crate::dead_letter::ErrorCategory;
use crate::error::QueueError;
use crate::jobs::{
    DispatchOptions, JobOutcome, JobRepository, JobStatus, KeyScheme, Tier, TierConfig, TierRegistry,
};
use crate::testing::{TestQueue, fast_tier};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;

fn tiers_with(tier: Tier, f: impl FnOnce(&mut TierConfig)) -> TierRegistry {
    Tier::ALL
        .into_iter()
        .fold(TierRegistry::builder(), |builder, t| builder.tier(fast_tier(t)))
        .configure(tier, f)
        .build()
}

fn keys(queue: &TestQueue) -> KeyScheme {
    KeyScheme::new(queue.service().config().key_prefix.clone())
}

#[tokio::test]
async fn test_completed_job_leaves_queue_and_lease() {
    let queue = TestQueue::new();
    queue.handle("email.send", |_job| async { Ok(JobOutcome::ok()) }).await;
    queue.start().await;

    let id = queue.dispatch("email.send", serde_json::json!({"to": "a@b.c"})).await;
    queue.await_job(&id, JobStatus::Completed).await.has_attempts(0);
    queue.shutdown().await;

    let keys = keys(&queue);
    let store = queue.service().store();
    assert_eq!(store.zcard(&keys.queue(Tier::Critical)).await.unwrap(), 0);
    assert_eq!(store.zcard(&keys.processing(Tier::Critical)).await.unwrap(), 0);
    assert!(!store.exists(&keys.lock(&id)).await.unwrap());

    let metrics = queue.service().metrics().get_tier_metrics(Tier::Critical).await.unwrap();
    assert_eq!(metrics.processed_last_hour, 1);
    assert_eq!(metrics.failed_last_hour, 0);
}

#[tokio::test]
async fn test_failures_retry_then_dead_letter() {
    let queue = TestQueue::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    queue
        .handle("email.send", move |_job| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(JobOutcome::failed("Validation failed: recipient is required"))
            }
        })
        .await;
    queue.start().await;

    let result = queue
        .dispatch_with("email.send", serde_json::json!({}), DispatchOptions::new().max_retries(2))
        .await;
    let id = result.job_id.unwrap();

    queue
        .await_job(&id, JobStatus::Dead)
        .await
        .has_attempts(2)
        .has_error_containing("recipient is required");
    queue.shutdown().await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(queue.service().dead_letter().size(Tier::Critical).await.unwrap(), 1);
    assert_eq!(queue.hooks().dead_job_ids(), vec![id]);

    // One failure sample per failed run
    let metrics = queue.service().metrics().get_tier_metrics(Tier::Critical).await.unwrap();
    assert_eq!(metrics.failed_last_hour, 3);
}

#[tokio::test]
async fn test_retry_then_success() {
    let queue = TestQueue::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    queue
        .handle("webhook.deliver", move |_job| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(QueueError::handler("connection refused"))
                } else {
                    Ok(JobOutcome::ok())
                }
            }
        })
        .await;
    queue.start().await;

    let id = queue.dispatch("webhook.deliver", serde_json::json!({})).await;
    let job = queue.await_job(&id, JobStatus::Completed).await.has_attempts(1).into_job();
    queue.shutdown().await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    // The error of the failed attempt is cleared on success
    assert!(job.error.is_none());
}

#[tokio::test]
async fn test_concurrency_limit_is_respected() {
    let queue = TestQueue::with_tiers(tiers_with(Tier::Batch, |c| c.concurrency = 2));
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    {
        let running = running.clone();
        let peak = peak.clone();
        queue
            .handle("audio.transcribe", move |_job| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(30)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(JobOutcome::ok())
                }
            })
            .await;
    }

    let mut ids = Vec::new();
    for i in 0..8 {
        ids.push(queue.dispatch("audio.transcribe", serde_json::json!({"n": i})).await);
    }
    queue.start().await;

    for id in &ids {
        queue.await_job(id, JobStatus::Completed).await;
    }
    queue.shutdown().await;

    assert!(peak.load(Ordering::SeqCst) <= 2, "peak was {}", peak.load(Ordering::SeqCst));
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_missing_handler_dead_letters_without_retry() {
    let queue = TestQueue::new();
    queue.start().await;

    let id = queue.dispatch("report.generate", serde_json::json!({})).await;
    let job = queue
        .await_job(&id, JobStatus::Dead)
        .await
        .has_attempts(0)
        .has_error_containing("No handler registered for job type: report.generate")
        .into_job();
    queue.shutdown().await;

    assert_eq!(job.error_category, Some(ErrorCategory::Internal));
}

#[tokio::test]
async fn test_timeout_is_classified() {
    // Timeouts are auto-retried from the dead-letter set by default
    let config = QueueConfig::builder()
        .dead_letter(DeadLetterConfig {
            auto_retry_categories: Vec::new(),
            ..Default::default()
        })
        .build();
    let queue = TestQueue::with_config(tiers_with(Tier::Critical, |c| c.timeout = Duration::from_millis(50)), config);
    queue
        .handle("email.send", |_job| async {
            sleep(Duration::from_secs(5)).await;
            Ok(JobOutcome::ok())
        })
        .await;
    queue.start().await;

    let result = queue
        .dispatch_with("email.send", serde_json::json!({}), DispatchOptions::new().max_retries(0))
        .await;
    let job = queue
        .await_job(result.job_id.as_deref().unwrap(), JobStatus::Dead)
        .await
        .has_error_containing("timed out")
        .into_job();
    queue.shutdown().await;

    assert_eq!(job.error_category, Some(ErrorCategory::Timeout));
}

#[tokio::test]
async fn test_panicking_handler_is_a_failure() {
    let queue = TestQueue::new();
    queue
        .handle("pdf.generate", |job| async move {
            if job.payload.is_object() {
                panic!("renderer crashed");
            }
            Ok(JobOutcome::ok())
        })
        .await;
    queue.start().await;

    let result = queue
        .dispatch_with("pdf.generate", serde_json::json!({}), DispatchOptions::new().max_retries(0))
        .await;
    let job = queue
        .await_job(result.job_id.as_deref().unwrap(), JobStatus::Dead)
        .await
        .has_error_containing("renderer crashed")
        .into_job();

    // The pool keeps working after a panic
    let next = queue.dispatch("pdf.generate", serde_json::Value::Null).await;
    queue.await_job(&next, JobStatus::Completed).await;
    assert!(queue.shutdown().await);
    assert_eq!(queue.service().workers().total_active(), 0);
    assert_eq!(job.error_category, Some(ErrorCategory::Internal));
}

#[tokio::test]
async fn test_delayed_job_waits_for_its_time() {
    let queue = TestQueue::new();
    queue.handle("email.send", |_job| async { Ok(JobOutcome::ok()) }).await;
    queue.start().await;

    let result = queue
        .dispatch_with(
            "email.send",
            serde_json::json!({}),
            DispatchOptions::new().delay(Duration::from_millis(300)),
        )
        .await;
    let id = result.job_id.unwrap();

    sleep(Duration::from_millis(50)).await;
    queue.assert_job(&id).await.has_status(JobStatus::Pending);

    let job = queue.await_job(&id, JobStatus::Completed).await.into_job();
    queue.shutdown().await;
    assert!(job.started_at.unwrap() >= job.scheduled_at.unwrap());
}

#[tokio::test]
async fn test_cancelled_job_is_not_run() {
    let queue = TestQueue::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    queue
        .handle("email.send", move |_job| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(JobOutcome::ok())
            }
        })
        .await;

    let id = queue.dispatch("email.send", serde_json::json!({})).await;
    queue.service().dispatcher().cancel_job(&id).await.unwrap();

    queue.start().await;
    sleep(Duration::from_millis(60)).await;
    queue.shutdown().await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    queue.assert_job(&id).await.has_status(JobStatus::Failed);
}

#[tokio::test]
async fn test_reaper_recovers_expired_lease() {
    let queue = TestQueue::new();
    let keys = keys(&queue);
    let store = queue.service().store().clone();
    let repo = JobRepository::new(store.clone(), keys.clone(), Duration::from_secs(60), Duration::from_secs(60));

    // A worker claimed the job and vanished: no lock, expired processing entry
    let id = queue.dispatch("email.send", serde_json::json!({})).await;
    let mut job = repo.load(&id).await.unwrap().unwrap();
    repo.dequeue(&job).await.unwrap();
    job.status = JobStatus::Processing;
    job.started_at = Some(Utc::now());
    job.lease_token = Some("ghost".to_string());
    repo.save(&job).await.unwrap();
    let expired = (Utc::now().timestamp_millis() - 1_000) as f64;
    store.zadd(&keys.processing(Tier::Critical), &id, expired).await.unwrap();

    assert_eq!(queue.service().workers().reap_expired().await.unwrap(), 1);

    let job = queue
        .assert_job(&id)
        .await
        .has_status(JobStatus::Retrying)
        .has_attempts(1)
        .has_error_containing("Lease expired")
        .into_job();
    assert!(job.lease_token.is_none());
    assert_eq!(job.error_category, Some(ErrorCategory::Timeout));
    assert!(store.zscore(&keys.queue(Tier::Critical), &id).await.unwrap().is_some());
    assert_eq!(store.zcard(&keys.processing(Tier::Critical)).await.unwrap(), 0);

    // A second sweep finds nothing
    assert_eq!(queue.service().workers().reap_expired().await.unwrap(), 0);
}

#[tokio::test]
async fn test_reaper_skips_live_leases() {
    let queue = TestQueue::new();
    let keys = keys(&queue);
    let store = queue.service().store().clone();

    let id = queue.dispatch("email.send", serde_json::json!({})).await;
    store
        .set_nx(&keys.lock(&id), "worker-1", Duration::from_secs(60))
        .await
        .unwrap();
    let expired = (Utc::now().timestamp_millis() - 1_000) as f64;
    store.zadd(&keys.processing(Tier::Critical), &id, expired).await.unwrap();

    assert_eq!(queue.service().workers().reap_expired().await.unwrap(), 0);
    assert_eq!(store.zcard(&keys.processing(Tier::Critical)).await.unwrap(), 1);
}

#[tokio::test]
async fn test_reaper_leaves_job_finished_after_selection() {
    let queue = TestQueue::new();
    let keys = keys(&queue);
    let store = queue.service().store().clone();
    let repo = JobRepository::new(store.clone(), keys.clone(), Duration::from_secs(60), Duration::from_secs(60));

    let id = queue.dispatch("email.send", serde_json::json!({})).await;
    let mut job = repo.load(&id).await.unwrap().unwrap();
    repo.dequeue(&job).await.unwrap();
    job.status = JobStatus::Processing;
    job.started_at = Some(Utc::now());
    job.lease_token = Some("slow-worker".to_string());
    repo.save(&job).await.unwrap();
    let expired = (Utc::now().timestamp_millis() - 1_000) as f64;
    store.zadd(&keys.processing(Tier::Critical), &id, expired).await.unwrap();

    let workers = queue.service().workers();
    let leases = workers.expired_leases(Tier::Critical).await.unwrap();
    assert_eq!(leases.len(), 1);
    assert_eq!(leases[0].token.as_deref(), Some("slow-worker"));

    // The slow worker lands its result before the reaper takes the lock
    job.status = JobStatus::Completed;
    job.completed_at = Some(Utc::now());
    job.lease_token = None;
    repo.save(&job).await.unwrap();

    assert!(!workers.recover_lease(Tier::Critical, &leases[0]).await.unwrap());
    queue.assert_job(&id).await.has_status(JobStatus::Completed).has_attempts(0);
    assert!(store.zscore(&keys.queue(Tier::Critical), &id).await.unwrap().is_none());
    assert_eq!(store.zcard(&keys.processing(Tier::Critical)).await.unwrap(), 0);
    assert!(!store.exists(&keys.lock(&id)).await.unwrap());
}

#[tokio::test]
async fn test_reaper_skips_lease_renewed_after_selection() {
    let queue = TestQueue::new();
    let keys = keys(&queue);
    let store = queue.service().store().clone();
    let repo = JobRepository::new(store.clone(), keys.clone(), Duration::from_secs(60), Duration::from_secs(60));

    let id = queue.dispatch("email.send", serde_json::json!({})).await;
    let mut job = repo.load(&id).await.unwrap().unwrap();
    repo.dequeue(&job).await.unwrap();
    job.status = JobStatus::Processing;
    job.lease_token = Some("first".to_string());
    repo.save(&job).await.unwrap();
    let expired = (Utc::now().timestamp_millis() - 1_000) as f64;
    store.zadd(&keys.processing(Tier::Critical), &id, expired).await.unwrap();

    let workers = queue.service().workers();
    let leases = workers.expired_leases(Tier::Critical).await.unwrap();

    job.lease_token = Some("second".to_string());
    repo.save(&job).await.unwrap();

    assert!(!workers.recover_lease(Tier::Critical, &leases[0]).await.unwrap());
    let job = queue.assert_job(&id).await.has_status(JobStatus::Processing).into_job();
    assert_eq!(job.lease_token.as_deref(), Some("second"));
    assert_eq!(store.zcard(&keys.processing(Tier::Critical)).await.unwrap(), 1);
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_jobs() {
    let queue = TestQueue::new();
    queue
        .handle("email.send", |_job| async {
            sleep(Duration::from_millis(100)).await;
            Ok(JobOutcome::ok())
        })
        .await;
    queue.start().await;
    assert!(queue.service().workers().is_running());

    let id = queue.dispatch("email.send", serde_json::json!({})).await;
    let started = queue
        .wait_until(Duration::from_secs(2), || async {
            queue.service().workers().active_count(Tier::Critical) == 1
        })
        .await;
    assert!(started);

    assert!(queue.shutdown().await);
    assert!(!queue.service().workers().is_running());
    queue.assert_job(&id).await.has_status(JobStatus::Completed);
}

#[tokio::test]
async fn test_start_twice_is_a_no_op() {
    let queue = TestQueue::new();
    queue.handle("email.send", |_job| async { Ok(JobOutcome::ok()) }).await;
    queue.start().await;
    queue.start().await;

    let id = queue.dispatch("email.send", serde_json::json!({})).await;
    queue.await_job(&id, JobStatus::Completed).await;
    assert!(queue.shutdown().await);
}
