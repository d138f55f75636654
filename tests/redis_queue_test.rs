//! End-to-end runs against a live Redis (`cargo test --features redis -- --ignored`)

#![cfg(feature = "redis")]

use std::time::Duration;
use tidequeue::{DispatchOptions, JobOutcome, JobStatus, QueueConfig, QueueService, StoreBackend, Tier};

fn redis_config() -> QueueConfig {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
    QueueConfig::builder()
        .backend(StoreBackend::Redis)
        .redis_url(url)
        .key_prefix(format!("tidequeue-test-{}", uuid::Uuid::new_v4().simple()))
        .poll_interval(Duration::from_millis(20))
        .build()
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_dispatch_and_complete() {
    let service = QueueService::from_config(redis_config()).unwrap();
    service
        .handlers()
        .register("email.send", |_job| Box::pin(async { Ok(JobOutcome::ok()) }))
        .await
        .unwrap();
    service.start().await.unwrap();

    let first = service
        .dispatcher()
        .dispatch("email.send", serde_json::json!({}), DispatchOptions::new().idempotency_key("welcome-42"))
        .await;
    let second = service
        .dispatcher()
        .dispatch("email.send", serde_json::json!({}), DispatchOptions::new().idempotency_key("welcome-42"))
        .await;
    assert!(second.deduplicated);
    let id = first.job_id.unwrap();

    let mut status = None;
    for _ in 0..200 {
        status = service.dispatcher().get_job_status(&id).await.unwrap().map(|s| s.status);
        if status == Some(JobStatus::Completed) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(service.shutdown().await);
    assert_eq!(status, Some(JobStatus::Completed));
    assert_eq!(service.dispatcher().get_queue_length(Tier::Critical).await.unwrap(), 0);
}
