use std::sync::Arc;
use std::time::Duration;
use tidequeue::jobs::KeyScheme;
use tidequeue::metrics::{Bottleneck, ConcurrencyRecommendation, OverallHealth};
use tidequeue::testing::TestQueue;
use tidequeue::{
    DispatchOptions, HistoryWindow, InMemoryStore, JobOutcome, JobStatus, QueueMetrics, Tier, TierRegistry,
};

fn metrics(window: Duration) -> QueueMetrics {
    QueueMetrics::new(
        Arc::new(InMemoryStore::new()),
        KeyScheme::default(),
        TierRegistry::default(),
        window,
    )
}

#[tokio::test]
async fn test_processing_bound_tier_capacity() {
    // 2 jobs/s arrive, 1 job/s finishes, each taking 10s
    let m = metrics(Duration::from_secs(10));
    for _ in 0..20 {
        m.record_enqueued(Tier::Standard).await.unwrap();
    }
    for _ in 0..10 {
        m.record_completed(Tier::Standard, 0, 10_000, true).await.unwrap();
    }

    let analysis = m.analyze_capacity(Tier::Standard).await.unwrap();
    assert_eq!(analysis.arrival_rate, 2.0);
    assert_eq!(analysis.throughput, 1.0);
    assert!(!analysis.is_stable);
    assert_eq!(analysis.bottleneck, Bottleneck::Processing);
    assert_eq!(analysis.recommendation, ConcurrencyRecommendation::Increase);
    assert!((analysis.predicted_depth - 20.0).abs() < 1e-9);
    assert_eq!(analysis.drain_time_secs, None);
}

#[tokio::test]
async fn test_success_rate_and_sla() {
    let m = metrics(Duration::from_secs(60));
    for _ in 0..3 {
        m.record_completed(Tier::Critical, 100, 200, true).await.unwrap();
    }
    m.record_completed(Tier::Critical, 60_000, 200, false).await.unwrap();
    m.record_failed(Tier::Critical).await.unwrap();

    let tier = m.get_tier_metrics(Tier::Critical).await.unwrap();
    assert!((tier.success_rate - 0.8).abs() < 1e-9);
    assert!((tier.sla_compliance - 0.75).abs() < 1e-9);
    assert!(!tier.healthy);
    assert_eq!(tier.processed_last_hour, 4);
    assert_eq!(tier.failed_last_hour, 1);

    let aggregate = m.get_aggregate_metrics().await.unwrap();
    assert_eq!(aggregate.tiers.len(), 3);
    assert_eq!(aggregate.health, OverallHealth::Degraded);
    assert_eq!(aggregate.issues.len(), 2);
}

#[tokio::test]
async fn test_worker_runs_feed_metrics() {
    let queue = TestQueue::new();
    queue
        .handle("pdf.generate", |_job| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(JobOutcome::ok())
        })
        .await;
    queue.start().await;

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(queue.dispatch("pdf.generate", serde_json::json!({})).await);
    }
    for id in &ids {
        queue.await_job(id, JobStatus::Completed).await;
    }
    assert!(queue.shutdown().await);

    let m = queue.service().metrics();
    let tier = m.get_tier_metrics(Tier::Standard).await.unwrap();
    assert_eq!(tier.depth, 0);
    assert_eq!(tier.success_rate, 1.0);
    assert_eq!(tier.sla_compliance, 1.0);
    assert!(tier.avg_processing_ms >= 20.0);
    assert!(tier.throughput > 0.0);
    assert!((tier.arrival_rate - tier.throughput).abs() < 1e-9);
    assert!(tier.healthy);

    let history = m.get_historical(Tier::Standard, HistoryWindow::Hour).await.unwrap();
    assert_eq!(history.iter().map(|p| p.completed).sum::<u64>(), 4);

    let aggregate = m.get_aggregate_metrics().await.unwrap();
    assert_eq!(aggregate.health, OverallHealth::Healthy);
    assert_eq!(aggregate.processed_last_hour, 4);
}

#[tokio::test]
async fn test_depth_counts_waiting_jobs() {
    let queue = TestQueue::new();
    for _ in 0..3 {
        queue
            .dispatch_with("data.export", serde_json::json!({}), DispatchOptions::new())
            .await;
    }

    let tier = queue.service().metrics().get_tier_metrics(Tier::Batch).await.unwrap();
    assert_eq!(tier.depth, 3);
    assert_eq!(tier.throughput, 0.0);
    assert!(tier.arrival_rate > 0.0);
}

#[cfg(feature = "metrics")]
#[tokio::test]
async fn test_prometheus_export() {
    use tidequeue::{MetricsConfig, QueueConfig, QueueService};

    let config = QueueConfig::builder()
        .metrics(MetricsConfig::builder().enabled(true).namespace("acme").build())
        .build();
    let service = QueueService::from_config(config).unwrap();
    service
        .dispatcher()
        .dispatch("email.send", serde_json::json!({}), DispatchOptions::new())
        .await;

    let output = service.metrics().collector().unwrap().render().unwrap();
    assert!(output.contains("acme_jobs_total"));
    assert!(output.contains("outcome=\"enqueued\""));
}
