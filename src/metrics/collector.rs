use crate::error::{QueueError, Result};
use crate::jobs::Tier;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Prometheus collector for job outcomes
#[derive(Clone)]
pub struct MetricsCollector {
    /// Jobs by tier and outcome (enqueued, completed, failed, retried, dead)
    pub jobs_total: IntCounterVec,

    /// Handler duration in seconds
    pub job_duration_seconds: HistogramVec,

    /// Handlers currently running
    pub jobs_in_flight: IntGaugeVec,

    registry: Arc<Registry>,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new(namespace: &str) -> std::result::Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let jobs_total = IntCounterVec::new(
            Opts::new("jobs_total", "Total number of jobs by outcome").namespace(namespace),
            &["tier", "outcome"],
        )?;

        let job_duration_seconds = HistogramVec::new(
            HistogramOpts::new("job_duration_seconds", "Job handler duration in seconds")
                .namespace(namespace)
                .buckets(vec![
                    0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 1800.0,
                ]),
            &["tier"],
        )?;

        let jobs_in_flight = IntGaugeVec::new(
            Opts::new("jobs_in_flight", "Number of job handlers currently running").namespace(namespace),
            &["tier"],
        )?;

        registry.register(Box::new(jobs_total.clone()))?;
        registry.register(Box::new(job_duration_seconds.clone()))?;
        registry.register(Box::new(jobs_in_flight.clone()))?;

        Ok(Self {
            jobs_total,
            job_duration_seconds,
            jobs_in_flight,
            registry: Arc::new(registry),
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_outcome(&self, tier: Tier, outcome: &str) {
        self.jobs_total.with_label_values(&[tier.as_str(), outcome]).inc();
    }

    pub fn observe_duration(&self, tier: Tier, duration: std::time::Duration) {
        self.job_duration_seconds
            .with_label_values(&[tier.as_str()])
            .observe(duration.as_secs_f64());
    }

    /// Encode every registered metric in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| QueueError::internal(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| QueueError::internal(format!("Metrics are not UTF-8: {}", e)))
    }
}
