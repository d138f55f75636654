//! Wiring of the queue components around one shared store

use crate::config::{QueueConfig, StoreBackend};
use crate::dead_letter::{DeadLetterHooks, DeadLetterManager};
use crate::error::{QueueError, Result};
use crate::jobs::{
    Dispatcher, HandlerRegistry, JobRepository, KeyScheme, TierRegistry, WorkerConfig, WorkerPool,
};
use crate::metrics::QueueMetrics;
use crate::store::InMemoryStore;
use crate::traits::store::QueueStore;
use std::sync::Arc;

#[cfg(feature = "metrics")]
use crate::metrics::MetricsCollector;

/// A fully wired queue: producers use the dispatcher, handlers go into the
/// registry, and the worker pool drains the tiers.
pub struct QueueService {
    config: QueueConfig,
    store: Arc<dyn QueueStore>,
    tiers: TierRegistry,
    handlers: HandlerRegistry,
    dispatcher: Dispatcher,
    dead_letter: DeadLetterManager,
    metrics: QueueMetrics,
    workers: WorkerPool,
}

impl QueueService {
    pub fn builder() -> QueueServiceBuilder {
        QueueServiceBuilder::new()
    }

    /// Service with default tiers on the store selected by `config`
    pub fn from_config(config: QueueConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn tiers(&self) -> &TierRegistry {
        &self.tiers
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn dead_letter(&self) -> &DeadLetterManager {
        &self.dead_letter
    }

    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Fail if any known job type has no handler
    pub async fn require_complete_handlers(&self) -> Result<()> {
        let missing = self.handlers.missing_handlers().await;
        if missing.is_empty() {
            return Ok(());
        }
        Err(QueueError::configuration(format!(
            "No handler registered for job types: {}",
            missing.join(", ")
        )))
    }

    /// Start the worker pool
    pub async fn start(&self) -> Result<()> {
        if !self.store.ping().await {
            return Err(QueueError::store("Store is not reachable"));
        }

        let missing = self.handlers.missing_handlers().await;
        if !missing.is_empty() {
            tracing::warn!(job_types = ?missing, "Starting without handlers for some job types");
        }

        self.workers.start().await;
        Ok(())
    }

    /// Stop the worker pool; returns `false` if jobs outlived the grace period
    pub async fn shutdown(&self) -> bool {
        self.workers.shutdown().await
    }
}

/// Builder for [`QueueService`]
#[must_use = "builder does nothing until you call build()"]
pub struct QueueServiceBuilder {
    config: QueueConfig,
    tiers: Option<TierRegistry>,
    store: Option<Arc<dyn QueueStore>>,
    hooks: Option<Arc<dyn DeadLetterHooks>>,
    worker_config: Option<WorkerConfig>,
}

impl QueueServiceBuilder {
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            tiers: None,
            store: None,
            hooks: None,
            worker_config: None,
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tiers(mut self, tiers: TierRegistry) -> Self {
        self.tiers = Some(tiers);
        self
    }

    /// Use an existing store instead of the configured backend
    pub fn store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn DeadLetterHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Override the worker timings derived from the config
    pub fn worker_config(mut self, worker_config: WorkerConfig) -> Self {
        self.worker_config = Some(worker_config);
        self
    }

    pub fn build(self) -> Result<QueueService> {
        let config = self.config;
        let store = match self.store {
            Some(store) => store,
            None => connect(&config)?,
        };
        let tiers = self.tiers.unwrap_or_default();
        let keys = KeyScheme::new(config.key_prefix.clone());

        let repo = JobRepository::new(store.clone(), keys.clone(), config.job_ttl(), config.idempotency_ttl());

        #[allow(unused_mut)]
        let mut metrics = QueueMetrics::new(store.clone(), keys, tiers.clone(), config.metrics.window());
        #[cfg(feature = "metrics")]
        if config.metrics.enabled {
            let collector = MetricsCollector::new(&config.metrics.namespace).map_err(|e| {
                QueueError::configuration(format!("Failed to create metrics collector: {}", e))
            })?;
            metrics = metrics.with_collector(Arc::new(collector));
        }

        let mut dead_letter =
            DeadLetterManager::new(repo.clone(), tiers.clone(), config.dead_letter.clone(), metrics.clone());
        if let Some(hooks) = self.hooks {
            dead_letter = dead_letter.with_hooks(hooks);
        }

        let handlers = HandlerRegistry::new(tiers.clone());
        let dispatcher = Dispatcher::new(repo.clone(), tiers.clone(), metrics.clone(), dead_letter.clone());
        let workers = WorkerPool::new(
            repo,
            tiers.clone(),
            handlers.clone(),
            dead_letter.clone(),
            metrics.clone(),
            self.worker_config.unwrap_or_else(|| WorkerConfig::from(&config)),
        );

        tracing::debug!(backend = ?config.backend, prefix = %config.key_prefix, "Queue service built");

        Ok(QueueService {
            config,
            store,
            tiers,
            handlers,
            dispatcher,
            dead_letter,
            metrics,
            workers,
        })
    }
}

impl Default for QueueServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn connect(config: &QueueConfig) -> Result<Arc<dyn QueueStore>> {
    match config.backend {
        StoreBackend::InMemory => Ok(Arc::new(InMemoryStore::new())),
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| QueueError::configuration("Redis backend requires redis_url"))?;
            Ok(Arc::new(crate::store::RedisStore::new(url)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{DispatchOptions, JobOutcome};

    #[tokio::test]
    async fn test_default_service_uses_in_memory_store() {
        let service = QueueService::from_config(QueueConfig::default()).unwrap();
        assert!(service.dispatcher().is_configured());
        assert!(service.store().ping().await);

        let result = service
            .dispatcher()
            .dispatch("email.send", serde_json::json!({}), DispatchOptions::new())
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_require_complete_handlers_lists_missing_types() {
        let tiers = TierRegistry::builder().build();
        let service = QueueService::builder().tiers(tiers.clone()).build().unwrap();

        let err = service.require_complete_handlers().await.unwrap_err();
        assert!(matches!(err, QueueError::Configuration(_)));
        assert!(err.to_string().contains("email.send"));

        for job_type in tiers.job_types() {
            service
                .handlers()
                .register(job_type, |_job| Box::pin(async { Ok(JobOutcome::ok()) }))
                .await
                .unwrap();
        }
        service.require_complete_handlers().await.unwrap();
    }

    #[tokio::test]
    async fn test_key_prefix_is_applied() {
        let store = Arc::new(InMemoryStore::new());
        let config = QueueConfig::builder().key_prefix("acme").build();
        let service = QueueService::builder()
            .config(config)
            .store(store.clone())
            .build()
            .unwrap();

        service
            .dispatcher()
            .dispatch("email.send", serde_json::json!({}), DispatchOptions::new())
            .await;
        assert!(!store.keys_with_prefix("acme:").await.is_empty());
        assert!(store.keys_with_prefix("tidequeue:").await.is_empty());
    }
}
