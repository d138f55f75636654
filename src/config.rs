//! Configuration for the queue engine

use crate::dead_letter::ErrorCategory;
use crate::metrics::MetricsConfig;
use crate::utils::env::{get_env_with_prefix, parse_env};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backing store type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-memory store (for development/testing)
    #[default]
    InMemory,
    /// Redis-backed store (for production)
    #[cfg(feature = "redis")]
    Redis,
}

/// Main configuration for a queue service
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Backing store type
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL (only used for the Redis backend)
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Namespace prefix for every store key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// How long an idle tier loop sleeps between polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Grace period for in-flight jobs on shutdown
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,

    /// TTL of job and status records
    #[serde(default = "default_job_ttl_seconds")]
    pub job_ttl_seconds: u64,

    /// TTL of idempotency mappings
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,

    /// Extra lock lifetime on top of the tier timeout
    #[serde(default = "default_lock_grace_seconds")]
    pub lock_grace_seconds: u64,

    /// Interval of the expired-lease sweep
    #[serde(default = "default_reaper_interval_seconds")]
    pub reaper_interval_seconds: u64,

    #[serde(default)]
    pub dead_letter: DeadLetterConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: None,
            key_prefix: default_key_prefix(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
            job_ttl_seconds: default_job_ttl_seconds(),
            idempotency_ttl_seconds: default_idempotency_ttl_seconds(),
            lock_grace_seconds: default_lock_grace_seconds(),
            reaper_interval_seconds: default_reaper_interval_seconds(),
            dead_letter: DeadLetterConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Create a new QueueConfig builder
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::new()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(backend) = get_env_with_prefix("BACKEND") {
            config.backend = match backend.to_lowercase().as_str() {
                #[cfg(feature = "redis")]
                "redis" => StoreBackend::Redis,
                _ => StoreBackend::InMemory,
            };
        }

        if let Some(url) = get_env_with_prefix("REDIS_URL") {
            config.redis_url = Some(url);
        }

        if let Some(prefix) = get_env_with_prefix("KEY_PREFIX") {
            config.key_prefix = prefix;
        }

        if let Some(v) = parse_env("POLL_INTERVAL_MS") {
            config.poll_interval_ms = v;
        }

        if let Some(v) = parse_env("SHUTDOWN_GRACE_SECONDS") {
            config.shutdown_grace_seconds = v;
        }

        if let Some(v) = parse_env("JOB_TTL_SECONDS") {
            config.job_ttl_seconds = v;
        }

        if let Some(v) = parse_env("IDEMPOTENCY_TTL_SECONDS") {
            config.idempotency_ttl_seconds = v;
        }

        if let Some(v) = parse_env("LOCK_GRACE_SECONDS") {
            config.lock_grace_seconds = v;
        }

        if let Some(v) = parse_env("REAPER_INTERVAL_SECONDS") {
            config.reaper_interval_seconds = v;
        }

        config.dead_letter = DeadLetterConfig::from_env();
        config.metrics = MetricsConfig::from_env();
        config.logging = LoggingConfig::from_env();

        config
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_seconds)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_seconds)
    }

    pub fn lock_grace(&self) -> Duration {
        Duration::from_secs(self.lock_grace_seconds)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_seconds)
    }
}

/// Dead-letter retention, sizing, health and auto-retry policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeadLetterConfig {
    /// How long dead-letter entries are kept
    #[serde(default = "default_retention_seconds")]
    pub retention_seconds: u64,

    /// Maximum entries per tier before the oldest are evicted
    #[serde(default = "default_max_size")]
    pub max_size: u64,

    /// Categories eligible for automatic retry
    #[serde(default = "default_auto_retry_categories")]
    pub auto_retry_categories: Vec<ErrorCategory>,

    /// Automatic retries per job
    #[serde(default = "default_auto_retry_max")]
    pub auto_retry_max: u32,

    /// Delay before an automatic retry
    #[serde(default = "default_auto_retry_delay_seconds")]
    pub auto_retry_delay_seconds: u64,

    /// Total entries above which health is `warning`
    #[serde(default = "default_health_warning_total")]
    pub health_warning_total: u64,

    /// Total entries above which health is `critical`
    #[serde(default = "default_health_critical_total")]
    pub health_critical_total: u64,

    /// Age of the oldest entry above which it counts as stale
    #[serde(default = "default_stale_after_seconds")]
    pub stale_after_seconds: u64,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            retention_seconds: default_retention_seconds(),
            max_size: default_max_size(),
            auto_retry_categories: default_auto_retry_categories(),
            auto_retry_max: default_auto_retry_max(),
            auto_retry_delay_seconds: default_auto_retry_delay_seconds(),
            health_warning_total: default_health_warning_total(),
            health_critical_total: default_health_critical_total(),
            stale_after_seconds: default_stale_after_seconds(),
        }
    }
}

impl DeadLetterConfig {
    /// Load dead-letter configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = parse_env("DLQ_RETENTION_SECONDS") {
            config.retention_seconds = v;
        }

        if let Some(v) = parse_env("DLQ_MAX_SIZE") {
            config.max_size = v;
        }

        if let Some(categories) = get_env_with_prefix("DLQ_AUTO_RETRY_CATEGORIES") {
            config.auto_retry_categories = categories
                .split(',')
                .filter_map(|c| c.trim().parse().ok())
                .collect();
        }

        if let Some(v) = parse_env("DLQ_AUTO_RETRY_MAX") {
            config.auto_retry_max = v;
        }

        if let Some(v) = parse_env("DLQ_AUTO_RETRY_DELAY_SECONDS") {
            config.auto_retry_delay_seconds = v;
        }

        if let Some(v) = parse_env("DLQ_HEALTH_WARNING_TOTAL") {
            config.health_warning_total = v;
        }

        if let Some(v) = parse_env("DLQ_HEALTH_CRITICAL_TOTAL") {
            config.health_critical_total = v;
        }

        if let Some(v) = parse_env("DLQ_STALE_AFTER_SECONDS") {
            config.stale_after_seconds = v;
        }

        config
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }

    pub fn auto_retry_delay(&self) -> Duration {
        Duration::from_secs(self.auto_retry_delay_seconds)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_json")]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: default_json(),
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(level) = get_env_with_prefix("LOG_LEVEL") {
            config.level = level;
        }

        if let Some(json) = get_env_with_prefix("LOG_JSON") {
            config.json = json.parse().unwrap_or(false);
        }

        config
    }
}

/// Builder for QueueConfig
#[must_use = "builder does nothing until you call build()"]
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl QueueConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
        }
    }

    /// Start from environment variables
    pub fn from_env(mut self) -> Self {
        self.config = QueueConfig::from_env();
        self
    }

    pub fn backend(mut self, backend: StoreBackend) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.config.redis_url = Some(url.into());
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace_seconds = grace.as_secs();
        self
    }

    pub fn job_ttl(mut self, ttl: Duration) -> Self {
        self.config.job_ttl_seconds = ttl.as_secs();
        self
    }

    pub fn idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.config.idempotency_ttl_seconds = ttl.as_secs();
        self
    }

    pub fn lock_grace(mut self, grace: Duration) -> Self {
        self.config.lock_grace_seconds = grace.as_secs();
        self
    }

    pub fn reaper_interval(mut self, interval: Duration) -> Self {
        self.config.reaper_interval_seconds = interval.as_secs();
        self
    }

    pub fn dead_letter(mut self, dead_letter: DeadLetterConfig) -> Self {
        self.config.dead_letter = dead_letter;
        self
    }

    pub fn metrics(mut self, metrics: MetricsConfig) -> Self {
        self.config.metrics = metrics;
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    pub fn build(self) -> QueueConfig {
        self.config
    }
}

impl Default for QueueConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_key_prefix() -> String {
    "tidequeue".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_shutdown_grace_seconds() -> u64 {
    30
}

fn default_job_ttl_seconds() -> u64 {
    7 * 24 * 60 * 60 // 7 days
}

fn default_idempotency_ttl_seconds() -> u64 {
    24 * 60 * 60 // 24 hours
}

fn default_lock_grace_seconds() -> u64 {
    30
}

fn default_reaper_interval_seconds() -> u64 {
    30
}

fn default_retention_seconds() -> u64 {
    7 * 24 * 60 * 60 // 7 days
}

fn default_max_size() -> u64 {
    10_000
}

fn default_auto_retry_categories() -> Vec<ErrorCategory> {
    vec![ErrorCategory::Timeout, ErrorCategory::RateLimit, ErrorCategory::ExternalService]
}

fn default_auto_retry_max() -> u32 {
    1
}

fn default_auto_retry_delay_seconds() -> u64 {
    5 * 60
}

fn default_health_warning_total() -> u64 {
    50
}

fn default_health_critical_total() -> u64 {
    200
}

fn default_stale_after_seconds() -> u64 {
    24 * 60 * 60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_json() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.backend, StoreBackend::InMemory);
        assert_eq!(config.key_prefix, "tidequeue");
        assert_eq!(config.shutdown_grace(), Duration::from_secs(30));
        assert_eq!(config.job_ttl(), Duration::from_secs(604_800));
        assert_eq!(config.idempotency_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.dead_letter.auto_retry_max, 1);
    }

    #[test]
    fn test_builder() {
        let config = QueueConfig::builder()
            .key_prefix("test")
            .poll_interval(Duration::from_millis(10))
            .shutdown_grace(Duration::from_secs(2))
            .build();

        assert_eq!(config.key_prefix, "test");
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.shutdown_grace_seconds, 2);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: QueueConfig = serde_json::from_str(r#"{"key_prefix": "app"}"#).unwrap();
        assert_eq!(config.key_prefix, "app");
        assert_eq!(config.poll_interval_ms, 1_000);
        assert_eq!(config.dead_letter.max_size, 10_000);
    }

    #[test]
    fn test_dead_letter_categories_from_env() {
        unsafe {
            std::env::set_var("TIDEQUEUE_DLQ_AUTO_RETRY_CATEGORIES", "timeout, rate_limit, bogus");
        }
        let config = DeadLetterConfig::from_env();
        unsafe {
            std::env::remove_var("TIDEQUEUE_DLQ_AUTO_RETRY_CATEGORIES");
        }
        assert_eq!(
            config.auto_retry_categories,
            vec![ErrorCategory::Timeout, ErrorCategory::RateLimit]
        );
    }
}
