use crate::utils::env::{get_env_with_prefix, parse_env};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metrics configuration for the queue
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether Prometheus export is enabled (needs the `metrics` feature)
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Prometheus metric namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Length of the sliding window behind rates and averages
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            namespace: default_namespace(),
            window_seconds: default_window_seconds(),
        }
    }
}

impl MetricsConfig {
    /// Create a new MetricsConfig builder
    pub fn builder() -> MetricsConfigBuilder {
        MetricsConfigBuilder::new()
    }

    /// Load metrics configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(enabled) = get_env_with_prefix("METRICS_ENABLED") {
            config.enabled = enabled.parse().unwrap_or(false);
        }

        if let Some(namespace) = get_env_with_prefix("METRICS_NAMESPACE") {
            config.namespace = namespace;
        }

        if let Some(window) = parse_env("METRICS_WINDOW_SECONDS") {
            config.window_seconds = window;
        }

        config
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Builder for MetricsConfig
#[must_use = "builder does nothing until you call build()"]
pub struct MetricsConfigBuilder {
    config: MetricsConfig,
}

impl MetricsConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MetricsConfig::default(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.config.window_seconds = window.as_secs().max(1);
        self
    }

    pub fn build(self) -> MetricsConfig {
        self.config
    }
}

impl Default for MetricsConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_enabled() -> bool {
    false // Opt-in
}

fn default_namespace() -> String {
    "tidequeue".to_string()
}

fn default_window_seconds() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.namespace, "tidequeue");
        assert_eq!(config.window(), Duration::from_secs(300));
    }

    #[test]
    fn test_builder() {
        let config = MetricsConfig::builder()
            .enabled(true)
            .namespace("billing_jobs")
            .window(Duration::from_secs(60))
            .build();

        assert!(config.enabled);
        assert_eq!(config.namespace, "billing_jobs");
        assert_eq!(config.window_seconds, 60);
    }
}
