/// The main error type for tidequeue
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Queue not configured")]
    NotConfigured,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Job timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl QueueError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error came from the backing store.
    ///
    /// The dispatcher reports these as "queue not configured"; worker loops
    /// and dead-letter sweeps log them and try again on the next tick.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_) | Self::NotConfigured)
    }
}

/// Result type alias for tidequeue operations
pub type Result<T> = std::result::Result<T, QueueError>;

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Store(format!("Redis error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = QueueError::not_found("job abc");
        assert!(matches!(err, QueueError::NotFound(_)));
        assert_eq!(err.to_string(), "Not found: job abc");
    }

    #[test]
    fn test_invalid_state_error() {
        let err = QueueError::invalid_state("job is completed");
        assert_eq!(err.to_string(), "Invalid state: job is completed");
    }

    #[test]
    fn test_timeout_display() {
        let err = QueueError::Timeout(std::time::Duration::from_secs(30));
        assert_eq!(err.to_string(), "Job timed out after 30s");
    }

    #[test]
    fn test_is_store() {
        assert!(QueueError::store("connection refused").is_store());
        assert!(QueueError::NotConfigured.is_store());
        assert!(!QueueError::internal("boom").is_store());
    }

    #[test]
    fn test_from_serde_json() {
        let err: QueueError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, QueueError::Serialization(_)));
    }

    #[test]
    fn test_from_anyhow() {
        let err: QueueError = anyhow::anyhow!("wrapped").into();
        assert_eq!(err.to_string(), "wrapped");
    }
}
