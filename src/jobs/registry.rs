//! Handler registry for mapping job types to handler functions
//!
//! Registration is validated against the tier registry, so a typo in a job
//! type fails at startup instead of dead-lettering the first job that uses it.

use crate::error::{QueueError, Result};
use crate::jobs::job::{Job, JobOutcome};
use crate::jobs::tier::TierRegistry;
use crate::traits::job::JobPayload;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Type alias for job handler functions
///
/// Handlers receive the whole [`Job`] and report a [`JobOutcome`]. Returning
/// `Err` (or panicking) counts as a failed outcome.
pub type JobHandler = Arc<dyn Fn(Job) -> BoxFuture<'static, Result<JobOutcome>> + Send + Sync>;

/// Registry for mapping job types to their handlers
#[derive(Clone)]
pub struct HandlerRegistry {
    tiers: TierRegistry,
    handlers: Arc<tokio::sync::RwLock<HashMap<String, JobHandler>>>,
}

impl HandlerRegistry {
    /// Create a new empty registry validating against `tiers`
    pub fn new(tiers: TierRegistry) -> Self {
        Self {
            tiers,
            handlers: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        }
    }

    /// Register a job type with its handler function
    ///
    /// Fails with a configuration error when the job type has no tier mapping.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// registry.register("email.send", |job| {
    ///     Box::pin(async move {
    ///         let email: SendEmail = serde_json::from_value(job.payload)?;
    ///         mailer.send(email).await?;
    ///         Ok(JobOutcome::ok())
    ///     })
    /// }).await?;
    /// ```
    pub async fn register<F>(&self, job_type: &str, handler: F) -> Result<()>
    where
        F: Fn(Job) -> BoxFuture<'static, Result<JobOutcome>> + Send + Sync + 'static,
    {
        if !self.tiers.is_known(job_type) {
            return Err(QueueError::configuration(format!(
                "Cannot register handler for unknown job type: {}",
                job_type
            )));
        }

        let handler: JobHandler = Arc::new(handler);
        let mut handlers = self.handlers.write().await;
        if handlers.insert(job_type.to_string(), handler).is_some() {
            tracing::warn!(job_type = %job_type, "Replaced existing job handler");
        } else {
            tracing::debug!(job_type = %job_type, "Registered job handler");
        }
        Ok(())
    }

    /// Register a handler that receives the deserialized payload
    pub async fn register_payload<P, F, Fut>(&self, handler: F) -> Result<()>
    where
        P: JobPayload + DeserializeOwned + 'static,
        F: Fn(P, Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JobOutcome>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register(P::JOB_TYPE, move |job: Job| {
            let handler = handler.clone();
            Box::pin(async move {
                let payload: P = serde_json::from_value(job.payload.clone())?;
                handler(payload, job).await
            })
        })
        .await
    }

    /// Handler for a job type, if registered
    pub async fn get(&self, job_type: &str) -> Option<JobHandler> {
        let handlers = self.handlers.read().await;
        handlers.get(job_type).cloned()
    }

    /// Check if a job type is registered
    pub async fn is_registered(&self, job_type: &str) -> bool {
        let handlers = self.handlers.read().await;
        handlers.contains_key(job_type)
    }

    /// Get all registered job types, sorted
    pub async fn registered_types(&self) -> Vec<String> {
        let handlers = self.handlers.read().await;
        let mut types: Vec<String> = handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Mapped job types that have no handler yet, sorted
    pub async fn missing_handlers(&self) -> Vec<String> {
        let handlers = self.handlers.read().await;
        self.tiers
            .job_types()
            .filter(|t| !handlers.contains_key(*t))
            .map(str::to_string)
            .collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new(TierRegistry::default())
    }
}
