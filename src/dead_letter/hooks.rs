//! Operator callbacks fired by the dead-letter manager

use crate::dead_letter::DeadLetterEntry;
use crate::error::Result;
use crate::jobs::Tier;
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Hooks invoked when jobs are dead-lettered or the dead-letter set changes
///
/// Every method has a no-op default. Errors and panics raised by a hook are
/// logged and never reach the caller.
#[async_trait]
pub trait DeadLetterHooks: Send + Sync {
    /// A job was moved to the dead-letter set
    async fn on_job_dead(&self, _entry: &DeadLetterEntry) -> Result<()> {
        Ok(())
    }

    /// A tier's dead-letter size crossed its threshold
    async fn on_threshold_exceeded(&self, _tier: Tier, _size: u64, _threshold: u64) -> Result<()> {
        Ok(())
    }

    /// A job on the critical list was dead-lettered
    async fn on_critical_failure(&self, _entry: &DeadLetterEntry) -> Result<()> {
        Ok(())
    }

    /// Cleanup removed entries from a tier
    async fn on_cleanup(&self, _tier: Tier, _removed: u64) -> Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl DeadLetterHooks for NoopHooks {}

/// Run a hook future, swallowing its errors and panics
pub(crate) async fn run_hook<F>(hook: &'static str, fut: F)
where
    F: Future<Output = Result<()>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(hook = hook, error = %e, "Dead-letter hook failed");
        }
        Err(_) => {
            tracing::error!(hook = hook, "Dead-letter hook panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;

    #[tokio::test]
    async fn test_run_hook_swallows_errors() {
        run_hook("failing", async { Err(QueueError::internal("boom")) }).await;
    }

    async fn exploding_hook(explode: bool) -> Result<()> {
        if explode {
            panic!("hook exploded");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_run_hook_swallows_panics() {
        run_hook("panicking", exploding_hook(true)).await;
        run_hook("quiet", exploding_hook(false)).await;
    }

    #[tokio::test]
    async fn test_noop_hooks() {
        let hooks = NoopHooks;
        assert!(hooks.on_cleanup(Tier::Batch, 3).await.is_ok());
        assert!(hooks.on_threshold_exceeded(Tier::Critical, 11, 10).await.is_ok());
    }
}
