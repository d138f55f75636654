//! Dead-letter hooks that record what they saw

use crate::dead_letter::{DeadLetterEntry, DeadLetterHooks, ErrorCategory};
use crate::error::Result;
use crate::jobs::Tier;
use async_trait::async_trait;
use std::sync::Mutex;

/// One recorded hook invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    JobDead {
        job_id: String,
        job_type: String,
        category: ErrorCategory,
    },
    ThresholdExceeded {
        tier: Tier,
        size: u64,
        threshold: u64,
    },
    CriticalFailure {
        job_id: String,
        job_type: String,
    },
    Cleanup {
        tier: Tier,
        removed: u64,
    },
}

/// Hooks that append every invocation to an in-memory log
#[derive(Debug, Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<HookEvent>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events, oldest first
    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Ids of dead-lettered jobs, in order
    pub fn dead_job_ids(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HookEvent::JobDead { job_id, .. } => Some(job_id),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: HookEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[async_trait]
impl DeadLetterHooks for RecordingHooks {
    async fn on_job_dead(&self, entry: &DeadLetterEntry) -> Result<()> {
        self.push(HookEvent::JobDead {
            job_id: entry.job.id.clone(),
            job_type: entry.job.job_type.clone(),
            category: entry.category,
        });
        Ok(())
    }

    async fn on_threshold_exceeded(&self, tier: Tier, size: u64, threshold: u64) -> Result<()> {
        self.push(HookEvent::ThresholdExceeded { tier, size, threshold });
        Ok(())
    }

    async fn on_critical_failure(&self, entry: &DeadLetterEntry) -> Result<()> {
        self.push(HookEvent::CriticalFailure {
            job_id: entry.job.id.clone(),
            job_type: entry.job.job_type.clone(),
        });
        Ok(())
    }

    async fn on_cleanup(&self, tier: Tier, removed: u64) -> Result<()> {
        self.push(HookEvent::Cleanup { tier, removed });
        Ok(())
    }
}
