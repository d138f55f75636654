//! Job records and submission types

use crate::dead_letter::ErrorCategory;
use crate::jobs::tier::Tier;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Retrying,
    Completed,
    /// Cancelled before it ran
    Failed,
    /// Exhausted retries and parked in the dead-letter set
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Retrying => "retrying",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Dead => "dead",
        }
    }

    /// Terminal jobs are only touched again by an operator retry
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Dead)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A background job as stored in the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    pub tier: Tier,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_retries: u32,
    /// Soft priority lane inside the tier (added to the score in seconds)
    #[serde(default)]
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Fencing token of the worker currently holding the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_token: Option<String>,
}

impl Job {
    /// Build a new pending job
    pub fn new(job_type: impl Into<String>, tier: Tier, payload: serde_json::Value, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_type: job_type.into(),
            tier,
            payload,
            idempotency_key: None,
            status: JobStatus::Pending,
            attempts: 0,
            max_retries,
            priority: 0,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            error: None,
            error_category: None,
            result: None,
            organization_id: None,
            user_id: None,
            correlation_id: None,
            lease_token: None,
        }
    }

    /// When the job becomes eligible to run
    pub fn run_at(&self) -> DateTime<Utc> {
        self.scheduled_at.unwrap_or(self.created_at)
    }

    /// Ordered-set score: lower runs first
    pub fn score(&self) -> f64 {
        priority_score(self.run_at(), self.priority)
    }

    /// Whether another attempt is allowed after a failure
    pub fn should_retry(&self) -> bool {
        self.attempts < self.max_retries
    }

    /// Status-only view
    pub fn status_record(&self) -> JobStatusRecord {
        JobStatusRecord {
            status: self.status,
            attempts: self.attempts,
            updated_at: self.updated_at,
        }
    }

    /// Reset to a fresh pending job eligible at `run_at`
    pub fn reset_for_retry(&mut self, run_at: DateTime<Utc>) {
        let now = Utc::now();
        self.status = JobStatus::Pending;
        self.attempts = 0;
        self.error = None;
        self.error_category = None;
        self.result = None;
        self.started_at = None;
        self.completed_at = None;
        self.lease_token = None;
        self.scheduled_at = Some(run_at);
        self.updated_at = now;
    }
}

/// Score = `run_at` in epoch milliseconds + `priority * 1000`
pub fn priority_score(run_at: DateTime<Utc>, priority: i64) -> f64 {
    (run_at.timestamp_millis() + priority.saturating_mul(1_000)) as f64
}

/// Small record kept next to the job for cheap status polling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusRecord {
    pub status: JobStatus,
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

/// Options for [`Dispatcher::dispatch`](crate::jobs::Dispatcher::dispatch)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchOptions {
    /// Override the job type's default tier
    pub tier: Option<Tier>,
    /// Deduplication token
    pub idempotency_key: Option<String>,
    /// Override the tier's retry budget
    pub max_retries: Option<u32>,
    /// Run after this delay
    #[serde(default, with = "optional_duration_ms")]
    pub delay: Option<std::time::Duration>,
    /// Run at this time (wins over `delay`)
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Soft priority lane inside the tier
    pub priority: Option<i64>,
    pub organization_id: Option<String>,
    pub user_id: Option<String>,
    pub correlation_id: Option<String>,
}

impl DispatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn organization_id(mut self, id: impl Into<String>) -> Self {
        self.organization_id = Some(id.into());
        self
    }

    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Resolve the scheduled time, if any
    pub(crate) fn resolve_schedule(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.scheduled_at.or_else(|| {
            self.delay
                .and_then(|d| Duration::from_std(d).ok())
                .map(|d| now + d)
        })
    }
}

mod optional_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// Result of a submission
///
/// Submission never raises: failures come back as `success = false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(default)]
    pub deduplicated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchResult {
    pub fn created(job_id: impl Into<String>, tier: Tier) -> Self {
        Self {
            success: true,
            job_id: Some(job_id.into()),
            tier: Some(tier),
            deduplicated: false,
            error: None,
        }
    }

    pub fn deduplicated(job_id: impl Into<String>) -> Self {
        Self {
            success: true,
            job_id: Some(job_id.into()),
            tier: None,
            deduplicated: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            job_id: None,
            tier: None,
            deduplicated: false,
            error: Some(error.into()),
        }
    }
}

/// What a handler reports back
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Typed classification; text rules are only used when this is absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
}

impl JobOutcome {
    pub fn ok() -> Self {
        Self { success: true, ..Default::default() }
    }

    pub fn ok_with(data: serde_json::Value) -> Self {
        Self { success: true, data: Some(data), ..Default::default() }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()), ..Default::default() }
    }

    pub fn failed_with(category: ErrorCategory, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            category: Some(category),
            data: None,
        }
    }
}
