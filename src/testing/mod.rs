//! Testing utilities for queue consumers
//!
//! This module provides:
//! - Fast tier fixtures so retries and timeouts resolve in milliseconds
//! - An in-memory queue harness with status polling
//! - Fluent assertions on stored jobs
//! - Hooks that record every dead-letter event
//!
//! # Example
//!
//! ```rust,ignore
//! use tidequeue::testing::TestQueue;
//! use tidequeue::{DispatchOptions, JobOutcome, JobStatus};
//!
//! #[tokio::test]
//! async fn test_welcome_email() {
//!     let queue = TestQueue::new();
//!     queue.handle("email.send", |_job| async { Ok(JobOutcome::ok()) }).await;
//!     queue.start().await;
//!
//!     let id = queue.dispatch("email.send", serde_json::json!({})).await;
//!     queue
//!         .await_job(&id, JobStatus::Completed)
//!         .await
//!         .has_attempts(0);
//! }
//! ```

mod fixtures;
mod harness;
mod hooks;

pub use fixtures::{fake, fast_tier, fast_tiers};
pub use harness::{JobAssert, TestQueue};
pub use hooks::{HookEvent, RecordingHooks};
