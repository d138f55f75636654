//! Trait definitions for extensible components
//!
//! The store trait lets the queue run on any backend with ordered sets, TTL
//! keys and counters; the payload trait binds typed payloads to job types.

pub mod job;
pub mod store;
