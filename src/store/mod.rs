//! Queue store backends.
//!
//! Provides an in-memory store by default, with optional Redis support
//! via the `redis` feature.

mod in_memory;

#[cfg(feature = "redis")]
mod redis;

pub use in_memory::InMemoryStore;

#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
