//! # Queue Service
//!
//! The `QueueService` trait, its providers, and the `QueueProvider` enum that
//! the broker and worker hold.

pub mod provider;
pub mod providers;
pub mod traits;

pub use provider::QueueProvider;
pub use providers::{InMemoryQueueConfig, InMemoryQueueService};
pub use traits::QueueService;

#[cfg(feature = "redis-backend")]
pub use providers::{RedisQueueConfig, RedisQueueService};
