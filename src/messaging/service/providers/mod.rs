//! Queue provider implementations.

pub mod in_memory;
#[cfg(feature = "redis-backend")]
pub mod redis;

pub use in_memory::{InMemoryQueueConfig, InMemoryQueueService};
#[cfg(feature = "redis-backend")]
pub use redis::{RedisQueueConfig, RedisQueueService};
