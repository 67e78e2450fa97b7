//! Cache provider implementations.

pub mod file;
pub mod in_memory;
#[cfg(feature = "redis-backend")]
pub mod redis;

pub use file::{FileCacheConfig, FileCacheService};
pub use in_memory::{InMemoryCacheConfig, InMemoryCacheService};
#[cfg(feature = "redis-backend")]
pub use redis::{RedisCacheConfig, RedisCacheService};
