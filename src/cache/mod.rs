//! # Result Cache
//!
//! Key-value storage for task records, shared by brokers (which create and
//! read records) and workers (which complete them).
//!
//! - `CacheService`: async trait implemented by each backend
//! - `CacheProvider`: enum-dispatched handle built from a backend discriminator
//! - `TaskStore`: typed `Task` persistence on top of a provider

pub mod errors;
pub mod provider;
pub mod providers;
pub mod task_store;
pub mod traits;

pub use errors::{CacheError, CacheResult};
pub use provider::CacheProvider;
pub use providers::{FileCacheConfig, FileCacheService, InMemoryCacheConfig, InMemoryCacheService};
pub use task_store::TaskStore;
pub use traits::CacheService;

#[cfg(feature = "redis-backend")]
pub use providers::{RedisCacheConfig, RedisCacheService};
