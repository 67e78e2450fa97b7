//! Cache service trait definition

use super::errors::CacheResult;

/// Shared key-value store for task records
///
/// Implemented by the concrete cache providers. Writes are visible to reads
/// from the same process immediately; across processes a backend converges
/// eventually. There is no transaction spanning a cache write and a queue
/// ack.
pub trait CacheService: Send + Sync {
    /// Get a value by key
    ///
    /// Returns `Ok(Some(value))` on hit, `Ok(None)` when the key is absent.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = CacheResult<Option<String>>> + Send;

    /// Store a value, replacing any previous value for the key
    fn put(
        &self,
        key: &str,
        value: &str,
    ) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    /// Delete a key; deleting an absent key succeeds
    fn delete(&self, key: &str) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    /// Check if the cache backend is reachable
    fn health_check(&self) -> impl std::future::Future<Output = CacheResult<bool>> + Send;

    /// Release the backend connection; later operations fail with `Closed`
    ///
    /// Idempotent. Clones of the handle share the closed state.
    fn close(&self) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    /// Get the name of the cache provider
    fn provider_name(&self) -> &'static str;

    /// Whether state is shared beyond this process
    fn is_distributed(&self) -> bool;
}
