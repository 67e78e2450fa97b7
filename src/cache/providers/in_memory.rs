//! In-memory cache provider
//!
//! Process-wide maps keyed by `name`: every handle created with the same name
//! reads and writes the same map. No eviction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::Deserialize;
use tracing::debug;

use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::traits::CacheService;
use crate::constants::defaults;

/// Options accepted by the in-memory cache (`null` selects all defaults)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InMemoryCacheConfig {
    pub name: String,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self {
            name: defaults::IN_MEMORY_NAME.to_string(),
        }
    }
}

type Store = DashMap<String, String>;

fn stores() -> &'static DashMap<String, Arc<Store>> {
    static STORES: OnceLock<DashMap<String, Arc<Store>>> = OnceLock::new();
    STORES.get_or_init(DashMap::new)
}

/// Handle onto a shared in-process map
#[derive(Debug, Clone)]
pub struct InMemoryCacheService {
    name: String,
    store: Arc<Store>,
    closed: Arc<AtomicBool>,
}

impl InMemoryCacheService {
    pub fn new(config: &InMemoryCacheConfig) -> Self {
        let store = stores()
            .entry(config.name.clone())
            .or_insert_with(|| Arc::new(DashMap::new()))
            .value()
            .clone();
        debug!(name = %config.name, "In-memory cache handle created");
        Self {
            name: config.name.clone(),
            store,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn ensure_open(&self) -> CacheResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(CacheError::Closed("in_memory"))
        } else {
            Ok(())
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl CacheService for InMemoryCacheService {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.ensure_open()?;
        Ok(self.store.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, value: &str) -> CacheResult<()> {
        self.ensure_open()?;
        self.store.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.ensure_open()?;
        self.store.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(!self.closed.load(Ordering::Acquire))
    }

    async fn close(&self) -> CacheResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(name = %self.name, "In-memory cache handle closed");
        }
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }

    fn is_distributed(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique() -> InMemoryCacheConfig {
        InMemoryCacheConfig {
            name: format!("cache-test-{}", uuid::Uuid::new_v4()),
        }
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let cache = InMemoryCacheService::new(&unique());
        assert_eq!(cache.get("k").await.unwrap(), None);

        cache.put("k", "v1").await.unwrap();
        cache.put("k", "v2").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v2"));

        cache.delete("k").await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_same_name_shares_state() {
        let config = unique();
        let writer = InMemoryCacheService::new(&config);
        let reader = InMemoryCacheService::new(&config);
        let stranger = InMemoryCacheService::new(&unique());

        writer.put("shared", "yes").await.unwrap();
        assert_eq!(reader.get("shared").await.unwrap().as_deref(), Some("yes"));
        assert_eq!(stranger.get("shared").await.unwrap(), None);
        assert!(!reader.is_distributed());

        // Closing one handle leaves the map and other handles intact
        writer.close().await.unwrap();
        assert!(matches!(writer.put("k", "v").await, Err(CacheError::Closed(_))));
        assert_eq!(reader.get("shared").await.unwrap().as_deref(), Some("yes"));
    }
}
