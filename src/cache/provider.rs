//! Cache provider
//!
//! Uses enum dispatch (like `QueueProvider`) over the concrete cache services.
//! Consumers hold a `CacheProvider` and never see the backend type.

use serde_json::Value;
use tracing::info;

use super::errors::CacheResult;
use super::providers::{
    FileCacheConfig, FileCacheService, InMemoryCacheConfig, InMemoryCacheService,
};
use super::traits::CacheService;
use crate::config::parse_backend_options;
use crate::constants::backends;
use crate::error::{BrokerError, BrokerResult};

#[cfg(feature = "redis-backend")]
use super::providers::{RedisCacheConfig, RedisCacheService};

/// Internal cache backend enum for static dispatch
#[derive(Debug, Clone)]
enum CacheBackend {
    InMemory(InMemoryCacheService),

    File(FileCacheService),

    /// Boxed to reduce enum size
    #[cfg(feature = "redis-backend")]
    Redis(Box<RedisCacheService>),
}

impl CacheBackend {
    fn provider_name(&self) -> &'static str {
        match self {
            Self::InMemory(s) => s.provider_name(),
            Self::File(s) => s.provider_name(),
            #[cfg(feature = "redis-backend")]
            Self::Redis(s) => s.provider_name(),
        }
    }

    fn is_distributed(&self) -> bool {
        match self {
            Self::InMemory(s) => s.is_distributed(),
            Self::File(s) => s.is_distributed(),
            #[cfg(feature = "redis-backend")]
            Self::Redis(s) => s.is_distributed(),
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        match self {
            Self::InMemory(s) => s.get(key).await,
            Self::File(s) => s.get(key).await,
            #[cfg(feature = "redis-backend")]
            Self::Redis(s) => s.get(key).await,
        }
    }

    async fn put(&self, key: &str, value: &str) -> CacheResult<()> {
        match self {
            Self::InMemory(s) => s.put(key, value).await,
            Self::File(s) => s.put(key, value).await,
            #[cfg(feature = "redis-backend")]
            Self::Redis(s) => s.put(key, value).await,
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        match self {
            Self::InMemory(s) => s.delete(key).await,
            Self::File(s) => s.delete(key).await,
            #[cfg(feature = "redis-backend")]
            Self::Redis(s) => s.delete(key).await,
        }
    }

    async fn health_check(&self) -> CacheResult<bool> {
        match self {
            Self::InMemory(s) => s.health_check().await,
            Self::File(s) => s.health_check().await,
            #[cfg(feature = "redis-backend")]
            Self::Redis(s) => s.health_check().await,
        }
    }

    async fn close(&self) -> CacheResult<()> {
        match self {
            Self::InMemory(s) => s.close().await,
            Self::File(s) => s.close().await,
            #[cfg(feature = "redis-backend")]
            Self::Redis(s) => s.close().await,
        }
    }
}

/// Unified cache handle held by brokers and workers
///
/// ## Backends
///
/// - **in_memory** (`"dummy"`, `"memory"`, `"in_memory"`): shared in-process map
/// - **file** (`"file"`): one JSON document per key in a directory
/// - **redis** (`"redis"`, feature `redis-backend`): networked, optional TTL
#[derive(Debug, Clone)]
pub struct CacheProvider {
    backend: CacheBackend,
}

impl CacheProvider {
    /// Build and connect the backend named by `backend`
    ///
    /// Unknown discriminators, invalid options, and failed connects are all
    /// configuration errors. There is no fallback backend.
    pub async fn from_backend(backend: &str, options: Option<&Value>) -> BrokerResult<Self> {
        let backend_impl = match backend {
            b if backends::is_in_memory(b) => {
                let config: InMemoryCacheConfig = parse_backend_options("cache", b, options)?;
                CacheBackend::InMemory(InMemoryCacheService::new(&config))
            }
            backends::FILE => {
                let config: FileCacheConfig = parse_backend_options("cache", backend, options)?;
                let service = FileCacheService::from_config(&config)
                    .await
                    .map_err(|e| BrokerError::configuration("cache", e.to_string()))?;
                CacheBackend::File(service)
            }
            backends::REDIS => Self::connect_redis(options).await?,
            other => {
                return Err(BrokerError::configuration(
                    "cache",
                    format!("unknown cache backend '{other}'"),
                ))
            }
        };

        let provider = Self {
            backend: backend_impl,
        };
        info!(
            backend = backend,
            provider = provider.provider_name(),
            distributed = provider.is_distributed(),
            "Cache backend created"
        );
        Ok(provider)
    }

    #[cfg(feature = "redis-backend")]
    async fn connect_redis(options: Option<&Value>) -> BrokerResult<CacheBackend> {
        let config: RedisCacheConfig = parse_backend_options("cache", backends::REDIS, options)?;
        let service = RedisCacheService::from_config(&config)
            .await
            .map_err(|e| BrokerError::configuration("cache", e.to_string()))?;
        Ok(CacheBackend::Redis(Box::new(service)))
    }

    #[cfg(not(feature = "redis-backend"))]
    async fn connect_redis(_options: Option<&Value>) -> BrokerResult<CacheBackend> {
        Err(BrokerError::configuration(
            "cache",
            "the 'redis' cache backend requires the `redis-backend` feature",
        ))
    }

    /// An in-memory provider for the named map
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            backend: CacheBackend::InMemory(InMemoryCacheService::new(&InMemoryCacheConfig {
                name: name.into(),
            })),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.backend.provider_name()
    }

    pub fn is_distributed(&self) -> bool {
        self.backend.is_distributed()
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.backend.get(key).await
    }

    pub async fn put(&self, key: &str, value: &str) -> CacheResult<()> {
        self.backend.put(key, value).await
    }

    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        self.backend.delete(key).await
    }

    pub async fn health_check(&self) -> CacheResult<bool> {
        self.backend.health_check().await
    }

    /// Release the backend; shared with every clone of this provider
    pub async fn close(&self) -> CacheResult<()> {
        self.backend.close().await
    }
}
