//! Redis cache provider
//!
//! Uses `redis::aio::ConnectionManager` for async multiplexed connections.
//! Requires the `redis-backend` feature flag.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::traits::CacheService;
use crate::config::redact_url;

/// Options accepted by the Redis cache
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisCacheConfig {
    pub url: String,
    /// Expire records after this many seconds; `None` keeps them forever
    pub ttl_seconds: Option<u64>,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            ttl_seconds: None,
        }
    }
}

/// Redis-backed cache service using ConnectionManager
///
/// Clones share one connection slot; `close` empties it for all of them.
#[derive(Clone)]
pub struct RedisCacheService {
    connection: Arc<RwLock<Option<redis::aio::ConnectionManager>>>,
    ttl_seconds: Option<u64>,
}

impl std::fmt::Debug for RedisCacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheService")
            .field("connected", &self.connection.read().is_some())
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

impl RedisCacheService {
    /// Create a new Redis cache service from configuration
    pub async fn from_config(config: &RedisCacheConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            CacheError::ConnectionError(format!("Failed to create Redis client: {}", e))
        })?;

        let connection_manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| {
                CacheError::ConnectionError(format!("Failed to connect to Redis: {}", e))
            })?;

        debug!(url = %redact_url(&config.url), "Redis cache service connected");

        Ok(Self {
            connection: Arc::new(RwLock::new(Some(connection_manager))),
            ttl_seconds: config.ttl_seconds,
        })
    }

    fn connection(&self) -> CacheResult<redis::aio::ConnectionManager> {
        self.connection
            .read()
            .clone()
            .ok_or(CacheError::Closed("redis"))
    }
}

fn map_redis_error(command: &str, err: redis::RedisError) -> CacheError {
    if err.is_timeout() {
        CacheError::Timeout(format!("Redis {command}: {err}"))
    } else if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
        CacheError::ConnectionError(format!("Redis {command} failed: {err}"))
    } else {
        CacheError::BackendError(format!("Redis {command} failed: {err}"))
    }
}

impl CacheService for RedisCacheService {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection()?;
        let result: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("GET", e))?;

        Ok(result)
    }

    async fn put(&self, key: &str, value: &str) -> CacheResult<()> {
        let mut conn = self.connection()?;

        match self.ttl_seconds {
            Some(ttl) => redis::cmd("SETEX")
                .arg(key)
                .arg(ttl.max(1))
                .arg(value)
                .query_async::<()>(&mut conn)
                .await
                .map_err(|e| map_redis_error("SETEX", e))?,
            None => redis::cmd("SET")
                .arg(key)
                .arg(value)
                .query_async::<()>(&mut conn)
                .await
                .map_err(|e| map_redis_error("SET", e))?,
        }

        debug!(key = key, ttl_seconds = ?self.ttl_seconds, "Cache SET");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.connection()?;

        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| map_redis_error("DEL", e))?;

        Ok(())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let Ok(mut conn) = self.connection() else {
            return Ok(false);
        };
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::ConnectionError(format!("Redis PING failed: {}", e)))?;

        Ok(pong == "PONG")
    }

    async fn close(&self) -> CacheResult<()> {
        if self.connection.write().take().is_some() {
            debug!("Redis cache connection released");
        }
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "redis"
    }

    fn is_distributed(&self) -> bool {
        true
    }
}
