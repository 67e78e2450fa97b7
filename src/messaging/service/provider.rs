//! # Queue Provider Enum
//!
//! Enum dispatch over queue backends, plus the factory that selects a backend
//! from its discriminator string.

use std::time::Duration;

use serde_json::Value;
use tracing::info;

use super::providers::{InMemoryQueueConfig, InMemoryQueueService};
use super::traits::QueueService;
use crate::config::parse_backend_options;
use crate::constants::backends;
use crate::error::{BrokerError, BrokerResult};
use crate::messaging::errors::MessagingError;
use crate::messaging::message::{Delivery, MessageId, QueueStats, ReceiptHandle, TaskMessage};

#[cfg(feature = "redis-backend")]
use super::providers::{RedisQueueConfig, RedisQueueService};

/// Provider enum for static dispatch
///
/// # Variants
///
/// - `InMemory` - process-local reference backend (`"dummy"`, `"memory"`, `"in_memory"`)
/// - `Redis` - networked backend (`"redis"`, feature `redis-backend`)
#[derive(Debug)]
pub enum QueueProvider {
    InMemory(InMemoryQueueService),

    #[cfg(feature = "redis-backend")]
    Redis(Box<RedisQueueService>),
}

impl QueueProvider {
    /// Build and connect the backend named by `backend`
    ///
    /// Unknown discriminators, invalid options, and failed connects are all
    /// configuration errors. The caller runs the health check.
    pub async fn from_backend(backend: &str, options: Option<&Value>) -> BrokerResult<Self> {
        let provider = match backend {
            b if backends::is_in_memory(b) => {
                let config: InMemoryQueueConfig = parse_backend_options("queue", b, options)?;
                Self::InMemory(InMemoryQueueService::new(&config))
            }
            backends::REDIS => Self::connect_redis(options).await?,
            other => {
                return Err(BrokerError::configuration(
                    "queue",
                    format!("unknown queue backend '{other}'"),
                ))
            }
        };

        info!(
            backend = backend,
            provider = provider.provider_name(),
            queue = provider.queue_name(),
            "Queue backend created"
        );
        Ok(provider)
    }

    #[cfg(feature = "redis-backend")]
    async fn connect_redis(options: Option<&Value>) -> BrokerResult<Self> {
        let config: RedisQueueConfig = parse_backend_options("queue", backends::REDIS, options)?;
        let service = RedisQueueService::from_config(&config)
            .await
            .map_err(|e| BrokerError::configuration("queue", e.to_string()))?;
        Ok(Self::Redis(Box::new(service)))
    }

    #[cfg(not(feature = "redis-backend"))]
    async fn connect_redis(_options: Option<&Value>) -> BrokerResult<Self> {
        Err(BrokerError::configuration(
            "queue",
            "the 'redis' queue backend requires the `redis-backend` feature",
        ))
    }

    /// The in-memory handle, when this provider is one
    pub fn as_in_memory(&self) -> Option<&InMemoryQueueService> {
        match self {
            Self::InMemory(s) => Some(s),
            #[cfg(feature = "redis-backend")]
            _ => None,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::InMemory(s) => s.provider_name(),
            #[cfg(feature = "redis-backend")]
            Self::Redis(s) => s.provider_name(),
        }
    }

    pub fn queue_name(&self) -> &str {
        match self {
            Self::InMemory(s) => s.queue_name(),
            #[cfg(feature = "redis-backend")]
            Self::Redis(s) => s.queue_name(),
        }
    }

    pub async fn publish(&self, message: &TaskMessage) -> Result<MessageId, MessagingError> {
        match self {
            Self::InMemory(s) => s.publish(message).await,
            #[cfg(feature = "redis-backend")]
            Self::Redis(s) => s.publish(message).await,
        }
    }

    pub async fn consume(&self) -> Result<Delivery, MessagingError> {
        match self {
            Self::InMemory(s) => s.consume().await,
            #[cfg(feature = "redis-backend")]
            Self::Redis(s) => s.consume().await,
        }
    }

    pub async fn ack(&self, receipt_handle: &ReceiptHandle) -> Result<(), MessagingError> {
        match self {
            Self::InMemory(s) => s.ack(receipt_handle).await,
            #[cfg(feature = "redis-backend")]
            Self::Redis(s) => s.ack(receipt_handle).await,
        }
    }

    pub async fn nack(
        &self,
        receipt_handle: &ReceiptHandle,
        delay: Duration,
    ) -> Result<(), MessagingError> {
        match self {
            Self::InMemory(s) => s.nack(receipt_handle, delay).await,
            #[cfg(feature = "redis-backend")]
            Self::Redis(s) => s.nack(receipt_handle, delay).await,
        }
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, MessagingError> {
        match self {
            Self::InMemory(s) => s.queue_stats().await,
            #[cfg(feature = "redis-backend")]
            Self::Redis(s) => s.queue_stats().await,
        }
    }

    pub async fn health_check(&self) -> Result<bool, MessagingError> {
        match self {
            Self::InMemory(s) => s.health_check().await,
            #[cfg(feature = "redis-backend")]
            Self::Redis(s) => s.health_check().await,
        }
    }

    pub async fn close(&self) -> Result<(), MessagingError> {
        match self {
            Self::InMemory(s) => s.close().await,
            #[cfg(feature = "redis-backend")]
            Self::Redis(s) => s.close().await,
        }
    }
}
