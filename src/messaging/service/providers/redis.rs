//! # Redis Queue Service
//!
//! Networked queue for multi-process deployments. Requires the
//! `redis-backend` feature flag.
//!
//! Layout for a queue named `q`:
//!
//! - `q:pending`  LIST of message ids awaiting a consumer (RPUSH / LPOP)
//! - `q:inflight` ZSET of claimed ids scored by visibility deadline (ms)
//! - `q:payloads` HASH id -> serialized `TaskMessage`
//! - `q:meta`     HASH id -> receive count, plus `id:enqueued_at`
//! - `q:next_id`  counter for message ids
//!
//! Claim, ack and nack run as Lua scripts so a message is never held by two
//! consumers at once. Expired in-flight ids are moved back to the head of
//! `q:pending` by the claim script itself; there is no separate reaper.
//!
//! A transport error during a claim is reported as retryable: if the script
//! did run, the claimed id simply expires back to `q:pending`. A claimed
//! payload that does not decode is reported as `UndecodableMessage` with its
//! receipt, so the consumer can ack it away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::config::redact_url;
use crate::constants::defaults;
use crate::messaging::errors::MessagingError;
use crate::messaging::message::{Delivery, MessageId, QueueStats, ReceiptHandle, TaskMessage};
use crate::messaging::service::traits::QueueService;

/// Options accepted by the Redis queue
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisQueueConfig {
    pub url: String,
    pub queue_name: String,
    pub visibility_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for RedisQueueConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            queue_name: defaults::REDIS_QUEUE_NAME.to_string(),
            visibility_timeout_ms: defaults::VISIBILITY_TIMEOUT_MS,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
        }
    }
}

// KEYS: pending, inflight, payloads, meta   ARGV: now_ms, deadline_ms
const CLAIM_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for i = #expired, 1, -1 do
  redis.call('ZREM', KEYS[2], expired[i])
  redis.call('LPUSH', KEYS[1], expired[i])
end
local id = redis.call('LPOP', KEYS[1])
if not id then
  return false
end
local payload = redis.call('HGET', KEYS[3], id)
if not payload then
  return false
end
redis.call('ZADD', KEYS[2], ARGV[2], id)
local count = redis.call('HINCRBY', KEYS[4], id, 1)
local enqueued_at = redis.call('HGET', KEYS[4], id .. ':enqueued_at') or '0'
return {id, payload, tostring(count), enqueued_at}
"#;

// KEYS: inflight, payloads, meta   ARGV: id, receive_count
const ACK_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[3], ARGV[1]) ~= ARGV[2] then
  return 0
end
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('HDEL', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[3], ARGV[1], ARGV[1] .. ':enqueued_at')
return 1
"#;

// KEYS: inflight, meta   ARGV: id, receive_count, visible_at_ms
const NACK_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[2], ARGV[1]) ~= ARGV[2] then
  return 0
end
if not redis.call('ZSCORE', KEYS[1], ARGV[1]) then
  return 0
end
redis.call('ZADD', KEYS[1], ARGV[3], ARGV[1])
return 1
"#;

/// Redis-backed queue service using `ConnectionManager`
#[derive(Clone)]
pub struct RedisQueueService {
    connection_manager: redis::aio::ConnectionManager,
    queue_name: String,
    visibility_timeout: Duration,
    poll_interval: Duration,
    closed: std::sync::Arc<AtomicBool>,
}

impl std::fmt::Debug for RedisQueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueueService")
            .field("queue_name", &self.queue_name)
            .field("visibility_timeout", &self.visibility_timeout)
            .field("connection_manager", &"ConnectionManager")
            .finish()
    }
}

impl RedisQueueService {
    pub async fn from_config(config: &RedisQueueConfig) -> Result<Self, MessagingError> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            MessagingError::configuration("redis_queue", format!("Invalid Redis URL: {e}"))
        })?;

        let connection_manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| {
                MessagingError::connection("redis", format!("Failed to connect to Redis: {e}"))
            })?;

        debug!(
            url = %redact_url(&config.url),
            queue = %config.queue_name,
            "Redis queue service connected"
        );

        Ok(Self {
            connection_manager,
            queue_name: config.queue_name.clone(),
            visibility_timeout: Duration::from_millis(config.visibility_timeout_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            closed: std::sync::Arc::new(AtomicBool::new(false)),
        })
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.queue_name, suffix)
    }

    fn ensure_open(&self) -> Result<(), MessagingError> {
        if self.closed.load(Ordering::Acquire) {
            Err(MessagingError::closed(&self.queue_name))
        } else {
            Ok(())
        }
    }

    fn parse_receipt(&self, receipt_handle: &ReceiptHandle) -> Result<(String, u32), MessagingError> {
        receipt_handle
            .parse_claim()
            .map(|(id, count)| (id.to_string(), count))
            .ok_or_else(|| MessagingError::invalid_receipt(&self.queue_name, receipt_handle.as_str()))
    }

    /// One claim attempt; `None` when nothing is visible
    async fn try_claim(&self) -> Result<Option<Delivery>, MessagingError> {
        let mut conn = self.connection_manager.clone();
        let now = now_ms();
        let deadline = now + self.visibility_timeout.as_millis() as u64;

        let claimed: Option<(String, String, u32, i64)> = redis::Script::new(CLAIM_SCRIPT)
            .key(self.key("pending"))
            .key(self.key("inflight"))
            .key(self.key("payloads"))
            .key(self.key("meta"))
            .arg(now)
            .arg(deadline)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| MessagingError::from_redis(&self.queue_name, "claim", e))?;

        let Some((id, payload, receive_count, enqueued_ms)) = claimed else {
            return Ok(None);
        };

        let receipt_handle = ReceiptHandle::for_claim(&id, receive_count);
        let message = match TaskMessage::from_bytes(payload.as_bytes()) {
            Ok(message) => message,
            Err(e) => {
                return Err(MessagingError::undecodable_message(
                    &self.queue_name,
                    receipt_handle,
                    format!("{e}; payload: {payload}"),
                ))
            }
        };

        Ok(Some(Delivery {
            receipt_handle,
            message,
            receive_count,
            enqueued_at: Utc
                .timestamp_millis_opt(enqueued_ms)
                .single()
                .unwrap_or_else(Utc::now),
        }))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl QueueService for RedisQueueService {
    async fn publish(&self, message: &TaskMessage) -> Result<MessageId, MessagingError> {
        self.ensure_open()?;
        let payload = String::from_utf8(message.to_bytes()?)
            .map_err(|e| MessagingError::message_serialization(e.to_string()))?;
        let mut conn = self.connection_manager.clone();

        let id: u64 = redis::cmd("INCR")
            .arg(self.key("next_id"))
            .query_async(&mut conn)
            .await
            .map_err(|e| MessagingError::from_redis(&self.queue_name, "publish", e))?;

        redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(self.key("payloads"))
            .arg(id)
            .arg(payload)
            .ignore()
            .cmd("HSET")
            .arg(self.key("meta"))
            .arg(format!("{id}:enqueued_at"))
            .arg(Utc::now().timestamp_millis())
            .ignore()
            .cmd("RPUSH")
            .arg(self.key("pending"))
            .arg(id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| MessagingError::from_redis(&self.queue_name, "publish", e))?;

        debug!(
            queue = %self.queue_name,
            message_id = id,
            task_id = %message.task_id,
            "Message published"
        );
        Ok(MessageId::from(id))
    }

    async fn consume(&self) -> Result<Delivery, MessagingError> {
        loop {
            self.ensure_open()?;
            if let Some(delivery) = self.try_claim().await? {
                return Ok(delivery);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn ack(&self, receipt_handle: &ReceiptHandle) -> Result<(), MessagingError> {
        self.ensure_open()?;
        let (id, receive_count) = self.parse_receipt(receipt_handle)?;
        let mut conn = self.connection_manager.clone();

        let removed: i64 = redis::Script::new(ACK_SCRIPT)
            .key(self.key("inflight"))
            .key(self.key("payloads"))
            .key(self.key("meta"))
            .arg(&id)
            .arg(receive_count)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| MessagingError::from_redis(&self.queue_name, "ack", e))?;

        if removed == 1 {
            Ok(())
        } else {
            Err(MessagingError::invalid_receipt(&self.queue_name, receipt_handle.as_str()))
        }
    }

    async fn nack(
        &self,
        receipt_handle: &ReceiptHandle,
        delay: Duration,
    ) -> Result<(), MessagingError> {
        self.ensure_open()?;
        let (id, receive_count) = self.parse_receipt(receipt_handle)?;
        let mut conn = self.connection_manager.clone();
        let visible_at = now_ms() + delay.as_millis() as u64;

        let updated: i64 = redis::Script::new(NACK_SCRIPT)
            .key(self.key("inflight"))
            .key(self.key("meta"))
            .arg(&id)
            .arg(receive_count)
            .arg(visible_at)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| MessagingError::from_redis(&self.queue_name, "nack", e))?;

        if updated == 1 {
            Ok(())
        } else {
            Err(MessagingError::invalid_receipt(&self.queue_name, receipt_handle.as_str()))
        }
    }

    async fn queue_stats(&self) -> Result<QueueStats, MessagingError> {
        let mut conn = self.connection_manager.clone();
        let (pending, in_flight): (u64, u64) = redis::pipe()
            .cmd("LLEN")
            .arg(self.key("pending"))
            .cmd("ZCARD")
            .arg(self.key("inflight"))
            .query_async(&mut conn)
            .await
            .map_err(|e| MessagingError::from_redis(&self.queue_name, "stats", e))?;

        Ok(QueueStats::new(&self.queue_name, pending + in_flight).with_in_flight_count(in_flight))
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        let mut conn = self.connection_manager.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| MessagingError::connection("redis", format!("Redis PING failed: {e}")))?;

        Ok(pong == "PONG" && !self.closed.load(Ordering::Acquire))
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(queue = %self.queue_name, "Redis queue handle closed");
        }
        Ok(())
    }

    fn queue_name(&self) -> &str {
        &self.queue_name
    }

    fn provider_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskArgs, TaskId};
    use tracing::warn;

    #[test]
    fn test_default_config() {
        let config = RedisQueueConfig::default();
        assert_eq!(config.queue_name, "tasker:tasks");
        assert_eq!(config.visibility_timeout_ms, 30_000);
    }

    #[test]
    fn test_partial_options_fill_defaults() {
        let config: RedisQueueConfig =
            serde_json::from_value(serde_json::json!({"url": "redis://cache:6379"})).unwrap();
        assert_eq!(config.url, "redis://cache:6379");
        assert_eq!(config.poll_interval_ms, 100);
    }

    async fn connect() -> Option<RedisQueueService> {
        let url = std::env::var("REDIS_URL").ok()?;
        let config = RedisQueueConfig {
            url,
            queue_name: format!("tasker-test:{}", uuid::Uuid::new_v4()),
            visibility_timeout_ms: 100,
            poll_interval_ms: 10,
        };
        match RedisQueueService::from_config(&config).await {
            Ok(service) => Some(service),
            Err(e) => {
                warn!("Skipping Redis queue test: {e}");
                None
            }
        }
    }

    #[tokio::test]
    async fn test_redis_publish_consume_ack() {
        let Some(queue) = connect().await else {
            return;
        };
        let sent = TaskMessage::new(TaskId::generate(), "addition", TaskArgs::new().with("x", 1));
        queue.publish(&sent).await.unwrap();

        let delivery = queue.consume().await.unwrap();
        assert_eq!(delivery.message, sent);
        queue.ack(&delivery.receipt_handle).await.unwrap();

        let stats = queue.queue_stats().await.unwrap();
        assert_eq!(stats.message_count, 0);
    }

    #[tokio::test]
    async fn test_redis_redelivery_after_visibility_timeout() {
        let Some(queue) = connect().await else {
            return;
        };
        let sent = TaskMessage::new(TaskId::generate(), "slow", TaskArgs::new());
        queue.publish(&sent).await.unwrap();

        let first = queue.consume().await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), queue.consume())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.receive_count, 2);
        assert!(queue.ack(&first.receipt_handle).await.is_err());
        queue.ack(&second.receipt_handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_redis_undecodable_payload_carries_receipt() {
        let Some(queue) = connect().await else {
            return;
        };
        let mut conn = queue.connection_manager.clone();
        redis::pipe()
            .cmd("HSET")
            .arg(queue.key("payloads"))
            .arg(1)
            .arg("not a task")
            .ignore()
            .cmd("RPUSH")
            .arg(queue.key("pending"))
            .arg(1)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .unwrap();

        let receipt_handle = match queue.consume().await {
            Err(MessagingError::UndecodableMessage { receipt_handle, .. }) => receipt_handle,
            other => panic!("expected UndecodableMessage, got {other:?}"),
        };
        queue.ack(&receipt_handle).await.unwrap();
        assert_eq!(queue.queue_stats().await.unwrap().message_count, 0);
    }
}
