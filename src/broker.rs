//! # Broker
//!
//! Client façade for submitting tasks and reading their outcomes.
//!
//! `create_task` writes a PENDING record to the result cache and then
//! publishes the message. It returns once the message is accepted by the
//! queue, not once it is processed; callers poll `get_task` (or use
//! `wait_for_task`) with their own deadline.
//!
//! ## Failure semantics
//!
//! The cache write always happens before the publish. If the publish fails,
//! the PENDING record stays behind and `create_task` returns
//! [`BrokerError::PublishFailed`] carrying the id, so the caller can still
//! observe (and eventually give up on) the record.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{CacheProvider, TaskStore};
use crate::config::BrokerConfig;
use crate::constants::defaults;
use crate::error::{BrokerError, BrokerResult};
use crate::logging::log_task_operation;
use crate::messaging::{QueueProvider, QueueStats, TaskMessage};
use crate::models::{Task, TaskArgs, TaskId};

#[derive(Debug)]
pub struct Broker {
    queue: QueueProvider,
    store: TaskStore,
    closed: AtomicBool,
}

impl Broker {
    /// Build a broker from `(queue_type, queue_conf, cache_type, cache_conf)`
    ///
    /// `"dummy"` selects the in-memory reference backends. Unknown or
    /// unreachable backends fail with [`BrokerError::Configuration`].
    pub async fn create(
        queue_type: &str,
        queue_conf: Option<Value>,
        cache_type: &str,
        cache_conf: Option<Value>,
    ) -> BrokerResult<Self> {
        Self::from_config(&BrokerConfig::new(
            queue_type, queue_conf, cache_type, cache_conf,
        ))
        .await
    }

    pub async fn from_config(config: &BrokerConfig) -> BrokerResult<Self> {
        config.validate()?;

        let queue =
            QueueProvider::from_backend(&config.queue.backend, config.queue.options.as_ref())
                .await?;
        let cache =
            CacheProvider::from_backend(&config.cache.backend, config.cache.options.as_ref())
                .await?;
        ensure_backends_healthy(&queue, &cache).await?;

        info!(
            queue = queue.provider_name(),
            queue_name = queue.queue_name(),
            cache = cache.provider_name(),
            "✅ Broker created"
        );

        Ok(Self {
            queue,
            store: TaskStore::new(cache, config.key_prefix.clone()),
            closed: AtomicBool::new(false),
        })
    }

    /// Submit a task; every call gets a fresh id, even for identical input
    pub async fn create_task(&self, name: &str, args: TaskArgs) -> BrokerResult<TaskId> {
        self.ensure_open()?;

        let task_id = TaskId::generate();
        let task = Task::pending(task_id.clone(), name, args.clone());
        self.store.save(&task).await?;

        let message = TaskMessage::new(task_id.clone(), name, args);
        if let Err(source) = self.queue.publish(&message).await {
            warn!(
                task_id = %task_id,
                task_name = name,
                error = %source,
                "Publish failed after PENDING record was written"
            );
            return Err(BrokerError::PublishFailed { task_id, source });
        }

        log_task_operation("create", task_id.as_str(), Some(name), "PENDING", None);
        Ok(task_id)
    }

    /// Submit a task from a JSON value (an object, or `null` for no arguments)
    pub async fn create_task_json(&self, name: &str, args: Value) -> BrokerResult<TaskId> {
        let args = TaskArgs::from_json(args)?;
        self.create_task(name, args).await
    }

    /// Read the current record; `TaskNotFound` when the id is unknown
    pub async fn get_task(&self, task_id: &TaskId) -> BrokerResult<Task> {
        self.ensure_open()?;
        self.store.load(task_id).await
    }

    /// Poll until the task is DONE or `timeout` elapses
    ///
    /// An unknown id fails immediately with `TaskNotFound`; on expiry the
    /// error is [`BrokerError::Timeout`] and the task may still complete later.
    pub async fn wait_for_task(
        &self,
        task_id: &TaskId,
        timeout: Duration,
        poll_interval: Option<Duration>,
    ) -> BrokerResult<Task> {
        let poll_interval = poll_interval
            .unwrap_or(Duration::from_millis(defaults::WAIT_POLL_INTERVAL_MS));
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            let task = self.get_task(task_id).await?;
            if task.is_done() {
                return Ok(task);
            }

            let now = Instant::now();
            if now >= deadline {
                let waited_ms = u64::try_from(now.duration_since(started).as_millis())
                    .unwrap_or(u64::MAX);
                return Err(BrokerError::Timeout {
                    task_id: task_id.clone(),
                    waited_ms,
                });
            }
            tokio::time::sleep_until((now + poll_interval).min(deadline)).await;
        }
    }

    pub async fn queue_stats(&self) -> BrokerResult<QueueStats> {
        self.ensure_open()?;
        Ok(self.queue.queue_stats().await?)
    }

    /// The queue this broker publishes to
    pub fn queue(&self) -> &QueueProvider {
        &self.queue
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release the queue and cache handles; later operations fail with `Closed`. Idempotent.
    pub async fn close(&self) -> BrokerResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Broker already closed");
            return Ok(());
        }
        self.queue.close().await?;
        self.store.cache().close().await?;
        info!(queue_name = self.queue.queue_name(), "Broker closed");
        Ok(())
    }

    fn ensure_open(&self) -> BrokerResult<()> {
        if self.is_closed() {
            Err(BrokerError::closed("broker"))
        } else {
            Ok(())
        }
    }
}

/// Fail with `Configuration` unless both backends answer their health check
pub(crate) async fn ensure_backends_healthy(
    queue: &QueueProvider,
    cache: &CacheProvider,
) -> BrokerResult<()> {
    match queue.health_check().await {
        Ok(true) => {}
        Ok(false) => {
            return Err(BrokerError::configuration(
                "queue",
                format!("{} queue backend failed its health check", queue.provider_name()),
            ))
        }
        Err(e) => return Err(BrokerError::configuration("queue", e.to_string())),
    }

    match cache.health_check().await {
        Ok(true) => Ok(()),
        Ok(false) => Err(BrokerError::configuration(
            "cache",
            format!("{} cache backend failed its health check", cache.provider_name()),
        )),
        Err(e) => Err(BrokerError::configuration("cache", e.to_string())),
    }
}
