//! # Worker
//!
//! Consumes task messages from the queue, runs the registered handler, and
//! writes the outcome to the result cache.
//!
//! ## Lifecycle
//!
//! ```text
//! create ──> register_handler* ──> start ──> (consumption loop) ──> close
//!                                    │
//!                                    └─ registry frozen; later registration fails
//! ```
//!
//! The loop acquires a handler permit before every receive, so a worker never
//! holds more in-flight messages than `max_concurrent_handlers`.
//!
//! ## Receive errors
//!
//! - A claimed message lost in transit (`ReceiveFailed`) ends the loop with
//!   the error. The message stays un-acked and is redelivered to any consumer,
//!   including this worker once it is started again.
//! - Retryable transport errors back off and keep consuming.
//! - An undecodable payload is logged and acked so it cannot stall the pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::dispatch::{Dispatcher, WorkerStats, WorkerStatsSnapshot};
use crate::broker::ensure_backends_healthy;
use crate::cache::{CacheProvider, TaskStore};
use crate::config::{BrokerConfig, WorkerSettings};
use crate::error::{BrokerError, BrokerResult};
use crate::messaging::{MessagingError, QueueProvider, ReceiptHandle};
use crate::models::TaskArgs;
use crate::registry::{BlockingFnHandler, FnHandler, HandlerError, HandlerRegistry, TaskHandler};

pub struct Worker {
    worker_id: String,
    queue: Arc<QueueProvider>,
    store: TaskStore,
    settings: WorkerSettings,
    registry: HandlerRegistry,
    stats: Arc<WorkerStats>,
    permits: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
    started: Arc<AtomicBool>,
    closed: AtomicBool,
    loop_handle: Mutex<Option<JoinHandle<BrokerResult<()>>>>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("worker_id", &self.worker_id)
            .field("queue", &self.queue.provider_name())
            .field("cache", &self.store.cache().provider_name())
            .field("handlers", &self.registry.registered_handlers())
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Worker {
    /// Build a worker from `(queue_type, queue_conf, cache_type, cache_conf)`
    ///
    /// A broker built from the same four values observes the same queue and cache.
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

        let worker_id = format!("worker-{}", uuid::Uuid::new_v4());
        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            worker_id = %worker_id,
            queue = queue.provider_name(),
            cache = cache.provider_name(),
            max_concurrent_handlers = config.worker.max_concurrent_handlers,
            "🚀 Worker created"
        );

        Ok(Self {
            worker_id,
            queue: Arc::new(queue),
            store: TaskStore::new(cache, config.key_prefix.clone()),
            permits: Arc::new(Semaphore::new(config.worker.max_concurrent_handlers)),
            settings: config.worker.clone(),
            registry: HandlerRegistry::new(),
            stats: Arc::new(WorkerStats::default()),
            shutdown_tx,
            started: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// The queue this worker consumes from
    pub fn queue(&self) -> &QueueProvider {
        &self.queue
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Register under the handler's own name, replacing any previous registration
    pub fn register_handler(&mut self, handler: Arc<dyn TaskHandler>) -> BrokerResult<()> {
        self.ensure_registrable()?;
        self.registry.register(handler);
        Ok(())
    }

    /// Register under an explicit task name
    pub fn register_handler_as(
        &mut self,
        task_name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> BrokerResult<()> {
        self.ensure_registrable()?;
        self.registry.register_as(task_name, handler);
        Ok(())
    }

    /// Register an async closure
    pub fn register_fn<F, Fut>(&mut self, task_name: impl Into<String>, func: F) -> BrokerResult<()>
    where
        F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let task_name = task_name.into();
        self.register_handler(Arc::new(FnHandler::new(task_name, func)))
    }

    /// Register a synchronous closure, run on the blocking pool
    pub fn register_blocking_fn<F>(
        &mut self,
        task_name: impl Into<String>,
        func: F,
    ) -> BrokerResult<()>
    where
        F: Fn(TaskArgs) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        let task_name = task_name.into();
        self.register_handler(Arc::new(BlockingFnHandler::new(task_name, func)))
    }

    fn ensure_registrable(&self) -> BrokerResult<()> {
        if self.is_closed() {
            return Err(BrokerError::closed("worker"));
        }
        if self.is_started() {
            return Err(BrokerError::WorkerAlreadyStarted {
                worker_id: self.worker_id.clone(),
            });
        }
        Ok(())
    }

    /// Start the consumption loop on a background task
    ///
    /// Use [`Worker::join`] to observe how the loop ended, or
    /// [`Worker::close`] to stop it. Once a loop has ended (for example on a
    /// receive failure) the worker may be started again.
    pub fn start(&self) -> BrokerResult<()> {
        let consumption = self.begin()?;
        let handle = tokio::spawn(consumption.run());
        *self.loop_handle.lock() = Some(handle);
        Ok(())
    }

    /// Run the consumption loop on the current task until shutdown or a receive failure
    pub async fn run(&self) -> BrokerResult<()> {
        self.begin()?.run().await
    }

    /// Wait for a loop started with [`Worker::start`] to end
    pub async fn join(&self) -> BrokerResult<()> {
        let handle = self.loop_handle.lock().take();
        match handle {
            Some(handle) => flatten_join(handle.await),
            None => Ok(()),
        }
    }

    fn begin(&self) -> BrokerResult<ConsumptionLoop> {
        if self.is_closed() {
            return Err(BrokerError::closed("worker"));
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(BrokerError::WorkerAlreadyStarted {
                worker_id: self.worker_id.clone(),
            });
        }

        info!(
            worker_id = %self.worker_id,
            handlers = ?self.registry.registered_handlers(),
            "▶️ Worker starting consumption loop"
        );

        let dispatcher = Dispatcher::new(
            self.worker_id.clone(),
            Arc::clone(&self.queue),
            self.store.clone(),
            Arc::new(self.registry.clone()),
            self.settings.clone(),
            Arc::clone(&self.stats),
        );

        Ok(ConsumptionLoop {
            worker_id: self.worker_id.clone(),
            dispatcher: Arc::new(dispatcher),
            permits: Arc::clone(&self.permits),
            shutdown_rx: self.shutdown_tx.subscribe(),
            settings: self.settings.clone(),
            _running: RunningFlag(Arc::clone(&self.started)),
        })
    }

    /// Stop the loop, wait for in-flight deliveries, and release the queue and cache handles
    ///
    /// Waiting is bounded by `shutdown_timeout_ms`; deliveries still running
    /// after that are abandoned un-acked and will be redelivered. Idempotent.
    pub async fn close(&self) -> BrokerResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!(worker_id = %self.worker_id, "Worker already closed");
            return Ok(());
        }

        info!(worker_id = %self.worker_id, "🛑 Worker shutting down");
        let _ = self.shutdown_tx.send(());

        let deadline = Instant::now() + self.settings.shutdown_timeout();
        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(joined) => {
                    if let Err(e) = flatten_join(joined) {
                        warn!(worker_id = %self.worker_id, error = %e, "Consumption loop had ended with an error");
                    }
                }
                Err(_) => warn!(worker_id = %self.worker_id, "Consumption loop did not stop before the shutdown timeout"),
            }
        }

        let capacity = u32::try_from(self.settings.max_concurrent_handlers).unwrap_or(u32::MAX);
        match tokio::time::timeout_at(deadline, self.permits.acquire_many(capacity)).await {
            Ok(_) => debug!(worker_id = %self.worker_id, "In-flight deliveries drained"),
            Err(_) => warn!(
                worker_id = %self.worker_id,
                timeout_ms = self.settings.shutdown_timeout_ms,
                "Abandoning in-flight deliveries at shutdown timeout"
            ),
        }
        self.permits.close();

        self.queue.close().await?;
        self.store.cache().close().await?;
        info!(worker_id = %self.worker_id, stats = ?self.stats(), "✅ Worker closed");
        Ok(())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Marks the worker as started for as long as its loop is alive
struct RunningFlag(Arc<AtomicBool>);

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Everything the running loop needs, detached from the `Worker` so it can be spawned
struct ConsumptionLoop {
    worker_id: String,
    dispatcher: Arc<Dispatcher>,
    permits: Arc<Semaphore>,
    shutdown_rx: broadcast::Receiver<()>,
    settings: WorkerSettings,
    _running: RunningFlag,
}

impl ConsumptionLoop {
    async fn run(mut self) -> BrokerResult<()> {
        let mut consecutive_errors: u32 = 0;

        loop {
            let permit = tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => break,
                received = self.dispatcher.queue().consume() => received,
            };

            match received {
                Ok(delivery) => {
                    consecutive_errors = 0;
                    let dispatcher = Arc::clone(&self.dispatcher);
                    tokio::spawn(async move {
                        dispatcher.dispatch(delivery).await;
                        drop(permit);
                    });
                }
                Err(MessagingError::Closed { .. }) => break,
                Err(MessagingError::UndecodableMessage {
                    receipt_handle,
                    message,
                    ..
                }) => {
                    consecutive_errors = 0;
                    self.discard(&receipt_handle, &message).await;
                }
                Err(e) if e.is_retryable() => {
                    drop(permit);
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    let backoff = self.settings.receive_backoff(consecutive_errors);
                    warn!(
                        worker_id = %self.worker_id,
                        error = %e,
                        attempt = consecutive_errors,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        "Receive error; retrying after backoff"
                    );
                    tokio::select! {
                        biased;
                        _ = self.shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => {
                    if e.is_receive_failure() {
                        error!(
                            worker_id = %self.worker_id,
                            error = %e,
                            "💥 Receive failed; stopping worker, message left for redelivery"
                        );
                    } else {
                        error!(worker_id = %self.worker_id, error = %e, "💥 Queue error; stopping worker");
                    }
                    return Err(e.into());
                }
            }
        }

        info!(worker_id = %self.worker_id, "Consumption loop stopped");
        Ok(())
    }

    /// Ack a message whose payload can never be processed
    async fn discard(&self, receipt_handle: &ReceiptHandle, reason: &str) {
        error!(
            worker_id = %self.worker_id,
            receipt_handle = %receipt_handle,
            reason = reason,
            "💥 Discarding undecodable message"
        );
        self.dispatcher.stats().record_discarded();
        if let Err(e) = self.dispatcher.queue().ack(receipt_handle).await {
            warn!(
                worker_id = %self.worker_id,
                receipt_handle = %receipt_handle,
                error = %e,
                "Failed to ack undecodable message; it will be redelivered"
            );
        }
    }
}

fn flatten_join(joined: Result<BrokerResult<()>, tokio::task::JoinError>) -> BrokerResult<()> {
    match joined {
        Ok(result) => result,
        Err(join_error) if join_error.is_cancelled() => Ok(()),
        Err(join_error) => Err(BrokerError::Messaging(MessagingError::internal(format!(
            "consumption loop panicked: {join_error}"
        )))),
    }
}
