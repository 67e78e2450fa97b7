//! # Delivery Dispatch
//!
//! Processes one delivery end to end: resolve the handler, run it under the
//! worker's execution limits, write the outcome, then ack.
//!
//! ## Error Handling
//!
//! Nothing here returns an error to the consumption loop. Every failure ends
//! in one of three places:
//! - a DONE record carrying an exception (handler error, panic, timeout,
//!   missing handler under the terminalize policy),
//! - an un-acked message left for redelivery (outcome write failed),
//! - a nacked message (missing handler under the requeue policy).

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cache::TaskStore;
use crate::config::{MissingHandlerPolicy, WorkerSettings};
use crate::logging::{log_error, log_task_operation};
use crate::messaging::{Delivery, QueueProvider};
use crate::models::{ExceptionRecord, Task, TaskArgs, TaskOutcome};
use crate::registry::handler::panic_message;
use crate::registry::{HandlerError, HandlerRegistry, TaskHandler};

/// Counters maintained by a worker's dispatcher
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    not_registered: AtomicU64,
    requeued: AtomicU64,
    duplicates: AtomicU64,
    discarded: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    /// Deliveries whose outcome was written (success, failure, or not registered)
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub not_registered: u64,
    pub requeued: u64,
    /// Redeliveries of tasks that were already DONE, acked without re-running
    pub duplicates: u64,
    /// Messages acked unprocessed because their payload did not decode
    pub discarded: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            not_registered: self.not_registered.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    fn record_outcome(&self, outcome: &TaskOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        match outcome {
            TaskOutcome::Success(_) => self.succeeded.fetch_add(1, Ordering::Relaxed),
            TaskOutcome::Failure(record) if record.is_task_not_registered() => {
                self.not_registered.fetch_add(1, Ordering::Relaxed)
            }
            TaskOutcome::Failure(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// Shared per-worker state for processing deliveries
///
/// One dispatcher is built when the worker starts and is shared by every
/// in-flight delivery. The registry it holds is frozen at that point.
pub(crate) struct Dispatcher {
    worker_id: String,
    queue: Arc<QueueProvider>,
    store: TaskStore,
    registry: Arc<HandlerRegistry>,
    settings: WorkerSettings,
    stats: Arc<WorkerStats>,
}

impl Dispatcher {
    pub(crate) fn new(
        worker_id: String,
        queue: Arc<QueueProvider>,
        store: TaskStore,
        registry: Arc<HandlerRegistry>,
        settings: WorkerSettings,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            worker_id,
            queue,
            store,
            registry,
            settings,
            stats,
        }
    }

    pub(crate) fn queue(&self) -> &QueueProvider {
        &self.queue
    }

    pub(crate) fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub(crate) async fn dispatch(&self, delivery: Delivery) {
        let task_id = delivery.message.task_id.clone();
        let task_name = delivery.message.task_name.clone();

        debug!(
            worker_id = %self.worker_id,
            task_id = %task_id,
            task_name = %task_name,
            receive_count = delivery.receive_count,
            "Delivery received"
        );

        let existing = match self.store.find(&task_id).await {
            Ok(existing) => existing,
            Err(e) => {
                error!(
                    worker_id = %self.worker_id,
                    task_id = %task_id,
                    error = %e,
                    "Failed to read task record; leaving delivery for redelivery"
                );
                return;
            }
        };

        // A redelivered message for a finished task: the outcome is already
        // stable, only the ack was lost.
        if existing.as_ref().is_some_and(Task::is_done) {
            info!(
                worker_id = %self.worker_id,
                task_id = %task_id,
                receive_count = delivery.receive_count,
                "Task already DONE; acknowledging duplicate delivery"
            );
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            self.acknowledge(&delivery).await;
            return;
        }

        let outcome = match self.registry.get(&task_name) {
            Some(handler) => {
                let args = delivery.message.args.clone();
                self.execute(handler, args).await
            }
            None => match self.settings.missing_handler_policy {
                MissingHandlerPolicy::Terminalize => {
                    let record = ExceptionRecord::task_not_registered(&task_name);
                    log_error(
                        "worker",
                        "resolve_handler",
                        &record.message,
                        Some(format!("task_id={task_id} worker_id={}", self.worker_id).as_str()),
                    );
                    TaskOutcome::Failure(record)
                }
                MissingHandlerPolicy::Requeue => {
                    self.requeue(&delivery).await;
                    return;
                }
            },
        };

        if let TaskOutcome::Failure(record) = &outcome {
            if !record.is_task_not_registered() {
                error!(
                    worker_id = %self.worker_id,
                    task_id = %task_id,
                    task_name = %task_name,
                    exception_class = %record.class,
                    exception = %record.message,
                    "Handler failed"
                );
            }
        }

        let pending = existing.unwrap_or_else(|| {
            Task::pending(task_id.clone(), task_name.clone(), delivery.message.args.clone())
        });
        let completed = pending.complete(outcome.clone());

        if let Err(e) = self.store.save(&completed).await {
            // No ack: the message comes back after the visibility timeout and
            // the handler runs again.
            log_error(
                "worker",
                "write_outcome",
                &e.to_string(),
                Some(format!("task_id={task_id} worker_id={}", self.worker_id).as_str()),
            );
            return;
        }

        self.stats.record_outcome(&outcome);
        log_task_operation(
            "complete",
            task_id.as_str(),
            Some(task_name.as_str()),
            if outcome.is_success() { "success" } else { "failure" },
            None,
        );

        self.acknowledge(&delivery).await;
    }

    /// Run the handler, converting errors, panics, and timeouts into a failure outcome
    async fn execute(&self, handler: Arc<dyn TaskHandler>, args: TaskArgs) -> TaskOutcome {
        let call = AssertUnwindSafe(handler.call(args)).catch_unwind();

        let result = match self.settings.handler_timeout() {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                    return TaskOutcome::Failure(HandlerError::timeout(timeout_ms).into());
                }
            },
            None => call.await,
        };

        match result {
            Ok(Ok(value)) => TaskOutcome::Success(value),
            Ok(Err(handler_error)) => TaskOutcome::Failure(handler_error.into()),
            Err(payload) => {
                TaskOutcome::Failure(HandlerError::panic(panic_message(payload.as_ref())).into())
            }
        }
    }

    async fn acknowledge(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.ack(&delivery.receipt_handle).await {
            // The record is already final; a redelivery is acked as a duplicate.
            warn!(
                worker_id = %self.worker_id,
                task_id = %delivery.message.task_id,
                error = %e,
                "Failed to ack delivery"
            );
        }
    }

    async fn requeue(&self, delivery: &Delivery) {
        let delay = self.settings.requeue_delay();
        warn!(
            worker_id = %self.worker_id,
            task_id = %delivery.message.task_id,
            task_name = %delivery.message.task_name,
            delay_ms = self.settings.requeue_delay_ms,
            "No handler registered; returning message to the queue"
        );
        match self.queue.nack(&delivery.receipt_handle, delay).await {
            Ok(()) => {
                self.stats.requeued.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(
                worker_id = %self.worker_id,
                task_id = %delivery.message.task_id,
                error = %e,
                "Failed to nack delivery; it returns after the visibility timeout"
            ),
        }
    }
}
