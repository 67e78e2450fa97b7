#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tasker Broker
//!
//! Distributed task broker and worker pool over pluggable queue and
//! result-cache backends.
//!
//! ## Overview
//!
//! A [`Broker`] records a task as PENDING in the result cache and publishes a
//! message to the queue. Any number of [`Worker`]s compete for messages on
//! that queue, run the handler registered for the task name, write the
//! outcome back as DONE, and acknowledge the message.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────── Cache (task:<id>) ────────┐
//!                 │                                   │
//!  Broker ── put PENDING ──> publish ──> Queue ──> Worker ── put DONE ──> ack
//!    │                                               │
//!    └──────────── get_task (poll) ──────────────────┘
//! ```
//!
//! Delivery is at-least-once. A message that is received but never acked is
//! redelivered after the backend's visibility timeout; that is the only retry
//! path.
//!
//! ## Module Organization
//!
//! - [`broker`] - Client façade for submitting and reading tasks
//! - [`worker`] - Consumption loop and per-delivery dispatch
//! - [`registry`] - Task handlers and the per-worker handler registry
//! - [`messaging`] - Queue capability, message envelopes, queue backends
//! - [`cache`] - Cache capability, cache backends, typed task store
//! - [`models`] - Task record, identifiers, arguments, outcomes
//! - [`config`] - Backend selection, worker settings, layered loading
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging bootstrap
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use serde_json::json;
//! use tasker_broker::{Broker, HandlerError, TaskArgs, Worker};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut worker = Worker::create("dummy", None, "dummy", None).await?;
//! worker.register_fn("addition", |args: TaskArgs| async move {
//!     let x = args.get("x").and_then(|v| v.as_i64()).unwrap_or_default();
//!     let y = args.get("y").and_then(|v| v.as_i64()).unwrap_or_default();
//!     Ok::<_, HandlerError>(json!(x + y))
//! })?;
//! worker.start()?;
//!
//! let broker = Broker::create("dummy", None, "dummy", None).await?;
//! let id = broker
//!     .create_task("addition", TaskArgs::new().with("x", 1).with("y", 1))
//!     .await?;
//! let task = broker.wait_for_task(&id, Duration::from_secs(5), None).await?;
//! assert_eq!(task.result(), Some(&json!(2)));
//!
//! broker.close().await?;
//! worker.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! The `"dummy"` backends are complete in-process implementations. Instances
//! given the same `name` option share one queue channel or one cache map, so
//! a broker and several workers can be exercised in a single test.

pub mod broker;
pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod registry;
pub mod worker;

pub use broker::Broker;
pub use cache::{CacheProvider, CacheService, TaskStore};
pub use config::{BackendSection, BrokerConfig, ConfigManager, MissingHandlerPolicy, WorkerSettings};
pub use error::{BrokerError, BrokerResult};
pub use messaging::{QueueProvider, QueueService, QueueStats, TaskMessage};
pub use models::{ExceptionRecord, Task, TaskArgs, TaskId, TaskOutcome, TaskStatus};
pub use registry::{BlockingFnHandler, FnHandler, HandlerError, HandlerRegistry, TaskHandler};
pub use worker::{Worker, WorkerStatsSnapshot};
