//! # Worker
//!
//! The consuming side of the broker: a [`Worker`] pulls messages from the
//! queue and dispatches each one to the handler registered for its task name.

pub mod core;
pub mod dispatch;

pub use self::core::Worker;
pub use dispatch::{WorkerStats, WorkerStatsSnapshot};
