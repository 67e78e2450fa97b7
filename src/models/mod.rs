//! # Models
//!
//! Task records as persisted in the result cache, plus the outcome types a
//! worker produces for each delivery attempt.

pub mod outcome;
pub mod task;

pub use outcome::{ExceptionRecord, TaskOutcome};
pub use task::{Task, TaskArgs, TaskId, TaskStatus};
