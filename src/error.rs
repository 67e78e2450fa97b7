//! Error types for the broker and worker pool.
//!
//! Infrastructure failures (backend unreachable, transport errors) surface as
//! `BrokerError`. Handler-domain failures never do: they are turned into data
//! inside a task's result by the worker.

use crate::cache::CacheError;
use crate::messaging::MessagingError;
use crate::models::TaskId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Unknown or unreachable backend, or invalid backend options
    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    /// No record exists in the result cache for the id
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: TaskId },

    /// The pending record was written but the message was never published.
    /// The record stays PENDING until the caller gives up on it.
    #[error("Task {task_id} recorded but not published: {source}")]
    PublishFailed {
        task_id: TaskId,
        #[source]
        source: MessagingError,
    },

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid task arguments: {0}")]
    InvalidArgs(String),

    #[error("Worker {worker_id} is already started")]
    WorkerAlreadyStarted { worker_id: String },

    #[error("{component} is closed")]
    Closed { component: String },

    #[error("Timed out after {waited_ms}ms waiting for task {task_id}")]
    Timeout { task_id: TaskId, waited_ms: u64 },
}

impl BrokerError {
    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a task-not-found error
    pub fn task_not_found(task_id: impl Into<TaskId>) -> Self {
        Self::TaskNotFound {
            task_id: task_id.into(),
        }
    }

    /// Create a closed-component error
    pub fn closed(component: impl Into<String>) -> Self {
        Self::Closed {
            component: component.into(),
        }
    }

    /// True for the configuration class of errors
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// True when the id was absent from the result cache
    pub fn is_task_not_found(&self) -> bool {
        matches!(self, Self::TaskNotFound { .. })
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(error: serde_json::Error) -> Self {
        BrokerError::Serialization(error.to_string())
    }
}

impl From<config::ConfigError> for BrokerError {
    fn from(error: config::ConfigError) -> Self {
        BrokerError::configuration("config", error.to_string())
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrokerError::configuration("queue", "unknown backend 'carrier-pigeon'");
        let display = err.to_string();
        assert!(display.contains("Configuration error"));
        assert!(display.contains("carrier-pigeon"));
        assert!(err.is_configuration());

        let err = BrokerError::task_not_found("abc");
        assert_eq!(err.to_string(), "Task not found: abc");
        assert!(err.is_task_not_found());
    }

    #[test]
    fn test_messaging_conversion_is_transparent() {
        let err: BrokerError = MessagingError::closed("tasks").into();
        assert!(matches!(err, BrokerError::Messaging(_)));
        assert!(err.to_string().contains("tasks"));
    }

    #[test]
    fn test_serde_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: BrokerError = json_err.into();
        assert!(matches!(err, BrokerError::Serialization(_)));
    }
}
