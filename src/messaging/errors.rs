//! # Messaging Error Types
//!
//! Structured errors for queue backends. A consumer sorts receive errors into
//! three groups:
//!
//! - `ReceiveFailed`: a message was claimed and then lost in transit. Fatal to
//!   the consumption loop; the message is redelivered after its visibility
//!   window.
//! - `UndecodableMessage`: a message was claimed but its payload is not a task
//!   envelope. It carries the receipt so the consumer can discard it.
//! - retryable transport errors (`Connection`, `Timeout`, `QueueOperation`)
//!   where nothing was claimed. The consumer backs off and polls again.

use thiserror::Error;

use super::message::ReceiptHandle;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Connection error: {backend}: {message}")]
    Connection { backend: String, message: String },

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Timeout: operation {operation} timed out: {message}")]
    Timeout { operation: String, message: String },

    /// A message was claimed but the transport failed before it was handed over
    #[error("Receive failed on queue {queue_name}: {message}")]
    ReceiveFailed { queue_name: String, message: String },

    /// A message was claimed but its payload does not decode; retrying cannot help
    #[error("Undecodable message on queue {queue_name} ({receipt_handle}): {message}")]
    UndecodableMessage {
        queue_name: String,
        receipt_handle: ReceiptHandle,
        message: String,
    },

    /// The receipt does not refer to an in-flight message (already acked, or
    /// its visibility window expired and it was redelivered)
    #[error("Invalid receipt handle on queue {queue_name}: {receipt}")]
    InvalidReceipt { queue_name: String, receipt: String },

    #[error("Queue {queue_name} is closed")]
    Closed { queue_name: String },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    /// Create a connection error
    pub fn connection(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a queue operation error
    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a message serialization error
    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    /// Create a message deserialization error
    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a receive failure
    pub fn receive_failed(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ReceiveFailed {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    /// Create an undecodable-payload error for a claimed message
    pub fn undecodable_message(
        queue_name: impl Into<String>,
        receipt_handle: ReceiptHandle,
        message: impl Into<String>,
    ) -> Self {
        Self::UndecodableMessage {
            queue_name: queue_name.into(),
            receipt_handle,
            message: message.into(),
        }
    }

    /// Create an invalid receipt error
    pub fn invalid_receipt(queue_name: impl Into<String>, receipt: impl Into<String>) -> Self {
        Self::InvalidReceipt {
            queue_name: queue_name.into(),
            receipt: receipt.into(),
        }
    }

    /// Create a closed-queue error
    pub fn closed(queue_name: impl Into<String>) -> Self {
        Self::Closed {
            queue_name: queue_name.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// A claimed message was lost in transit; ends a consumption loop
    pub fn is_receive_failure(&self) -> bool {
        matches!(self, Self::ReceiveFailed { .. })
    }

    /// Transport errors where nothing was claimed; worth retrying after a backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::QueueOperation { .. }
        )
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            MessagingError::message_deserialization(err.to_string())
        } else {
            MessagingError::message_serialization(err.to_string())
        }
    }
}

#[cfg(feature = "redis-backend")]
impl MessagingError {
    /// Classify a Redis error raised by `operation` on `queue_name`
    pub fn from_redis(queue_name: &str, operation: &str, err: redis::RedisError) -> Self {
        if err.is_timeout() {
            MessagingError::timeout(format!("{queue_name}:{operation}"), err.to_string())
        } else if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            MessagingError::connection("redis", err.to_string())
        } else {
            MessagingError::queue_operation(queue_name, operation, err.to_string())
        }
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
