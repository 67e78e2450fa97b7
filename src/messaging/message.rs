//! # Queue Message Types
//!
//! The task envelope published by the broker, and the delivery wrapper a
//! consumer receives for it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::MessagingError;
use crate::models::{TaskArgs, TaskId};

/// Envelope published for every created task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: TaskId,
    pub task_name: String,
    #[serde(default)]
    pub args: TaskArgs,
}

impl TaskMessage {
    pub fn new(task_id: TaskId, task_name: impl Into<String>, args: TaskArgs) -> Self {
        Self {
            task_id,
            task_name: task_name.into(),
            args,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MessagingError> {
        serde_json::to_vec(self).map_err(|e| MessagingError::message_serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError> {
        serde_json::from_slice(bytes)
            .map_err(|e| MessagingError::message_deserialization(e.to_string()))
    }
}

/// Provider-assigned identifier for a published message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Handle for acknowledging a single claim of a message
///
/// Each redelivery produces a new handle; a handle from an earlier claim is
/// rejected by `ack` and `nack`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Handle for claim number `receive_count` of message `id`
    pub fn for_claim(id: &str, receive_count: u32) -> Self {
        Self(format!("{id}.{receive_count}"))
    }

    /// Split into `(message id, receive count)`
    pub fn parse_claim(&self) -> Option<(&str, u32)> {
        let (id, count) = self.0.rsplit_once('.')?;
        Some((id, count.parse().ok()?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message claimed from a queue
///
/// The message stays invisible to other consumers until it is acked, nacked,
/// or its visibility window elapses.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt_handle: ReceiptHandle,
    pub message: TaskMessage,
    /// 1 on first delivery, incremented on every redelivery
    pub receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}

/// Queue statistics for monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStats {
    pub queue_name: String,

    /// Messages not yet acked (visible + invisible)
    pub message_count: u64,

    /// Messages currently claimed by a consumer
    ///
    /// `None` when the provider cannot report it cheaply.
    pub in_flight_count: Option<u64>,

    pub oldest_message_age: Option<Duration>,
}

impl QueueStats {
    pub fn new(queue_name: impl Into<String>, message_count: u64) -> Self {
        Self {
            queue_name: queue_name.into(),
            message_count,
            in_flight_count: None,
            oldest_message_age: None,
        }
    }

    pub fn with_in_flight_count(mut self, count: u64) -> Self {
        self.in_flight_count = Some(count);
        self
    }

    pub fn with_oldest_message_age(mut self, age: Duration) -> Self {
        self.oldest_message_age = Some(age);
        self
    }

    /// Messages waiting to be claimed
    pub fn visible_count(&self) -> u64 {
        self.message_count
            .saturating_sub(self.in_flight_count.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_message_wire_shape() {
        let message = TaskMessage::new(
            TaskId::from("abc"),
            "addition",
            TaskArgs::new().with("x", 1).with("y", 1),
        );
        let value: serde_json::Value = serde_json::from_slice(&message.to_bytes().unwrap()).unwrap();

        assert_eq!(value["task_id"], "abc");
        assert_eq!(value["task_name"], "addition");
        assert_eq!(value["args"]["y"], 1);
    }

    #[test]
    fn test_garbage_bytes_are_deserialization_errors() {
        let err = TaskMessage::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, MessagingError::MessageDeserialization { .. }));
    }

    #[test]
    fn test_receipt_handle_claims() {
        let handle = ReceiptHandle::for_claim("42", 3);
        assert_eq!(handle.as_str(), "42.3");
        assert_eq!(handle.parse_claim(), Some(("42", 3)));
        assert_eq!(ReceiptHandle::new("garbage").parse_claim(), None);
    }

    #[test]
    fn test_queue_stats_visible_count() {
        let stats = QueueStats::new("tasks", 5).with_in_flight_count(2);
        assert_eq!(stats.visible_count(), 3);
        assert_eq!(QueueStats::new("tasks", 4).visible_count(), 4);
    }
}
