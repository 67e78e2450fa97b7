//! # Queue Service Trait
//!
//! Provider-agnostic operations over a single named task queue.

use std::time::Duration;

use async_trait::async_trait;

use crate::messaging::errors::MessagingError;
use crate::messaging::message::{Delivery, MessageId, QueueStats, ReceiptHandle, TaskMessage};

/// Ordered, multi-consumer delivery channel for task messages
///
/// Implementations must provide:
///
/// - **At-least-once delivery**: a claimed message that is neither acked nor
///   nacked becomes visible again once its visibility window elapses.
/// - **Competing consumers**: concurrent `consume` calls across any number of
///   handles on the same queue receive disjoint messages.
/// - **FIFO** where the backend allows it; redelivered messages may jump
///   ahead of or fall behind newer ones.
///
/// `consume` must be safe to drop at any await point. A message claimed by
/// a dropped `consume` future is not lost, it is redelivered after the
/// visibility timeout.
#[async_trait]
pub trait QueueService: Send + Sync + 'static {
    /// Append a message to the queue
    async fn publish(&self, message: &TaskMessage) -> Result<MessageId, MessagingError>;

    /// Claim the next visible message, suspending until one is available
    ///
    /// A transport failure after a message was claimed is reported as
    /// `MessagingError::ReceiveFailed`; the message stays in flight and is
    /// redelivered once its visibility window elapses.
    async fn consume(&self) -> Result<Delivery, MessagingError>;

    /// Remove a processed message permanently
    async fn ack(&self, receipt_handle: &ReceiptHandle) -> Result<(), MessagingError>;

    /// Give a claimed message back; it becomes visible again after `delay`
    async fn nack(&self, receipt_handle: &ReceiptHandle, delay: Duration)
        -> Result<(), MessagingError>;

    async fn queue_stats(&self) -> Result<QueueStats, MessagingError>;

    /// Verify the backend is reachable
    async fn health_check(&self) -> Result<bool, MessagingError>;

    /// Release this handle. Other handles on the same queue are unaffected.
    async fn close(&self) -> Result<(), MessagingError>;

    fn queue_name(&self) -> &str;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}
