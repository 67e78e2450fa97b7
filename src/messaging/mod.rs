//! # Messaging Module
//!
//! Task messages and the provider-agnostic queue they travel through.

pub mod errors;
pub mod message;
pub mod service;

pub use errors::{MessagingError, MessagingResult};
pub use message::{Delivery, MessageId, QueueStats, ReceiptHandle, TaskMessage};
pub use service::{InMemoryQueueConfig, InMemoryQueueService, QueueProvider, QueueService};

#[cfg(feature = "redis-backend")]
pub use service::{RedisQueueConfig, RedisQueueService};
