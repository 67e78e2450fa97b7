//! # In-Memory Queue Service
//!
//! Process-local queue used as the `"dummy"` reference backend.
//!
//! ## Features
//!
//! - **Shared channels**: every handle created with the same `name` observes the
//!   same physical queue for the life of the process, so a broker and any
//!   number of workers in one process can be wired together by config alone.
//! - **Visibility timeout**: claimed messages are invisible until acked, nacked,
//!   or the window elapses, after which they are redelivered.
//! - **Wakeups**: consumers sleep on a `Notify` and on the next visibility
//!   deadline instead of polling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::constants::defaults;
use crate::messaging::errors::MessagingError;
use crate::messaging::message::{Delivery, MessageId, QueueStats, ReceiptHandle, TaskMessage};
use crate::messaging::service::traits::QueueService;

/// Options accepted by the in-memory queue (`null` selects all defaults)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InMemoryQueueConfig {
    /// Channel name; handles with equal names share one queue
    pub name: String,
    pub visibility_timeout_ms: u64,
}

impl Default for InMemoryQueueConfig {
    fn default() -> Self {
        Self {
            name: defaults::IN_MEMORY_NAME.to_string(),
            visibility_timeout_ms: defaults::VISIBILITY_TIMEOUT_MS,
        }
    }
}

#[derive(Debug)]
struct StoredMessage {
    id: u64,
    payload: Arc<[u8]>,
    enqueued_at: DateTime<Utc>,
    enqueued_instant: Instant,
    /// `None` = visible now
    visible_at: Option<Instant>,
    receive_count: u32,
    /// True while a receipt for `receive_count` may still ack or nack
    leased: bool,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.visible_at.map(|at| at <= now).unwrap_or(true)
    }
}

struct Claimed {
    id: u64,
    payload: Arc<[u8]>,
    receive_count: u32,
    enqueued_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Channel {
    name: String,
    messages: Mutex<VecDeque<StoredMessage>>,
    notify: Notify,
    next_id: AtomicU64,
    total_published: AtomicU64,
    total_acked: AtomicU64,
}

impl Channel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            messages: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            next_id: AtomicU64::new(1),
            total_published: AtomicU64::new(0),
            total_acked: AtomicU64::new(0),
        }
    }

    /// Claim the first visible message, or report the earliest instant at
    /// which an invisible one becomes visible again
    fn try_claim(&self, visibility_timeout: Duration) -> Result<Claimed, Option<Instant>> {
        let now = Instant::now();
        let mut messages = self.messages.lock();
        let mut next_visible: Option<Instant> = None;

        for msg in messages.iter_mut() {
            if msg.is_visible(now) {
                msg.visible_at = Some(now + visibility_timeout);
                msg.receive_count += 1;
                msg.leased = true;
                return Ok(Claimed {
                    id: msg.id,
                    payload: Arc::clone(&msg.payload),
                    receive_count: msg.receive_count,
                    enqueued_at: msg.enqueued_at,
                });
            }
            if let Some(at) = msg.visible_at {
                next_visible = Some(next_visible.map_or(at, |current| current.min(at)));
            }
        }

        Err(next_visible)
    }

    fn position_of(messages: &VecDeque<StoredMessage>, id: u64, receive_count: u32) -> Option<usize> {
        messages
            .iter()
            .position(|m| m.id == id && m.leased && m.receive_count == receive_count)
    }
}

fn channels() -> &'static DashMap<String, Arc<Channel>> {
    static CHANNELS: OnceLock<DashMap<String, Arc<Channel>>> = OnceLock::new();
    CHANNELS.get_or_init(DashMap::new)
}

fn shared_channel(name: &str) -> Arc<Channel> {
    channels()
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(Channel::new(name)))
        .value()
        .clone()
}

/// Handle onto a process-wide in-memory channel
#[derive(Debug)]
pub struct InMemoryQueueService {
    channel: Arc<Channel>,
    visibility_timeout: Duration,
    closed: AtomicBool,
    injected_receive_failures: AtomicU32,
    injected_transport_errors: AtomicU32,
}

impl InMemoryQueueService {
    pub fn new(config: &InMemoryQueueConfig) -> Self {
        debug!(
            queue = %config.name,
            visibility_timeout_ms = config.visibility_timeout_ms,
            "In-memory queue handle created"
        );
        Self {
            channel: shared_channel(&config.name),
            visibility_timeout: Duration::from_millis(config.visibility_timeout_ms),
            closed: AtomicBool::new(false),
            injected_receive_failures: AtomicU32::new(0),
            injected_transport_errors: AtomicU32::new(0),
        }
    }

    /// Make the next `count` receipts on this handle claim a message and then
    /// fail, as if the transport dropped mid-delivery
    pub fn inject_receive_failures(&self, count: u32) {
        self.injected_receive_failures
            .fetch_add(count, Ordering::SeqCst);
    }

    /// Make the next `count` receives on this handle fail before claiming
    /// anything, as if the backend were briefly unreachable
    pub fn inject_transport_errors(&self, count: u32) {
        self.injected_transport_errors
            .fetch_add(count, Ordering::SeqCst);
    }

    /// Enqueue a payload as-is, bypassing `TaskMessage` encoding
    pub fn publish_raw(&self, payload: impl Into<Vec<u8>>) -> Result<MessageId, MessagingError> {
        self.ensure_open()?;
        let payload: Vec<u8> = payload.into();
        let id = self.enqueue(payload.into());
        debug!(queue = %self.channel.name, message_id = id, "Raw payload published");
        Ok(MessageId::from(id))
    }

    fn enqueue(&self, payload: Arc<[u8]>) -> u64 {
        let id = self.channel.next_id.fetch_add(1, Ordering::Relaxed);
        self.channel.messages.lock().push_back(StoredMessage {
            id,
            payload,
            enqueued_at: Utc::now(),
            enqueued_instant: Instant::now(),
            visible_at: None,
            receive_count: 0,
            leased: false,
        });
        self.channel.total_published.fetch_add(1, Ordering::Relaxed);
        self.channel.notify.notify_waiters();
        id
    }

    /// Number of messages not yet acked on the shared channel
    pub fn len(&self) -> usize {
        self.channel.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    fn ensure_open(&self) -> Result<(), MessagingError> {
        if self.closed.load(Ordering::Acquire) {
            Err(MessagingError::closed(&self.channel.name))
        } else {
            Ok(())
        }
    }

    fn take_injected(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn hand_over(&self, claimed: Claimed) -> Result<Delivery, MessagingError> {
        if Self::take_injected(&self.injected_receive_failures) {
            warn!(
                queue = %self.channel.name,
                message_id = claimed.id,
                receive_count = claimed.receive_count,
                "Dropping claimed message (injected receive failure)"
            );
            return Err(MessagingError::receive_failed(
                &self.channel.name,
                format!("injected failure after claiming message {}", claimed.id),
            ));
        }

        let receipt_handle = ReceiptHandle::for_claim(&claimed.id.to_string(), claimed.receive_count);
        let message = match TaskMessage::from_bytes(&claimed.payload) {
            Ok(message) => message,
            Err(e) => {
                return Err(MessagingError::undecodable_message(
                    &self.channel.name,
                    receipt_handle,
                    e.to_string(),
                ))
            }
        };
        Ok(Delivery {
            receipt_handle,
            message,
            receive_count: claimed.receive_count,
            enqueued_at: claimed.enqueued_at,
        })
    }

    fn parse_receipt(&self, receipt_handle: &ReceiptHandle) -> Result<(u64, u32), MessagingError> {
        receipt_handle
            .parse_claim()
            .and_then(|(id, count)| id.parse::<u64>().ok().map(|id| (id, count)))
            .ok_or_else(|| {
                MessagingError::invalid_receipt(&self.channel.name, receipt_handle.as_str())
            })
    }
}

#[async_trait]
impl QueueService for InMemoryQueueService {
    async fn publish(&self, message: &TaskMessage) -> Result<MessageId, MessagingError> {
        self.ensure_open()?;
        let id = self.enqueue(message.to_bytes()?.into());

        debug!(
            queue = %self.channel.name,
            message_id = id,
            task_id = %message.task_id,
            "Message published"
        );
        Ok(MessageId::from(id))
    }

    async fn consume(&self) -> Result<Delivery, MessagingError> {
        self.ensure_open()?;
        if Self::take_injected(&self.injected_transport_errors) {
            return Err(MessagingError::connection(
                "in_memory",
                format!("injected transport error on {}", self.channel.name),
            ));
        }

        loop {
            self.ensure_open()?;

            // Register for wakeups before looking, so a publish between the
            // scan and the wait is not missed.
            let notified = self.channel.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.channel.try_claim(self.visibility_timeout) {
                Ok(claimed) => return self.hand_over(claimed),
                Err(Some(next_visible)) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(next_visible) => {}
                    }
                }
                Err(None) => notified.await,
            }
        }
    }

    async fn ack(&self, receipt_handle: &ReceiptHandle) -> Result<(), MessagingError> {
        self.ensure_open()?;
        let (id, receive_count) = self.parse_receipt(receipt_handle)?;

        let mut messages = self.channel.messages.lock();
        match Channel::position_of(&messages, id, receive_count) {
            Some(pos) => {
                messages.remove(pos);
                self.channel.total_acked.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => Err(MessagingError::invalid_receipt(
                &self.channel.name,
                receipt_handle.as_str(),
            )),
        }
    }

    async fn nack(
        &self,
        receipt_handle: &ReceiptHandle,
        delay: Duration,
    ) -> Result<(), MessagingError> {
        self.ensure_open()?;
        let (id, receive_count) = self.parse_receipt(receipt_handle)?;

        {
            let mut messages = self.channel.messages.lock();
            let pos = Channel::position_of(&messages, id, receive_count).ok_or_else(|| {
                MessagingError::invalid_receipt(&self.channel.name, receipt_handle.as_str())
            })?;
            let msg = &mut messages[pos];
            msg.visible_at = Some(Instant::now() + delay);
            msg.leased = false;
        }

        // Sleeping consumers recompute their next deadline
        self.channel.notify.notify_waiters();
        Ok(())
    }

    async fn queue_stats(&self) -> Result<QueueStats, MessagingError> {
        let now = Instant::now();
        let messages = self.channel.messages.lock();

        let in_flight = messages.iter().filter(|m| !m.is_visible(now)).count() as u64;
        let mut stats =
            QueueStats::new(&self.channel.name, messages.len() as u64).with_in_flight_count(in_flight);
        if let Some(oldest) = messages.iter().map(|m| m.enqueued_instant).min() {
            stats = stats.with_oldest_message_age(now.saturating_duration_since(oldest));
        }
        Ok(stats)
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(!self.closed.load(Ordering::Acquire))
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(queue = %self.channel.name, "In-memory queue handle closed");
            // Wake this handle's consumers so they observe the closed flag
            self.channel.notify.notify_waiters();
        }
        Ok(())
    }

    fn queue_name(&self) -> &str {
        &self.channel.name
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
