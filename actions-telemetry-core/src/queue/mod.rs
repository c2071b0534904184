//! Message queue abstraction
//!
//! Webhooks can be acknowledged quickly and processed later by a
//! [`QueueWorker`](crate::worker::QueueWorker). Delivery is at least once:
//! a received message stays invisible for the visibility timeout and
//! reappears unless it is deleted.

pub mod memory;

pub use memory::InMemoryQueue;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::events::EventEnvelope;

/// A received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    /// Proof of this particular receive; required to delete
    pub pop_receipt: String,
    /// Wire-format envelope (see [`EventEnvelope::to_wire`])
    pub body: String,
    /// How many times the message has been received, this time included
    pub dequeue_count: u32,
}

/// Trait for queue backends
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn send(&self, body: String) -> Result<()>;

    /// Receive up to `max` visible messages, hiding them for `visibility_timeout`
    async fn receive(&self, max: usize, visibility_timeout: Duration) -> Result<Vec<QueueMessage>>;

    /// Acknowledge a message so it is never redelivered
    async fn delete(&self, message: &QueueMessage) -> Result<()>;

    /// Queue identifier for logging/debugging
    fn name(&self) -> &'static str;
}

/// Encode `envelope` and send it
pub async fn enqueue(queue: &dyn MessageQueue, envelope: &EventEnvelope) -> Result<()> {
    let body = envelope.to_wire()?;
    queue
        .send(body)
        .await
        .with_context(|| format!("Failed to enqueue delivery {}", envelope.delivery_id))
}
