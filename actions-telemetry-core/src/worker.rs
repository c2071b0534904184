//! Queue poll loop
//!
//! ```text
//! loop {
//!   receive(batch) ─┬─ messages ─► process each ─► delete / leave ─► loop again
//!                   ├─ empty    ─► sleep(poll_interval)
//!                   └─ error    ─► log, sleep(poll_interval)
//! }
//! ```
//!
//! Messages in a batch are processed sequentially. One failing message never
//! aborts the rest of the batch. Shutdown is checked between batches and
//! while sleeping.

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::QueueSettings;
use crate::events::EventEnvelope;
use crate::processor::{EventProcessor, ProcessOutcome};
use crate::queue::{MessageQueue, QueueMessage};

/// What happened to one received batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    /// Deleted from the queue (processed, skipped, rejected or undecodable)
    pub acknowledged: usize,
    /// Left for redelivery after the visibility timeout
    pub retained: usize,
}

pub struct QueueWorker {
    queue: Arc<dyn MessageQueue>,
    processor: EventProcessor,
    poll_interval: Duration,
    batch_size: usize,
    visibility_timeout: Duration,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        processor: EventProcessor,
        settings: &QueueSettings,
    ) -> Self {
        Self {
            queue,
            processor,
            poll_interval: settings.poll_interval(),
            batch_size: settings.max_messages_per_batch.max(1),
            visibility_timeout: settings.visibility_timeout(),
        }
    }

    /// Poll until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            queue = self.queue.name(),
            batch_size = self.batch_size,
            poll_interval_seconds = self.poll_interval.as_secs(),
            "Queue worker started"
        );

        loop {
            let batch = tokio::select! {
                _ = &mut shutdown => break,
                batch = self.process_batch() => batch,
            };

            match batch {
                Ok(report) if report.received > 0 => continue,
                Ok(_) => debug!("No messages, sleeping"),
                Err(e) => error!(error = %format!("{e:#}"), "Failed to receive messages"),
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Queue worker stopped");
    }

    /// Receive one batch and process every message in it
    pub async fn process_batch(&self) -> Result<BatchReport> {
        let messages = self
            .queue
            .receive(self.batch_size, self.visibility_timeout)
            .await?;

        let mut report = BatchReport {
            received: messages.len(),
            ..Default::default()
        };
        for message in &messages {
            if self.handle(message).await {
                report.acknowledged += 1;
            } else {
                report.retained += 1;
            }
        }

        if report.received > 0 {
            debug!(
                received = report.received,
                acknowledged = report.acknowledged,
                retained = report.retained,
                "Batch complete"
            );
        }
        Ok(report)
    }

    /// Returns true when the message was deleted
    async fn handle(&self, message: &QueueMessage) -> bool {
        let envelope = match EventEnvelope::from_wire(&message.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    error = %format!("{e:#}"),
                    "Deleting undecodable queue message"
                );
                return self.delete(message).await;
            }
        };

        match self.processor.process(&envelope).await {
            outcome if outcome.should_retry() => {
                warn!(
                    message_id = %message.id,
                    delivery_id = %envelope.delivery_id,
                    dequeue_count = message.dequeue_count,
                    "Leaving message for redelivery"
                );
                false
            }
            ProcessOutcome::Rejected(e) => {
                error!(
                    message_id = %message.id,
                    delivery_id = %envelope.delivery_id,
                    error = %e,
                    "Deleting message with malformed payload"
                );
                self.delete(message).await
            }
            _ => self.delete(message).await,
        }
    }

    async fn delete(&self, message: &QueueMessage) -> bool {
        match self.queue.delete(message).await {
            Ok(()) => true,
            Err(e) => {
                error!(message_id = %message.id, error = %format!("{e:#}"), "Failed to delete message");
                false
            }
        }
    }
}
