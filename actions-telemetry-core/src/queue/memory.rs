//! In-process queue with visibility timeouts.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::{MessageQueue, QueueMessage};

#[derive(Debug)]
struct StoredMessage {
    id: String,
    body: String,
    visible_at: Instant,
    dequeue_count: u32,
    pop_receipt: Option<String>,
}

/// Queue held in memory, for single-process deployments and tests.
///
/// Messages are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    messages: Mutex<VecDeque<StoredMessage>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages not yet deleted, visible or not
    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn send(&self, body: String) -> Result<()> {
        self.messages.lock().await.push_back(StoredMessage {
            id: Uuid::now_v7().to_string(),
            body,
            visible_at: Instant::now(),
            dequeue_count: 0,
            pop_receipt: None,
        });
        Ok(())
    }

    async fn receive(&self, max: usize, visibility_timeout: Duration) -> Result<Vec<QueueMessage>> {
        let now = Instant::now();
        let mut messages = self.messages.lock().await;

        let received = messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(max)
            .map(|m| {
                let receipt = Uuid::now_v7().to_string();
                m.visible_at = now + visibility_timeout;
                m.dequeue_count += 1;
                m.pop_receipt = Some(receipt.clone());
                QueueMessage {
                    id: m.id.clone(),
                    pop_receipt: receipt,
                    body: m.body.clone(),
                    dequeue_count: m.dequeue_count,
                }
            })
            .collect();
        Ok(received)
    }

    async fn delete(&self, message: &QueueMessage) -> Result<()> {
        let mut messages = self.messages.lock().await;
        let position = messages.iter().position(|m| m.id == message.id);
        match position {
            Some(index) if messages[index].pop_receipt.as_ref() == Some(&message.pop_receipt) => {
                messages.remove(index);
                Ok(())
            }
            Some(_) => anyhow::bail!(
                "pop receipt for message {} is stale; it was received again",
                message.id
            ),
            None => anyhow::bail!("message {} not found", message.id),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
