//! Event envelope handed from the transport to the processor, and its queue
//! wire format (base64-encoded JSON).

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of webhook delivery, taken from the `X-GitHub-Event` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    WorkflowRun,
    WorkflowJob,
    Unknown(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::WorkflowRun => "workflow_run",
            EventType::WorkflowJob => "workflow_job",
            EventType::Unknown(other) => other,
        }
    }

    /// Whether the processor derives telemetry from this event type
    pub fn is_handled(&self) -> bool {
        !matches!(self, EventType::Unknown(_))
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        match value {
            "workflow_run" => EventType::WorkflowRun,
            "workflow_job" => EventType::WorkflowJob,
            other => EventType::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One webhook delivery as received.
///
/// `delivery_id` repeats when GitHub (or the queue) redelivers, so nothing
/// downstream may treat it as a unique key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_type: String,
    pub delivery_id: String,
    pub received_at: DateTime<Utc>,
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new(
        event_type: impl Into<String>,
        delivery_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            delivery_id: delivery_id.into(),
            received_at: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> EventType {
        EventType::from(self.event_type.as_str())
    }

    /// Encode as a queue message body
    pub fn to_wire(&self) -> Result<String> {
        let json = serde_json::to_vec(self).context("Failed to serialize event envelope")?;
        Ok(STANDARD.encode(json))
    }

    /// Decode a queue message body produced by [`EventEnvelope::to_wire`]
    pub fn from_wire(content: &str) -> Result<Self> {
        let json = STANDARD
            .decode(content.trim())
            .context("Queue message is not valid base64")?;
        serde_json::from_slice(&json).context("Queue message is not a valid event envelope")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_from_str() {
        assert_eq!(EventType::from("workflow_run"), EventType::WorkflowRun);
        assert_eq!(EventType::from("workflow_job"), EventType::WorkflowJob);
        assert_eq!(
            EventType::from("issues"),
            EventType::Unknown("issues".to_string())
        );
        assert!(!EventType::from("issues").is_handled());
        assert_eq!(EventType::from("issues").to_string(), "issues");
    }

    #[test]
    fn test_wire_format() {
        let envelope = EventEnvelope::new("workflow_job", "d-1", json!({"action": "queued"}));
        let wire = envelope.to_wire().unwrap();
        assert!(!wire.contains('{'));

        let decoded = EventEnvelope::from_wire(&wire).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_wire_format_rejects_garbage() {
        assert!(EventEnvelope::from_wire("%%% not base64").is_err());
        let not_json = STANDARD.encode(b"plain text");
        assert!(EventEnvelope::from_wire(&not_json).is_err());
    }
}
