//! Webhook event model and parser
//!
//! Decodes a raw delivery payload into one of the typed variants the
//! derivation engine understands:
//!
//! ```text
//! parse(event_type, payload)
//!   ├── "workflow_run" → ParsedEvent::WorkflowRun  (or ParseError)
//!   ├── "workflow_job" → ParsedEvent::WorkflowJob  (or ParseError)
//!   └── anything else  → ParsedEvent::Unhandled    (never an error)
//! ```

pub mod envelope;
pub mod error;
pub mod models;

pub use envelope::{EventEnvelope, EventType};
pub use error::ParseError;
pub use models::{
    Repository, Sender, Step, WorkflowConclusion, WorkflowJob, WorkflowJobEvent, WorkflowRun,
    WorkflowRunEvent, WorkflowStatus,
};

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Result of decoding a delivery
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    WorkflowRun(WorkflowRunEvent),
    WorkflowJob(WorkflowJobEvent),
    /// Event type the engine does not derive telemetry from
    Unhandled { event_type: String },
}

/// Decode `payload` according to `event_type`.
///
/// Unknown event types are not errors: they come back as
/// [`ParsedEvent::Unhandled`] so callers can acknowledge them without
/// retrying. A recognised type with a malformed payload is a [`ParseError`].
pub fn parse(event_type: &str, payload: &Value) -> Result<ParsedEvent, ParseError> {
    match EventType::from(event_type) {
        EventType::WorkflowRun => decode("workflow_run", payload).map(ParsedEvent::WorkflowRun),
        EventType::WorkflowJob => decode("workflow_job", payload).map(ParsedEvent::WorkflowJob),
        EventType::Unknown(event_type) => Ok(ParsedEvent::Unhandled { event_type }),
    }
}

fn decode<T: DeserializeOwned>(event_type: &'static str, payload: &Value) -> Result<T, ParseError> {
    if !payload.is_object() {
        return Err(ParseError::NotAnObject {
            event_type,
            found: json_kind(payload),
        });
    }
    T::deserialize(payload).map_err(|source| ParseError::Malformed { event_type, source })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
