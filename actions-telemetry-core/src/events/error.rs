//! Event parsing errors

use thiserror::Error;

/// A recognised event whose payload does not match the expected shape.
///
/// Never retryable: redelivering the same payload fails the same way.
#[derive(Error, Debug)]
pub enum ParseError {
    /// The payload is not a JSON object at all
    #[error("{event_type} payload must be a JSON object, got {found}")]
    NotAnObject {
        event_type: &'static str,
        found: &'static str,
    },

    /// A required field is missing or has the wrong type
    #[error("malformed {event_type} payload: {source}")]
    Malformed {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ParseError {
    /// The event type whose payload was rejected
    pub fn event_type(&self) -> &'static str {
        match self {
            ParseError::NotAnObject { event_type, .. } | ParseError::Malformed { event_type, .. } => {
                event_type
            }
        }
    }
}
