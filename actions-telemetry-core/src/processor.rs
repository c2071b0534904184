//! Event processor
//!
//! Runs one envelope through parse → derive → emit and reports an outcome the
//! caller can act on:
//!
//! | Outcome     | Success | Retry | Meaning                                  |
//! |-------------|---------|-------|------------------------------------------|
//! | `Processed` | yes     | no    | derived and emitted (possibly nothing)   |
//! | `Skipped`   | yes     | no    | event type the engine does not handle    |
//! | `Rejected`  | no      | no    | recognised type with a malformed payload |
//! | `Failed`    | no      | yes   | emission or internal failure             |

use chrono::{DateTime, Utc};
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::derive::{derive_job, derive_run, Derivation};
use crate::events::{self, EventEnvelope, ParseError, ParsedEvent};
use crate::telemetry::{EmissionReport, TelemetryEmitter};

/// Failures that are worth retrying
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("telemetry export failed: {0:#}")]
    Emission(anyhow::Error),

    #[error("internal error while deriving telemetry: {0}")]
    Internal(String),
}

#[derive(Debug)]
pub enum ProcessOutcome {
    Processed(EmissionReport),
    Skipped { event_type: String },
    Rejected(ParseError),
    Failed(ProcessError),
}

impl ProcessOutcome {
    /// Safe to acknowledge the message or answer 2xx
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Processed(_) | ProcessOutcome::Skipped { .. })
    }

    /// Leave the message for redelivery
    pub fn should_retry(&self) -> bool {
        matches!(self, ProcessOutcome::Failed(_))
    }
}

/// Turns envelopes into emitted telemetry
#[derive(Debug, Clone)]
pub struct EventProcessor {
    emitter: TelemetryEmitter,
}

impl EventProcessor {
    pub fn new(emitter: TelemetryEmitter) -> Self {
        Self { emitter }
    }

    pub async fn process(&self, envelope: &EventEnvelope) -> ProcessOutcome {
        self.process_at(envelope, Utc::now()).await
    }

    /// Process with an explicit processing time (the metric timestamp)
    pub async fn process_at(
        &self,
        envelope: &EventEnvelope,
        processed_at: DateTime<Utc>,
    ) -> ProcessOutcome {
        self.process_with(envelope, processed_at, derive_parsed).await
    }

    async fn process_with(
        &self,
        envelope: &EventEnvelope,
        processed_at: DateTime<Utc>,
        derive: DeriveFn,
    ) -> ProcessOutcome {
        let delivery_id = envelope.delivery_id.as_str();
        let event_type = envelope.event_type.as_str();

        let derivation = match derive_envelope(envelope, processed_at, derive) {
            Ok(Some(derivation)) => derivation,
            Ok(None) => {
                warn!(delivery_id, event_type, "Unknown event type, skipping");
                return ProcessOutcome::Skipped {
                    event_type: event_type.to_string(),
                };
            }
            Err(DeriveFailure::Parse(e)) => {
                error!(delivery_id, event_type, error = %e, "Rejected malformed payload");
                return ProcessOutcome::Rejected(e);
            }
            Err(DeriveFailure::Panic(message)) => {
                error!(delivery_id, event_type, error = %message, "Derivation panicked");
                return ProcessOutcome::Failed(ProcessError::Internal(message));
            }
        };

        if derivation.is_empty() {
            debug!(delivery_id, event_type, "Nothing to emit");
            return ProcessOutcome::Processed(EmissionReport::default());
        }

        match self.emitter.emit(&derivation).await {
            Ok(report) => {
                info!(
                    delivery_id,
                    event_type,
                    metrics = report.metrics,
                    spans = report.spans,
                    "Processed event"
                );
                ProcessOutcome::Processed(report)
            }
            Err(e) => {
                error!(delivery_id, event_type, error = %format!("{e:#}"), "Telemetry emission failed");
                ProcessOutcome::Failed(ProcessError::Emission(e))
            }
        }
    }
}

type DeriveFn = fn(&EventEnvelope, DateTime<Utc>) -> Result<Option<Derivation>, ParseError>;

enum DeriveFailure {
    Parse(ParseError),
    Panic(String),
}

/// Parse and derive. `Ok(None)` means the event type is not handled.
fn derive_parsed(
    envelope: &EventEnvelope,
    processed_at: DateTime<Utc>,
) -> Result<Option<Derivation>, ParseError> {
    match events::parse(&envelope.event_type, &envelope.payload)? {
        ParsedEvent::WorkflowRun(event) => Ok(Some(derive_run(&event, processed_at))),
        ParsedEvent::WorkflowJob(event) => Ok(Some(derive_job(&event, processed_at))),
        ParsedEvent::Unhandled { .. } => Ok(None),
    }
}

/// Run `derive`, catching any panic in the synchronous part
fn derive_envelope(
    envelope: &EventEnvelope,
    processed_at: DateTime<Utc>,
    derive: DeriveFn,
) -> Result<Option<Derivation>, DeriveFailure> {
    let result = catch_unwind(AssertUnwindSafe(|| derive(envelope, processed_at)));

    match result {
        Ok(inner) => inner.map_err(DeriveFailure::Parse),
        Err(payload) => Err(DeriveFailure::Panic(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmissionMode;
    use crate::telemetry::MemoryTransport;
    use serde_json::json;
    use std::sync::Arc;

    fn processor(mode: EmissionMode) -> (EventProcessor, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let emitter = TelemetryEmitter::new(mode, transport.clone(), true);
        (EventProcessor::new(emitter), transport)
    }

    fn run_envelope(run: serde_json::Value) -> EventEnvelope {
        EventEnvelope::new(
            "workflow_run",
            "delivery-1",
            json!({
                "action": "completed",
                "workflow_run": run,
                "repository": {"id": 1, "name": "repo", "full_name": "owner/repo"},
                "sender": {"id": 2, "login": "octocat"}
            }),
        )
    }

    fn completed_run() -> serde_json::Value {
        json!({
            "id": 100,
            "name": "CI",
            "workflow_id": 5,
            "run_number": 9,
            "status": "completed",
            "conclusion": "success",
            "created_at": "2024-01-01T00:00:00Z",
            "run_started_at": "2024-01-01T00:01:00Z",
            "updated_at": "2024-01-01T00:10:00Z"
        })
    }

    #[tokio::test]
    async fn test_processed() {
        let (processor, transport) = processor(EmissionMode::Metrics);
        let outcome = processor.process(&run_envelope(completed_run())).await;

        assert!(outcome.is_success());
        assert!(matches!(outcome, ProcessOutcome::Processed(r) if r.metrics == 1));
        assert_eq!(transport.metrics().await[0].value, 540.0);
    }

    #[tokio::test]
    async fn test_unknown_event_is_skipped() {
        let (processor, transport) = processor(EmissionMode::Both);
        let envelope = EventEnvelope::new("issues", "d", json!({"action": "opened"}));
        let outcome = processor.process(&envelope).await;

        assert!(outcome.is_success());
        assert!(!outcome.should_retry());
        assert!(matches!(outcome, ProcessOutcome::Skipped { ref event_type } if event_type == "issues"));
        assert!(transport.metrics().await.is_empty());
        assert!(transport.spans().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_is_rejected() {
        let (processor, transport) = processor(EmissionMode::Both);
        let mut run = completed_run();
        run.as_object_mut().unwrap().remove("id");
        let outcome = processor.process(&run_envelope(run)).await;

        assert!(!outcome.is_success());
        assert!(!outcome.should_retry());
        assert!(matches!(outcome, ProcessOutcome::Rejected(_)));
        assert!(transport.metrics().await.is_empty());
    }

    #[tokio::test]
    async fn test_emission_failure_is_retryable() {
        let (processor, transport) = processor(EmissionMode::Metrics);
        transport.set_failing(true);
        let outcome = processor.process(&run_envelope(completed_run())).await;

        assert!(!outcome.is_success());
        assert!(outcome.should_retry());
        assert!(matches!(outcome, ProcessOutcome::Failed(ProcessError::Emission(_))));
    }

    #[tokio::test]
    async fn test_in_progress_run_succeeds_without_export() {
        let (processor, transport) = processor(EmissionMode::Metrics);
        transport.set_failing(true);
        let mut run = completed_run();
        run["status"] = json!("in_progress");
        let outcome = processor.process(&run_envelope(run)).await;

        assert!(matches!(outcome, ProcessOutcome::Processed(r) if r == EmissionReport::default()));
    }

    #[tokio::test]
    async fn test_derivation_panic_is_retryable_internal_failure() {
        fn exploding(
            _: &EventEnvelope,
            _: DateTime<Utc>,
        ) -> Result<Option<Derivation>, ParseError> {
            panic!("derivation blew up")
        }

        let (processor, transport) = processor(EmissionMode::Both);
        let outcome = processor
            .process_with(&run_envelope(completed_run()), Utc::now(), exploding)
            .await;

        assert!(!outcome.is_success());
        assert!(outcome.should_retry());
        assert!(matches!(
            outcome,
            ProcessOutcome::Failed(ProcessError::Internal(ref message)) if message == "derivation blew up"
        ));
        assert!(transport.metrics().await.is_empty());
        assert!(transport.spans().await.is_empty());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(1_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
