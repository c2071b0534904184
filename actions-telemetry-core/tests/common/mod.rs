//! Test helper functions for integration tests
//!
//! Shared across test files using the tests/common/ pattern.

#![allow(dead_code)]

use actions_telemetry_core::config::EmissionMode;
use actions_telemetry_core::processor::EventProcessor;
use actions_telemetry_core::telemetry::{MemoryTransport, TelemetryEmitter};
use serde_json::{json, Value};
use std::sync::{Arc, Once};

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Processor wired to an in-memory transport
pub fn memory_processor(mode: EmissionMode) -> (EventProcessor, Arc<MemoryTransport>) {
    init_test_logging();
    let transport = Arc::new(MemoryTransport::new());
    let emitter = TelemetryEmitter::new(mode, transport.clone(), true);
    (EventProcessor::new(emitter), transport)
}

fn repository() -> Value {
    json!({"id": 111, "name": "repo", "full_name": "owner/repo"})
}

fn sender() -> Value {
    json!({"id": 1, "login": "octocat"})
}

/// Completed run: created 00:00, started 00:01, updated 00:10
pub fn workflow_run_payload(run_id: i64) -> Value {
    json!({
        "action": "completed",
        "workflow_run": {
            "id": run_id,
            "name": "CI",
            "workflow_id": 789,
            "run_number": 42,
            "run_attempt": 1,
            "status": "completed",
            "conclusion": "success",
            "created_at": "2024-01-01T00:00:00Z",
            "run_started_at": "2024-01-01T00:01:00Z",
            "updated_at": "2024-01-01T00:10:00Z",
            "head_branch": "main",
            "head_sha": "abc123",
            "event": "push",
            "html_url": format!("https://github.com/owner/repo/actions/runs/{run_id}")
        },
        "repository": repository(),
        "sender": sender()
    })
}

/// Job 00:02–00:08 with steps 00:02:00–00:02:30 and 00:02:30–00:08:00
pub fn workflow_job_payload(run_id: i64) -> Value {
    json!({
        "action": "completed",
        "workflow_job": {
            "id": 555,
            "run_id": run_id,
            "name": "build",
            "workflow_name": "CI",
            "status": "completed",
            "conclusion": "success",
            "started_at": "2024-01-01T00:02:00Z",
            "completed_at": "2024-01-01T00:08:00Z",
            "runner_name": "runner-1",
            "runner_group_name": "default",
            "labels": ["self-hosted", "1ES.ManagedDevOps.Pool=linux-pool"],
            "html_url": "https://github.com/owner/repo/actions/runs/1/job/555",
            "run_url": format!("https://api.github.com/repos/owner/repo/actions/runs/{run_id}"),
            "steps": [
                {
                    "name": "Checkout",
                    "number": 1,
                    "status": "completed",
                    "conclusion": "success",
                    "started_at": "2024-01-01T00:02:00Z",
                    "completed_at": "2024-01-01T00:02:30Z"
                },
                {
                    "name": "Build",
                    "number": 2,
                    "status": "completed",
                    "conclusion": "success",
                    "started_at": "2024-01-01T00:02:30Z",
                    "completed_at": "2024-01-01T00:08:00Z"
                },
                {
                    "name": "Post Checkout",
                    "number": 3,
                    "status": "queued",
                    "conclusion": null,
                    "started_at": null,
                    "completed_at": null
                }
            ]
        },
        "repository": repository(),
        "sender": sender()
    })
}
