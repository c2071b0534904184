//! Span records for the run → job → step hierarchy.
//!
//! ```text
//! workflow_run (ROOT - trace_id derived from run id)
//!   └── workflow_job (CHILD)
//!         ├── workflow_job_step #1 (CHILD)
//!         └── workflow_job_step #2 (CHILD)
//! ```
//!
//! Run and job events arrive independently, so the trace identity and the run
//! span identity are both derived from the run id alone. Every event for the
//! same run lands in the same trace under the same root span id. Only the
//! `workflow_run` event records the run span; job events resume it as parent
//! context so each span id is exported once.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::derive::Attributes;

/// Position of a span in the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Root,
    Child,
}

/// A finished span ready for export
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanRecord {
    pub name: String,
    pub kind: SpanKind,
    /// 32-char hex trace identifier (16 bytes)
    pub trace_id: String,
    /// 16-char hex span identifier (8 bytes)
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub start_time_unix_nano: u64,
    pub end_time_unix_nano: u64,
    pub attributes: Attributes,
    pub measurements: BTreeMap<String, f64>,
}

/// Trace identity shared by every span of one workflow run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceIdentity {
    pub trace_id: String,
    pub root_span_id: String,
}

impl TraceIdentity {
    /// Derive the identity from the run id: SHA-256 of its decimal form,
    /// bytes 0..16 for the trace id and 16..24 for the run span id.
    pub fn for_run(run_id: i64) -> Self {
        let digest = Sha256::digest(run_id.to_string().as_bytes());
        Self {
            trace_id: hex::encode(&digest[..16]),
            root_span_id: hex::encode(&digest[16..24]),
        }
    }
}

/// Generate a unique 16-character hex span ID (8 bytes).
fn generate_span_id() -> String {
    let uuid = Uuid::now_v7();
    hex::encode(&uuid.as_bytes()[8..16])
}

/// Nanoseconds since the Unix epoch; instants before the epoch clamp to 0.
pub fn to_unix_nanos(time: DateTime<Utc>) -> u64 {
    time.timestamp_nanos_opt()
        .map(|n| n.max(0) as u64)
        .unwrap_or(0)
}

/// A span that has been started but not yet ended
#[derive(Debug)]
pub struct OpenSpan {
    record: SpanRecord,
    /// False for a resumed span another event records
    recorded: bool,
}

impl OpenSpan {
    pub fn span_id(&self) -> &str {
        &self.record.span_id
    }

    pub fn trace_id(&self) -> &str {
        &self.record.trace_id
    }

    pub fn set_attributes(&mut self, attributes: Attributes) {
        self.record.attributes = attributes;
    }

    pub fn record_measurement(&mut self, name: &str, value: Option<f64>) {
        if let Some(value) = value {
            self.record.measurements.insert(name.to_string(), value);
        }
    }
}

/// Collects spans as they are ended.
///
/// Children must be ended before their parent; the recorded order is the
/// order of completion (steps, then job, then run).
#[derive(Debug, Default)]
pub struct TraceRecorder {
    finished: Vec<SpanRecord>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the root span of a run's trace
    pub fn start_root(
        &self,
        identity: &TraceIdentity,
        name: &str,
        start: DateTime<Utc>,
    ) -> OpenSpan {
        OpenSpan {
            record: SpanRecord {
                name: name.to_string(),
                kind: SpanKind::Root,
                trace_id: identity.trace_id.clone(),
                span_id: identity.root_span_id.clone(),
                parent_span_id: None,
                start_time_unix_nano: to_unix_nanos(start),
                end_time_unix_nano: 0,
                attributes: Attributes::new(),
                measurements: BTreeMap::new(),
            },
            recorded: true,
        }
    }

    /// Reopen the run span as parent context without recording it again
    pub fn resume_root(
        &self,
        identity: &TraceIdentity,
        name: &str,
        start: DateTime<Utc>,
    ) -> OpenSpan {
        OpenSpan {
            recorded: false,
            ..self.start_root(identity, name, start)
        }
    }

    /// Open a child of `parent` in the same trace with a fresh span id
    pub fn start_child(&self, parent: &OpenSpan, name: &str, start: DateTime<Utc>) -> OpenSpan {
        OpenSpan {
            record: SpanRecord {
                name: name.to_string(),
                kind: SpanKind::Child,
                trace_id: parent.record.trace_id.clone(),
                span_id: generate_span_id(),
                parent_span_id: Some(parent.record.span_id.clone()),
                start_time_unix_nano: to_unix_nanos(start),
                end_time_unix_nano: 0,
                attributes: Attributes::new(),
                measurements: BTreeMap::new(),
            },
            recorded: true,
        }
    }

    /// End a span and record it, unless it was resumed
    pub fn end(&mut self, span: OpenSpan, end: DateTime<Utc>) {
        if !span.recorded {
            return;
        }
        let mut record = span.record;
        record.end_time_unix_nano = to_unix_nanos(end);
        self.finished.push(record);
    }

    pub fn into_spans(self) -> Vec<SpanRecord> {
        self.finished
    }
}
