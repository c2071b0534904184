//! Duration and queue-wait computation.
//!
//! A duration exists only when both bounds are present; one missing bound
//! means "unknown", never zero. Negative results (clock skew, malformed
//! payloads) are passed through unchanged.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::events::{Step, WorkflowJob, WorkflowRun, WorkflowStatus};

/// Durations derived for one run or job
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DerivedMetrics {
    pub duration_seconds: Option<f64>,
    pub queue_duration_seconds: Option<f64>,
}

/// Whole seconds elapsed from `start` to `end`, as a float.
///
/// The sub-second remainder is truncated toward zero.
pub fn seconds_between(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<f64> {
    match (start, end) {
        (Some(start), Some(end)) => Some((end - start).num_seconds() as f64),
        _ => None,
    }
}

/// Run duration is `updated_at − run_started_at`, and only for completed runs.
/// Queue duration is `run_started_at − created_at`, gated on the duration.
pub fn run_durations(run: &WorkflowRun) -> DerivedMetrics {
    if run.status != WorkflowStatus::Completed {
        return DerivedMetrics::default();
    }
    let duration_seconds = seconds_between(run.run_started_at, run.updated_at);
    let queue_duration_seconds = duration_seconds
        .and_then(|_| seconds_between(run.created_at, run.run_started_at));
    DerivedMetrics {
        duration_seconds,
        queue_duration_seconds,
    }
}

/// Job duration is `completed_at − started_at` whenever both are present,
/// regardless of status. Queue duration is `started_at − created_at`, gated
/// on the duration.
pub fn job_durations(job: &WorkflowJob) -> DerivedMetrics {
    let duration_seconds = seconds_between(job.started_at, job.completed_at);
    let queue_duration_seconds =
        duration_seconds.and_then(|_| seconds_between(job.created_at, job.started_at));
    DerivedMetrics {
        duration_seconds,
        queue_duration_seconds,
    }
}

pub fn step_duration(step: &Step) -> Option<f64> {
    seconds_between(step.started_at, step.completed_at)
}
