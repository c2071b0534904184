//! Typed GitHub Actions webhook payloads
//!
//! Only the fields the derivation engine reads are modelled. Identifiers are
//! required and fail deserialisation when missing; descriptive fields and
//! timestamps are optional and tolerate both absence and explicit `null`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Deserialize a value that GitHub may send as `null`, falling back to
/// `Default` for both `null` and absence (combine with `#[serde(default)]`).
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_run_attempt() -> i64 {
    1
}

/// Lifecycle status of a run, job or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Queued,
    InProgress,
    Completed,
    Waiting,
    Requested,
    Pending,
    /// Any status GitHub introduces that this model does not know yet
    #[serde(other)]
    Unknown,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Queued => "queued",
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Waiting => "waiting",
            WorkflowStatus::Requested => "requested",
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final outcome of a completed run, job or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowConclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
    TimedOut,
    ActionRequired,
    Neutral,
    Stale,
    StartupFailure,
    #[serde(other)]
    Unknown,
}

impl WorkflowConclusion {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowConclusion::Success => "success",
            WorkflowConclusion::Failure => "failure",
            WorkflowConclusion::Cancelled => "cancelled",
            WorkflowConclusion::Skipped => "skipped",
            WorkflowConclusion::TimedOut => "timed_out",
            WorkflowConclusion::ActionRequired => "action_required",
            WorkflowConclusion::Neutral => "neutral",
            WorkflowConclusion::Stale => "stale",
            WorkflowConclusion::StartupFailure => "startup_failure",
            WorkflowConclusion::Unknown => "unknown",
        }
    }
}

impl fmt::Display for WorkflowConclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository the event belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub name: String,
    pub full_name: String,
}

/// User whose action triggered the event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub id: i64,
    pub login: String,
}

/// One execution of a workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: i64,
    pub name: String,
    pub workflow_id: i64,
    pub run_number: i64,
    #[serde(default = "default_run_attempt")]
    pub run_attempt: i64,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub conclusion: Option<WorkflowConclusion>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub head_branch: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub head_sha: String,
    /// Event that triggered the run ("push", "pull_request", ...)
    #[serde(default, rename = "event", deserialize_with = "null_as_default")]
    pub event_trigger: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub html_url: String,
}

/// A single step inside a job. `number` is 1-based execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub number: i64,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub conclusion: Option<WorkflowConclusion>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// One unit of work within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowJob {
    pub id: i64,
    pub name: String,
    pub run_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub workflow_name: String,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub conclusion: Option<WorkflowConclusion>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub runner_name: Option<String>,
    #[serde(default)]
    pub runner_group_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub steps: Vec<Step>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub html_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub run_url: String,
}

/// `workflow_run` webhook payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunEvent {
    pub action: String,
    pub workflow_run: WorkflowRun,
    pub repository: Repository,
    pub sender: Sender,
}

/// `workflow_job` webhook payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowJobEvent {
    pub action: String,
    pub workflow_job: WorkflowJob,
    pub repository: Repository,
    pub sender: Sender,
}
