//! Duration and hierarchy derivation
//!
//! Turns one typed event into everything the emission adapter needs:
//!
//! ```text
//! WorkflowRunEvent ──► run durations ──► 1 observation + run span
//! WorkflowJobEvent ──► job durations ──► 1 observation + job span
//!                  └─► per step      ──► 1 observation + step span each
//! ```
//!
//! Derivation is pure and synchronous. Each call owns its own
//! [`MetricAggregator`] and [`TraceRecorder`]; nothing is shared between calls.

pub mod attributes;
pub mod duration;
pub mod pool;

pub use attributes::{AttributeValue, Attributes};
pub use duration::{job_durations, run_durations, seconds_between, step_duration, DerivedMetrics};
pub use pool::pool_name;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::aggregator::{MetricAggregator, MetricSummary};
use crate::events::{Repository, Step, WorkflowJobEvent, WorkflowRunEvent};
use crate::telemetry::span::{OpenSpan, SpanRecord, TraceIdentity, TraceRecorder};

/// Name shared by every duration observation; the `type` attribute tells
/// runs, jobs and steps apart.
pub const DURATION_METRIC: &str = "duration_seconds";
pub const QUEUE_DURATION_MEASUREMENT: &str = "queue_duration_seconds";

/// Which entity an observation or span describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricScope {
    WorkflowRun,
    WorkflowJob,
    WorkflowJobStep,
}

impl MetricScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricScope::WorkflowRun => "workflow_run",
            MetricScope::WorkflowJob => "workflow_job",
            MetricScope::WorkflowJobStep => "workflow_job_step",
        }
    }
}

/// One flat metric data point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricObservation {
    pub name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub attributes: Attributes,
}

impl MetricObservation {
    fn duration(value: f64, timestamp: DateTime<Utc>, attributes: Attributes) -> Self {
        Self {
            name: DURATION_METRIC.to_string(),
            value,
            timestamp,
            attributes,
        }
    }

    /// The scope recorded in the `type` attribute
    pub fn scope(&self) -> Option<&str> {
        match self.attributes.get("type") {
            Some(AttributeValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Everything derived from a single event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Derivation {
    pub event_type: MetricScope,
    /// Durations of the run or job itself (steps are in `observations`)
    pub metrics: DerivedMetrics,
    pub observations: Vec<MetricObservation>,
    pub summaries: Vec<MetricSummary>,
    pub spans: Vec<SpanRecord>,
}

impl Derivation {
    /// True when there is nothing to export
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty() && self.spans.is_empty()
    }

    fn finish(
        event_type: MetricScope,
        metrics: DerivedMetrics,
        observations: Vec<MetricObservation>,
        spans: Vec<SpanRecord>,
    ) -> Self {
        let mut aggregator = MetricAggregator::new();
        for observation in &observations {
            aggregator.observe(
                &observation.name,
                observation.value,
                observation.timestamp,
                observation.attributes.clone(),
            );
        }
        if let Some(summary) = aggregator.get(DURATION_METRIC) {
            debug!(
                event_type = event_type.as_str(),
                count = summary.count,
                min = summary.min,
                max = summary.max,
                mean = summary.representative_value,
                "Aggregated duration observations"
            );
        }
        Self {
            event_type,
            metrics,
            observations,
            summaries: aggregator.into_summaries(),
            spans,
        }
    }
}

/// Derive telemetry for a `workflow_run` event.
///
/// Produces one observation and one root span, and only when the run is
/// completed with both start and end timestamps present.
pub fn derive_run(event: &WorkflowRunEvent, processed_at: DateTime<Utc>) -> Derivation {
    let run = &event.workflow_run;
    let metrics = run_durations(run);

    let Some(duration) = metrics.duration_seconds else {
        debug!(run_id = run.id, status = %run.status, "Run has no duration yet");
        return Derivation::finish(MetricScope::WorkflowRun, metrics, Vec::new(), Vec::new());
    };

    let attributes = run_attributes(event, &metrics);
    let observation = MetricObservation::duration(duration, processed_at, attributes.clone());

    let identity = TraceIdentity::for_run(run.id);
    let mut recorder = TraceRecorder::new();
    let mut span = recorder.start_root(
        &identity,
        MetricScope::WorkflowRun.as_str(),
        run.run_started_at.unwrap_or(processed_at),
    );
    span.set_attributes(attributes);
    record_durations(&mut span, &metrics);
    recorder.end(span, run.updated_at.unwrap_or(processed_at));

    Derivation::finish(
        MetricScope::WorkflowRun,
        metrics,
        vec![observation],
        recorder.into_spans(),
    )
}

/// Derive telemetry for a `workflow_job` event.
///
/// The job observation is gated on the job duration; each step with both
/// timestamps yields its own observation regardless of the job outcome.
/// Spans form job → steps under the run span, emitted when anything qualifies.
pub fn derive_job(event: &WorkflowJobEvent, processed_at: DateTime<Utc>) -> Derivation {
    let job = &event.workflow_job;
    let metrics = job_durations(job);
    let job_attrs = job_attributes(event, &metrics);

    let mut observations = Vec::new();
    if let Some(duration) = metrics.duration_seconds {
        observations.push(MetricObservation::duration(
            duration,
            processed_at,
            job_attrs.clone(),
        ));
    }

    let steps: Vec<(&Step, f64)> = job
        .steps
        .iter()
        .filter_map(|step| step_duration(step).map(|d| (step, d)))
        .collect();
    let step_attrs: Vec<Attributes> = steps
        .iter()
        .map(|(step, d)| step_attributes(event, step, *d))
        .collect();

    for ((_, d), attrs) in steps.iter().zip(&step_attrs) {
        observations.push(MetricObservation::duration(*d, processed_at, attrs.clone()));
    }

    if metrics.duration_seconds.is_none() && steps.is_empty() {
        debug!(job_id = job.id, status = %job.status, "Job has no timed entities");
        return Derivation::finish(MetricScope::WorkflowJob, metrics, observations, Vec::new());
    }

    let identity = TraceIdentity::for_run(job.run_id);
    let mut recorder = TraceRecorder::new();

    let job_start = job.started_at.unwrap_or(processed_at);
    let job_end = job.completed_at.unwrap_or(processed_at);

    // The run event records the run span itself
    let run_span = recorder.resume_root(&identity, MetricScope::WorkflowRun.as_str(), job_start);

    let mut job_span = recorder.start_child(&run_span, MetricScope::WorkflowJob.as_str(), job_start);
    job_span.set_attributes(job_attrs);
    record_durations(&mut job_span, &metrics);

    for ((step, d), attrs) in steps.iter().zip(step_attrs) {
        let mut step_span = recorder.start_child(
            &job_span,
            MetricScope::WorkflowJobStep.as_str(),
            step.started_at.unwrap_or(processed_at),
        );
        step_span.set_attributes(attrs);
        step_span.record_measurement(DURATION_METRIC, Some(*d));
        recorder.end(step_span, step.completed_at.unwrap_or(processed_at));
    }

    recorder.end(job_span, job_end);
    recorder.end(run_span, job_end);

    Derivation::finish(
        MetricScope::WorkflowJob,
        metrics,
        observations,
        recorder.into_spans(),
    )
}

fn record_durations(span: &mut OpenSpan, metrics: &DerivedMetrics) {
    span.record_measurement(DURATION_METRIC, metrics.duration_seconds);
    span.record_measurement(QUEUE_DURATION_MEASUREMENT, metrics.queue_duration_seconds);
}

fn repository_attributes(attrs: Attributes, repository: &Repository) -> Attributes {
    attrs
        .with("repository_id", repository.id)
        .with("repository", &repository.name)
        .with("repository_full_name", &repository.full_name)
}

fn run_attributes(event: &WorkflowRunEvent, metrics: &DerivedMetrics) -> Attributes {
    let run = &event.workflow_run;
    let attrs = Attributes::new()
        .with("type", MetricScope::WorkflowRun.as_str())
        .with("duration_seconds", metrics.duration_seconds)
        .with("queue_duration_seconds", metrics.queue_duration_seconds)
        .with("created_at", run.created_at)
        .with("started_at", run.run_started_at)
        .with("completed_at", run.updated_at)
        .with("run_id", run.id)
        .with("workflow_id", run.workflow_id)
        .with("workflow_name", &run.name)
        .with("run_number", run.run_number)
        .with("run_attempt", run.run_attempt);
    repository_attributes(attrs, &event.repository)
        .with("status", run.status)
        .with("conclusion", run.conclusion)
        .with("event_trigger", &run.event_trigger)
        .with("head_branch", &run.head_branch)
        .with("head_sha", &run.head_sha)
        .with("triggered_by", &event.sender.login)
        .with("action", &event.action)
        .with("labels", run.labels.as_slice())
        .with("pool_name", pool_name(&run.labels))
        .with("run_url", &run.html_url)
}

fn job_attributes(event: &WorkflowJobEvent, metrics: &DerivedMetrics) -> Attributes {
    let job = &event.workflow_job;
    let attrs = Attributes::new()
        .with("type", MetricScope::WorkflowJob.as_str())
        .with("job_id", job.id)
        .with("job_name", &job.name)
        .with("duration_seconds", metrics.duration_seconds)
        .with("queue_duration_seconds", metrics.queue_duration_seconds)
        .with("created_at", job.created_at)
        .with("started_at", job.started_at)
        .with("completed_at", job.completed_at)
        .with("run_id", job.run_id)
        .with("workflow_name", &job.workflow_name);
    repository_attributes(attrs, &event.repository)
        .with("status", job.status)
        .with("conclusion", job.conclusion)
        .with("action", &event.action)
        .with("triggered_by", &event.sender.login)
        .with("runner_name", job.runner_name.clone())
        .with("runner_group_name", job.runner_group_name.clone())
        .with("labels", job.labels.as_slice())
        .with("pool_name", pool_name(&job.labels))
        .with("run_url", &job.run_url)
        .with("job_url", &job.html_url)
}

fn step_attributes(event: &WorkflowJobEvent, step: &Step, duration: f64) -> Attributes {
    let job = &event.workflow_job;
    let attrs = Attributes::new()
        .with("type", MetricScope::WorkflowJobStep.as_str())
        .with("step_id", format!("{}-{}", job.id, step.number))
        .with("step_name", &step.name)
        .with("step_number", step.number)
        .with("started_at", step.started_at)
        .with("completed_at", step.completed_at)
        .with("duration_seconds", duration)
        .with("run_id", job.run_id)
        .with("parent_job_id", job.id)
        .with("parent_job_name", &job.name)
        .with("job_id", job.id)
        .with("job_name", &job.name)
        .with("workflow_name", &job.workflow_name);
    repository_attributes(attrs, &event.repository)
        .with("conclusion", step.conclusion)
        .with("status", step.status)
        .with("run_url", &job.run_url)
        .with("job_url", &job.html_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Sender, WorkflowConclusion, WorkflowJob, WorkflowRun, WorkflowStatus};
    use crate::telemetry::span::SpanKind;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(h: u32, m: u32, s: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()
    }

    fn repository() -> Repository {
        Repository {
            id: 111,
            name: "repo".into(),
            full_name: "owner/repo".into(),
        }
    }

    fn sender() -> Sender {
        Sender {
            id: 1,
            login: "octocat".into(),
        }
    }

    fn run_event(status: WorkflowStatus) -> WorkflowRunEvent {
        WorkflowRunEvent {
            action: "completed".into(),
            workflow_run: WorkflowRun {
                id: 123456,
                name: "CI".into(),
                workflow_id: 789,
                run_number: 42,
                run_attempt: 1,
                status,
                conclusion: Some(WorkflowConclusion::Success),
                created_at: at(0, 0, 0),
                run_started_at: at(0, 1, 0),
                updated_at: at(0, 10, 0),
                head_branch: "main".into(),
                head_sha: "abc123".into(),
                event_trigger: "push".into(),
                labels: vec!["ManagedDevOps.Pool=ci-pool".into()],
                html_url: "https://github.com/owner/repo/actions/runs/123456".into(),
            },
            repository: repository(),
            sender: sender(),
        }
    }

    fn step(number: i64, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Step {
        Step {
            name: format!("step {number}"),
            number,
            status: WorkflowStatus::Completed,
            conclusion: Some(WorkflowConclusion::Success),
            started_at: start,
            completed_at: end,
        }
    }

    fn job_event(steps: Vec<Step>) -> WorkflowJobEvent {
        WorkflowJobEvent {
            action: "completed".into(),
            workflow_job: WorkflowJob {
                id: 999,
                name: "build".into(),
                run_id: 123456,
                workflow_name: "CI".into(),
                status: WorkflowStatus::Completed,
                conclusion: Some(WorkflowConclusion::Success),
                created_at: at(0, 1, 30),
                started_at: at(0, 2, 0),
                completed_at: at(0, 8, 0),
                runner_name: Some("runner-1".into()),
                runner_group_name: None,
                labels: vec!["self-hosted".into()],
                steps,
                html_url: "https://github.com/owner/repo/actions/runs/123456/job/999".into(),
                run_url: "https://api.github.com/repos/owner/repo/actions/runs/123456".into(),
            },
            repository: repository(),
            sender: sender(),
        }
    }

    #[test]
    fn test_completed_run() {
        let derivation = derive_run(&run_event(WorkflowStatus::Completed), now());

        assert_eq!(derivation.metrics.duration_seconds, Some(540.0));
        assert_eq!(derivation.metrics.queue_duration_seconds, Some(60.0));
        assert_eq!(derivation.observations.len(), 1);

        let observation = &derivation.observations[0];
        assert_eq!(observation.name, DURATION_METRIC);
        assert_eq!(observation.value, 540.0);
        assert_eq!(observation.timestamp, now());
        assert_eq!(observation.scope(), Some("workflow_run"));

        let map = observation.attributes.to_string_map();
        assert_eq!(map["queue_duration_seconds"], "60.0");
        assert_eq!(map["pool_name"], "ci-pool");
        assert_eq!(map["triggered_by"], "octocat");
        assert_eq!(map["repository_full_name"], "owner/repo");
        assert_eq!(map["conclusion"], "success");
        assert_eq!(map["completed_at"], "2024-01-01T00:10:00Z");

        assert_eq!(derivation.spans.len(), 1);
        let span = &derivation.spans[0];
        assert_eq!(span.kind, SpanKind::Root);
        assert_eq!(span.trace_id, TraceIdentity::for_run(123456).trace_id);
        assert_eq!(span.measurements[QUEUE_DURATION_MEASUREMENT], 60.0);
    }

    #[test]
    fn test_in_progress_run_emits_nothing() {
        let derivation = derive_run(&run_event(WorkflowStatus::InProgress), now());
        assert!(derivation.is_empty());
        assert!(derivation.summaries.is_empty());
        assert_eq!(derivation.metrics, DerivedMetrics::default());
    }

    #[test]
    fn test_job_with_steps() {
        let event = job_event(vec![
            step(1, at(0, 2, 0), at(0, 2, 30)),
            step(2, at(0, 2, 30), at(0, 8, 0)),
        ]);
        let derivation = derive_job(&event, now());

        let values: Vec<f64> = derivation.observations.iter().map(|o| o.value).collect();
        assert_eq!(values, vec![360.0, 30.0, 330.0]);
        assert_eq!(derivation.metrics.queue_duration_seconds, Some(30.0));

        let step_map = derivation.observations[1].attributes.to_string_map();
        assert_eq!(step_map["type"], "workflow_job_step");
        assert_eq!(step_map["step_id"], "999-1");
        assert_eq!(step_map["parent_job_id"], "999");
        assert_eq!(step_map["run_id"], "123456");

        assert_eq!(derivation.summaries.len(), 1);
        let summary = &derivation.summaries[0];
        assert_eq!(summary.count, 3);
        assert_eq!(summary.sum, 720.0);
        assert_eq!(summary.min, 30.0);
        assert_eq!(summary.max, 360.0);
        assert_eq!(summary.representative_value, 240.0);
    }

    #[test]
    fn test_job_span_hierarchy() {
        let event = job_event(vec![
            step(1, at(0, 2, 0), at(0, 2, 30)),
            step(2, at(0, 2, 30), at(0, 8, 0)),
        ]);
        let spans = derive_job(&event, now()).spans;

        let names: Vec<&str> = spans.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["workflow_job_step", "workflow_job_step", "workflow_job"]);

        let job = &spans[2];
        let identity = TraceIdentity::for_run(123456);
        assert_eq!(job.trace_id, identity.trace_id);
        assert_eq!(job.kind, SpanKind::Child);
        assert_eq!(job.parent_span_id.as_deref(), Some(identity.root_span_id.as_str()));
        for step in &spans[..2] {
            assert_eq!(step.trace_id, identity.trace_id);
            assert_eq!(step.parent_span_id.as_deref(), Some(job.span_id.as_str()));
        }
        assert_eq!(job.measurements[DURATION_METRIC], 360.0);
    }

    #[test]
    fn test_steps_missing_timestamps_are_skipped() {
        let event = job_event(vec![
            step(1, at(0, 2, 0), at(0, 2, 30)),
            step(2, at(0, 2, 30), None),
            step(3, None, None),
        ]);
        let derivation = derive_job(&event, now());
        let steps = derivation
            .observations
            .iter()
            .filter(|o| o.scope() == Some("workflow_job_step"))
            .count();
        assert_eq!(steps, 1);
    }

    #[test]
    fn test_steps_emitted_without_job_duration() {
        let mut event = job_event(vec![step(1, at(0, 2, 0), at(0, 2, 30))]);
        event.workflow_job.completed_at = None;
        let derivation = derive_job(&event, now());

        assert_eq!(derivation.metrics.duration_seconds, None);
        assert_eq!(derivation.observations.len(), 1);
        assert_eq!(derivation.observations[0].scope(), Some("workflow_job_step"));
        assert_eq!(derivation.spans.len(), 2);
    }

    #[test]
    fn test_job_without_anything_timed() {
        let mut event = job_event(vec![step(1, None, None)]);
        event.workflow_job.started_at = None;
        let derivation = derive_job(&event, now());
        assert!(derivation.is_empty());
    }

    #[test]
    fn test_run_and_job_share_trace() {
        let run = derive_run(&run_event(WorkflowStatus::Completed), now());
        let job = derive_job(&job_event(Vec::new()), now());

        let run_root = &run.spans[0];
        assert_eq!(job.spans.len(), 1);
        let job_span = &job.spans[0];
        assert_eq!(run_root.trace_id, job_span.trace_id);
        assert_eq!(job_span.parent_span_id.as_deref(), Some(run_root.span_id.as_str()));
        assert!(job.spans.iter().all(|s| s.kind == SpanKind::Child));
    }
}
