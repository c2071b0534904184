//! Per-derivation metric accumulator.
//!
//! A single derivation can emit the same metric name several times (a job's
//! `duration_seconds` plus one per step). The aggregator folds those
//! observations into a summary per name before the batch is exported. It is
//! created fresh for every derivation and never shared.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::derive::Attributes;

/// Statistical summary of every observation recorded under one name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub count: u64,
    /// Running mean (`sum / count`), not the latest value
    pub representative_value: f64,
    /// Every observed value, in arrival order
    pub values: Vec<f64>,
    /// Timestamp of the most recent observation
    pub timestamp: DateTime<Utc>,
    /// Attributes of the most recent observation
    pub attributes: Attributes,
}

impl MetricSummary {
    fn new(name: &str, value: f64, timestamp: DateTime<Utc>, attributes: Attributes) -> Self {
        Self {
            name: name.to_string(),
            min: value,
            max: value,
            sum: value,
            count: 1,
            representative_value: value,
            values: vec![value],
            timestamp,
            attributes,
        }
    }

    fn fold(&mut self, value: f64, timestamp: DateTime<Utc>, attributes: Attributes) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
        self.representative_value = self.sum / self.count as f64;
        self.values.push(value);
        self.timestamp = timestamp;
        self.attributes = attributes;
    }
}

/// Accumulator keyed by metric name
#[derive(Debug, Default)]
pub struct MetricAggregator {
    summaries: BTreeMap<String, MetricSummary>,
}

impl MetricAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation of `name`
    pub fn observe(
        &mut self,
        name: &str,
        value: f64,
        timestamp: DateTime<Utc>,
        attributes: Attributes,
    ) {
        match self.summaries.get_mut(name) {
            Some(summary) => summary.fold(value, timestamp, attributes),
            None => {
                self.summaries.insert(
                    name.to_string(),
                    MetricSummary::new(name, value, timestamp, attributes),
                );
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&MetricSummary> {
        self.summaries.get(name)
    }

    /// Total number of observations across all names
    pub fn observation_count(&self) -> u64 {
        self.summaries.values().map(|s| s.count).sum()
    }

    /// Consume the aggregator, yielding summaries ordered by name
    pub fn into_summaries(self) -> Vec<MetricSummary> {
        self.summaries.into_values().collect()
    }
}
