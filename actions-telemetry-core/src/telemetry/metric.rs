//! Flat metric records, the boundary form of a metric observation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::derive::MetricObservation;

/// Outbound metric: attribute values are already coerced to strings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub name: String,
    pub value: f64,
    /// Serialised as RFC 3339
    pub timestamp: DateTime<Utc>,
    pub attributes: BTreeMap<String, String>,
}

impl From<&MetricObservation> for MetricRecord {
    fn from(observation: &MetricObservation) -> Self {
        Self {
            name: observation.name.clone(),
            value: observation.value,
            timestamp: observation.timestamp,
            attributes: observation.attributes.to_string_map(),
        }
    }
}
