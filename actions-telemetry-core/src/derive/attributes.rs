//! Typed attribute sets.
//!
//! Attributes stay typed through the derivation so the OTLP binding can emit
//! native int/double values; string coercion happens only at the export
//! boundary ([`Attributes::to_string_map`]).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::events::{WorkflowConclusion, WorkflowStatus};

/// A single attribute value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Str(String),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    List(Vec<String>),
    /// Optional field that was not present in the payload
    Absent,
}

impl fmt::Display for AttributeValue {
    /// String coercion used at the export boundary
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Str(s) => f.write_str(s),
            AttributeValue::Int(i) => write!(f, "{i}"),
            AttributeValue::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{v:.1}"),
            AttributeValue::Float(v) => write!(f, "{v}"),
            AttributeValue::Timestamp(ts) => {
                f.write_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            AttributeValue::List(items) => f.write_str(&items.join(",")),
            AttributeValue::Absent => Ok(()),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Str(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Str(value)
    }
}

impl From<&String> for AttributeValue {
    fn from(value: &String) -> Self {
        AttributeValue::Str(value.clone())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(value: DateTime<Utc>) -> Self {
        AttributeValue::Timestamp(value)
    }
}

impl From<&[String]> for AttributeValue {
    fn from(value: &[String]) -> Self {
        AttributeValue::List(value.to_vec())
    }
}

impl From<WorkflowStatus> for AttributeValue {
    fn from(value: WorkflowStatus) -> Self {
        AttributeValue::Str(value.as_str().to_string())
    }
}

impl From<WorkflowConclusion> for AttributeValue {
    fn from(value: WorkflowConclusion) -> Self {
        AttributeValue::Str(value.as_str().to_string())
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(AttributeValue::Absent, Into::into)
    }
}

/// Ordered, typed attribute set
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<AttributeValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Coerce every value to a string (absent values become "")
    pub fn to_string_map(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_string_coercion() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap();
        let labels = vec!["self-hosted".to_string(), "linux".to_string()];
        let attrs = Attributes::new()
            .with("name", "CI")
            .with("run_id", 123_i64)
            .with("duration_seconds", 540.0)
            .with("fraction", 0.5)
            .with("negative", -30.0)
            .with("completed_at", ts)
            .with("labels", labels.as_slice())
            .with("conclusion", None::<WorkflowConclusion>)
            .with("status", WorkflowStatus::Completed);

        let map = attrs.to_string_map();
        assert_eq!(map["name"], "CI");
        assert_eq!(map["run_id"], "123");
        assert_eq!(map["duration_seconds"], "540.0");
        assert_eq!(map["fraction"], "0.5");
        assert_eq!(map["negative"], "-30.0");
        assert_eq!(map["completed_at"], "2024-01-01T00:10:00Z");
        assert_eq!(map["labels"], "self-hosted,linux");
        assert_eq!(map["conclusion"], "");
        assert_eq!(map["status"], "completed");
    }

    #[test]
    fn test_insert_overwrites() {
        let mut attrs = Attributes::new().with("type", "workflow_job");
        attrs.insert("type", "workflow_job_step");
        assert_eq!(attrs.len(), 1);
        assert_eq!(
            attrs.get("type"),
            Some(&AttributeValue::Str("workflow_job_step".into()))
        );
    }

    #[test]
    fn test_serialises_as_flat_object() {
        let attrs = Attributes::new().with("a", 1_i64).with("b", None::<String>);
        let json = serde_json::to_value(&attrs).unwrap();
        assert_eq!(json, serde_json::json!({"a": 1, "b": null}));
    }
}
