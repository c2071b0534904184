//! OTLP (OpenTelemetry Protocol) export over HTTP.
//!
//! Metrics become OTLP gauges posted to `/v1/metrics`; spans are posted to
//! `/v1/traces`. Bodies are protobuf-encoded.

use anyhow::{Context, Result};
use async_trait::async_trait;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{
    any_value, AnyValue, ArrayValue, InstrumentationScope, KeyValue,
};
use opentelemetry_proto::tonic::metrics::v1::{
    metric, number_data_point, Gauge, Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{
    span::SpanKind as OtlpSpanKind, ResourceSpans, ScopeSpans, Span, Status,
};
use prost::Message;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::time::Duration;
use tracing::{debug, warn};

use super::metric::MetricRecord;
use super::span::{to_unix_nanos, SpanKind, SpanRecord};
use super::transport::TelemetryTransport;
use crate::config::TelemetrySettings;
use crate::derive::{AttributeValue, Attributes};

const INSTRUMENTATION_SCOPE_NAME: &str = "actions-telemetry";
const MIN_TIMEOUT_SECONDS: u64 = 1;

/// Conclusions reported as an error span status
const ERROR_CONCLUSIONS: &[&str] = &["failure", "timed_out", "startup_failure"];

/// HTTP exporter for an OTLP collector
#[derive(Debug, Clone)]
pub struct OtlpTransport {
    client: reqwest::Client,
    endpoint: String,
    service_name: String,
}

impl OtlpTransport {
    pub fn new(settings: &TelemetrySettings) -> Result<Self> {
        let timeout_seconds = if settings.timeout_seconds < MIN_TIMEOUT_SECONDS {
            warn!(
                "Configured timeout_seconds={} is too low; using minimum of {} seconds",
                settings.timeout_seconds, MIN_TIMEOUT_SECONDS
            );
            MIN_TIMEOUT_SECONDS
        } else {
            settings.timeout_seconds
        };

        let mut headers = HeaderMap::new();
        for (key, value) in &settings.otlp_headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .with_context(|| format!("Invalid OTLP header name: {key}"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for OTLP header {key}"))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: settings.otlp_endpoint.trim().trim_end_matches('/').to_string(),
            service_name: settings.service_name.clone(),
        })
    }

    async fn post(&self, path: &str, payload: Vec<u8>) -> Result<()> {
        let url = format!("{}{}", self.endpoint, path);
        debug!("Exporting OTLP payload to {}", url);

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/x-protobuf")
            .body(payload)
            .send()
            .await
            .with_context(|| format!("Failed to send OTLP export request to {url}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("OTLP export failed: {} - {}", status, body);
            anyhow::bail!("OTLP export to {} failed with status {}", url, status);
        }

        Ok(())
    }

    fn resource(&self) -> Resource {
        Resource {
            attributes: vec![
                kv_string("service.name", &self.service_name),
                kv_string("service.version", env!("CARGO_PKG_VERSION")),
                kv_string("telemetry.sdk.name", "actions-telemetry"),
                kv_string("telemetry.sdk.language", "rust"),
            ],
            ..Default::default()
        }
    }
}

#[async_trait]
impl TelemetryTransport for OtlpTransport {
    async fn export_metrics(&self, metrics: &[MetricRecord]) -> Result<()> {
        if metrics.is_empty() {
            return Ok(());
        }
        let request = metrics_request(self.resource(), metrics);
        self.post("/v1/metrics", request.encode_to_vec()).await
    }

    async fn export_spans(&self, spans: &[SpanRecord]) -> Result<()> {
        if spans.is_empty() {
            return Ok(());
        }
        let request = traces_request(self.resource(), spans);
        self.post("/v1/traces", request.encode_to_vec()).await
    }

    fn name(&self) -> &'static str {
        "otlp"
    }
}

fn scope() -> InstrumentationScope {
    InstrumentationScope {
        name: INSTRUMENTATION_SCOPE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ..Default::default()
    }
}

/// One gauge per record; records sharing a name stay separate data points
fn metrics_request(resource: Resource, metrics: &[MetricRecord]) -> ExportMetricsServiceRequest {
    let metrics = metrics
        .iter()
        .map(|record| Metric {
            name: record.name.clone(),
            unit: "s".to_string(),
            data: Some(metric::Data::Gauge(Gauge {
                data_points: vec![NumberDataPoint {
                    attributes: record
                        .attributes
                        .iter()
                        .map(|(k, v)| kv_string(k, v))
                        .collect(),
                    time_unix_nano: to_unix_nanos(record.timestamp),
                    value: Some(number_data_point::Value::AsDouble(record.value)),
                    ..Default::default()
                }],
            })),
            ..Default::default()
        })
        .collect();

    ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: Some(resource),
            scope_metrics: vec![ScopeMetrics {
                scope: Some(scope()),
                metrics,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

fn traces_request(resource: Resource, spans: &[SpanRecord]) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: Some(resource),
            scope_spans: vec![ScopeSpans {
                scope: Some(scope()),
                spans: spans.iter().map(build_span).collect(),
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

fn build_span(record: &SpanRecord) -> Span {
    let mut attributes = typed_attributes(&record.attributes);
    attributes.extend(
        record
            .measurements
            .iter()
            .map(|(k, v)| kv_double(&format!("measurement.{k}"), *v)),
    );

    let conclusion = match record.attributes.get("conclusion") {
        Some(AttributeValue::Str(c)) => c.as_str(),
        _ => "",
    };
    let status = if ERROR_CONCLUSIONS.contains(&conclusion) {
        Status {
            code: 2, // Error
            message: conclusion.to_string(),
        }
    } else {
        Status {
            code: 1, // Ok
            message: String::new(),
        }
    };

    Span {
        trace_id: parse_id::<16>(&record.trace_id).to_vec(),
        span_id: parse_id::<8>(&record.span_id).to_vec(),
        parent_span_id: record
            .parent_span_id
            .as_deref()
            .map(|id| parse_id::<8>(id).to_vec())
            .unwrap_or_default(),
        name: record.name.clone(),
        kind: match record.kind {
            SpanKind::Root => OtlpSpanKind::Server as i32,
            SpanKind::Child => OtlpSpanKind::Internal as i32,
        },
        start_time_unix_nano: record.start_time_unix_nano,
        end_time_unix_nano: record.end_time_unix_nano,
        attributes,
        status: Some(status),
        ..Default::default()
    }
}

/// Native OTLP values; absent attributes are omitted
fn typed_attributes(attributes: &Attributes) -> Vec<KeyValue> {
    attributes
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                AttributeValue::Str(s) => any_value::Value::StringValue(s.clone()),
                AttributeValue::Int(i) => any_value::Value::IntValue(*i),
                AttributeValue::Float(f) => any_value::Value::DoubleValue(*f),
                AttributeValue::Timestamp(_) => any_value::Value::StringValue(value.to_string()),
                AttributeValue::List(items) => any_value::Value::ArrayValue(ArrayValue {
                    values: items
                        .iter()
                        .map(|item| AnyValue {
                            value: Some(any_value::Value::StringValue(item.clone())),
                        })
                        .collect(),
                }),
                AttributeValue::Absent => return None,
            };
            Some(KeyValue {
                key: key.to_string(),
                value: Some(AnyValue { value: Some(value) }),
            })
        })
        .collect()
}

fn kv_string(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}

fn kv_double(key: &str, value: f64) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::DoubleValue(value)),
        }),
    }
}

/// Decode a hex identifier into a fixed-width byte array, zero padded
fn parse_id<const N: usize>(id: &str) -> [u8; N] {
    let mut result = [0u8; N];
    if let Ok(bytes) = hex::decode(id) {
        let len = bytes.len().min(N);
        result[..len].copy_from_slice(&bytes[..len]);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::span::TraceIdentity;
    use axum::{body::Bytes, http::StatusCode, routing::post, Router};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn metric_record() -> MetricRecord {
        MetricRecord {
            name: "duration_seconds".into(),
            value: 540.0,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap(),
            attributes: BTreeMap::from([("type".to_string(), "workflow_run".to_string())]),
        }
    }

    fn span_record(conclusion: &str) -> SpanRecord {
        let identity = TraceIdentity::for_run(7);
        SpanRecord {
            name: "workflow_run".into(),
            kind: SpanKind::Root,
            trace_id: identity.trace_id,
            span_id: identity.root_span_id,
            parent_span_id: None,
            start_time_unix_nano: 1,
            end_time_unix_nano: 2,
            attributes: Attributes::new()
                .with("conclusion", conclusion)
                .with("run_id", 7_i64)
                .with("runner_name", None::<String>),
            measurements: BTreeMap::from([("duration_seconds".to_string(), 540.0)]),
        }
    }

    #[test]
    fn test_id_parsing() {
        let span_id = "abc123def4567890";
        assert_eq!(hex::encode(parse_id::<8>(span_id)), span_id);
        assert_eq!(parse_id::<8>("not hex"), [0u8; 8]);
        assert_eq!(parse_id::<16>("ab"), {
            let mut expected = [0u8; 16];
            expected[0] = 0xab;
            expected
        });
    }

    #[test]
    fn test_metrics_request_shape() {
        let request = metrics_request(Resource::default(), &[metric_record()]);
        let metrics = &request.resource_metrics[0].scope_metrics[0].metrics;
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name, "duration_seconds");

        let Some(metric::Data::Gauge(gauge)) = &metrics[0].data else {
            panic!("expected gauge");
        };
        let point = &gauge.data_points[0];
        assert_eq!(point.value, Some(number_data_point::Value::AsDouble(540.0)));
        assert_eq!(point.time_unix_nano, 1_704_067_800_000_000_000);
        assert_eq!(point.attributes[0].key, "type");
    }

    #[test]
    fn test_build_span() {
        let span = build_span(&span_record("success"));
        assert_eq!(span.trace_id.len(), 16);
        assert_eq!(span.span_id.len(), 8);
        assert!(span.parent_span_id.is_empty());
        assert_eq!(span.kind, OtlpSpanKind::Server as i32);
        assert_eq!(span.status.as_ref().map(|s| s.code), Some(1));

        let keys: Vec<&str> = span.attributes.iter().map(|kv| kv.key.as_str()).collect();
        assert!(keys.contains(&"run_id"));
        assert!(keys.contains(&"measurement.duration_seconds"));
        assert!(!keys.contains(&"runner_name"));
    }

    #[test]
    fn test_failed_conclusion_sets_error_status() {
        let span = build_span(&span_record("failure"));
        let status = span.status.unwrap();
        assert_eq!(status.code, 2);
        assert_eq!(status.message, "failure");
    }

    #[test]
    fn test_startup_failure_sets_error_status() {
        let span = build_span(&span_record("startup_failure"));
        assert_eq!(span.status.unwrap().code, 2);
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let settings = TelemetrySettings {
            otlp_endpoint: "http://localhost:4318".into(),
            otlp_headers: BTreeMap::from([("bad header".to_string(), "x".to_string())]),
            ..Default::default()
        };
        assert!(OtlpTransport::new(&settings).is_err());
    }

    async fn collector(status: StatusCode) -> (String, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = move |path: &'static str, seen: Arc<Mutex<Vec<String>>>| {
            post(move |body: Bytes| async move {
                assert!(!body.is_empty());
                seen.lock().await.push(path.to_string());
                status
            })
        };
        let app = Router::new()
            .route("/v1/metrics", record("/v1/metrics", seen.clone()))
            .route("/v1/traces", record("/v1/traces", seen.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/"), seen)
    }

    #[tokio::test]
    async fn test_export_to_collector() {
        let (endpoint, seen) = collector(StatusCode::OK).await;
        let transport = OtlpTransport::new(&TelemetrySettings {
            otlp_endpoint: endpoint,
            ..Default::default()
        })
        .unwrap();

        transport.export_metrics(&[metric_record()]).await.unwrap();
        transport.export_spans(&[span_record("success")]).await.unwrap();
        transport.export_spans(&[]).await.unwrap();

        assert_eq!(*seen.lock().await, vec!["/v1/metrics", "/v1/traces"]);
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let (endpoint, _) = collector(StatusCode::SERVICE_UNAVAILABLE).await;
        let transport = OtlpTransport::new(&TelemetrySettings {
            otlp_endpoint: endpoint,
            ..Default::default()
        })
        .unwrap();

        let err = transport.export_metrics(&[metric_record()]).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
