//! Structured-log sink used when no telemetry backend is configured.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use super::metric::MetricRecord;
use super::span::SpanRecord;
use super::transport::TelemetryTransport;

/// Writes each metric and span as one `info!` event under target `telemetry`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl TelemetryTransport for LogTransport {
    async fn export_metrics(&self, metrics: &[MetricRecord]) -> Result<()> {
        for metric in metrics {
            let properties = serde_json::to_string(&metric.attributes)?;
            info!(
                target: "telemetry",
                name = %metric.name,
                value = metric.value,
                timestamp = %metric.timestamp.to_rfc3339(),
                properties = %properties,
                "metric"
            );
        }
        Ok(())
    }

    async fn export_spans(&self, spans: &[SpanRecord]) -> Result<()> {
        for span in spans {
            let properties = serde_json::to_string(&span.attributes.to_string_map())?;
            let measurements = serde_json::to_string(&span.measurements)?;
            info!(
                target: "telemetry",
                name = %span.name,
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                parent_span_id = span.parent_span_id.as_deref().unwrap_or(""),
                properties = %properties,
                measurements = %measurements,
                "span"
            );
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
