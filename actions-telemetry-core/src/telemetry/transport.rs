//! Telemetry transport trait - abstraction over export backends
//!
//! - OTLP/HTTP collector
//! - Structured log sink (no backend configured)
//! - In-memory capture (testing)

use anyhow::Result;
use async_trait::async_trait;

use super::metric::MetricRecord;
use super::span::SpanRecord;

/// Trait for telemetry export backends
///
/// Implementations own their connection details and timeouts. An error means
/// the batch was not delivered and the caller may retry the whole message.
#[async_trait]
pub trait TelemetryTransport: Send + Sync {
    /// Export one batch of flat metrics
    async fn export_metrics(&self, metrics: &[MetricRecord]) -> Result<()>;

    /// Export one batch of finished spans
    async fn export_spans(&self, spans: &[SpanRecord]) -> Result<()>;

    /// Transport identifier for logging/debugging
    fn name(&self) -> &'static str;
}
