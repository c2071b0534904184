//! Emission adapter
//!
//! Chooses the transport once, at construction: an OTLP exporter when an
//! endpoint is configured, the structured-log sink otherwise. The emission
//! mode decides which shapes (flat metrics, spans, or both) leave the process.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

use super::log::LogTransport;
use super::metric::MetricRecord;
use super::otlp::OtlpTransport;
use super::transport::TelemetryTransport;
use crate::config::{EmissionMode, TelemetrySettings};
use crate::derive::Derivation;

/// Counts of what one emission sent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmissionReport {
    pub metrics: usize,
    pub spans: usize,
}

#[derive(Clone)]
pub struct TelemetryEmitter {
    mode: EmissionMode,
    transport: Arc<dyn TelemetryTransport>,
    transport_configured: bool,
}

impl std::fmt::Debug for TelemetryEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryEmitter")
            .field("mode", &self.mode)
            .field("transport", &self.transport.name())
            .field("transport_configured", &self.transport_configured)
            .finish()
    }
}

impl TelemetryEmitter {
    /// Build the emitter described by `settings`
    pub fn from_settings(settings: &TelemetrySettings) -> Result<Self> {
        if settings.transport_configured() {
            let transport =
                OtlpTransport::new(settings).context("Failed to configure OTLP transport")?;
            info!(
                endpoint = %settings.otlp_endpoint,
                mode = %settings.mode,
                "Telemetry export via OTLP"
            );
            Ok(Self::new(settings.mode, Arc::new(transport), true))
        } else {
            info!(
                mode = %settings.mode,
                "No telemetry endpoint configured; writing telemetry to the log"
            );
            Ok(Self::new(settings.mode, Arc::new(LogTransport), false))
        }
    }

    pub fn new(
        mode: EmissionMode,
        transport: Arc<dyn TelemetryTransport>,
        transport_configured: bool,
    ) -> Self {
        Self {
            mode,
            transport,
            transport_configured,
        }
    }

    pub fn transport_configured(&self) -> bool {
        self.transport_configured
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Send whatever the emission mode selects from `derivation`
    pub async fn emit(&self, derivation: &Derivation) -> Result<EmissionReport> {
        let mut report = EmissionReport::default();

        if self.mode.emits_metrics() && !derivation.observations.is_empty() {
            let records: Vec<MetricRecord> =
                derivation.observations.iter().map(MetricRecord::from).collect();
            self.transport
                .export_metrics(&records)
                .await
                .with_context(|| format!("{} transport failed to export metrics", self.transport.name()))?;
            report.metrics = records.len();
        }

        if self.mode.emits_traces() && !derivation.spans.is_empty() {
            self.transport
                .export_spans(&derivation.spans)
                .await
                .with_context(|| format!("{} transport failed to export spans", self.transport.name()))?;
            report.spans = derivation.spans.len();
        }

        debug!(
            transport = self.transport.name(),
            metrics = report.metrics,
            spans = report.spans,
            "Telemetry emitted"
        );
        Ok(report)
    }
}
