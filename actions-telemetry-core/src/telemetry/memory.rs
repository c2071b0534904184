//! In-memory transport that captures exports for inspection.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::metric::MetricRecord;
use super::span::SpanRecord;
use super::transport::TelemetryTransport;

/// Records every exported batch. Can be switched into a failing mode to
/// simulate an unreachable backend.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    metrics: Mutex<Vec<MetricRecord>>,
    spans: Mutex<Vec<SpanRecord>>,
    failing: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent exports fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn metrics(&self) -> Vec<MetricRecord> {
        self.metrics.lock().await.clone()
    }

    pub async fn spans(&self) -> Vec<SpanRecord> {
        self.spans.lock().await.clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("memory transport is in failing mode");
        }
        Ok(())
    }
}

#[async_trait]
impl TelemetryTransport for MemoryTransport {
    async fn export_metrics(&self, metrics: &[MetricRecord]) -> Result<()> {
        self.check()?;
        self.metrics.lock().await.extend_from_slice(metrics);
        Ok(())
    }

    async fn export_spans(&self, spans: &[SpanRecord]) -> Result<()> {
        self.check()?;
        self.spans.lock().await.extend_from_slice(spans);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn record() -> MetricRecord {
        MetricRecord {
            name: "duration_seconds".into(),
            value: 1.0,
            timestamp: Utc::now(),
            attributes: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_captures_metrics() {
        let transport = MemoryTransport::new();
        transport.export_metrics(&[record(), record()]).await.unwrap();
        assert_eq!(transport.metrics().await.len(), 2);
        assert!(transport.spans().await.is_empty());
    }

    #[tokio::test]
    async fn test_failing_mode() {
        let transport = MemoryTransport::new();
        transport.set_failing(true);
        assert!(transport.export_metrics(&[record()]).await.is_err());
        assert!(transport.metrics().await.is_empty());

        transport.set_failing(false);
        assert!(transport.export_metrics(&[record()]).await.is_ok());
    }
}
