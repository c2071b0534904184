//! Telemetry emission
//!
//! ## Architecture
//!
//! ```text
//! Derivation ──► TelemetryEmitter (mode: metrics | traces | both)
//!                  └── dyn TelemetryTransport
//!                        ├── OtlpTransport   (endpoint configured)
//!                        ├── LogTransport    (fallback)
//!                        └── MemoryTransport (tests)
//! ```

pub mod emitter;
pub mod log;
pub mod memory;
pub mod metric;
pub mod otlp;
pub mod span;
pub mod transport;

pub use emitter::{EmissionReport, TelemetryEmitter};
pub use log::LogTransport;
pub use memory::MemoryTransport;
pub use metric::MetricRecord;
pub use otlp::OtlpTransport;
pub use span::{SpanKind, SpanRecord, TraceIdentity};
pub use transport::TelemetryTransport;
