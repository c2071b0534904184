//! GitHub Actions webhook telemetry library exports

pub mod aggregator;
pub mod config;
pub mod derive;
pub mod events;
pub mod processor;
pub mod queue;
pub mod server;
pub mod signature;
pub mod telemetry;
pub mod worker;
