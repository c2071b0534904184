//! actions-telemetry - GitHub Actions webhooks to duration metrics and traces
//!
//! Main entry point: argument parsing, tracing setup, signal handling and
//! wiring of settings → emitter → processor → server/worker.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use actions_telemetry_core::config::{ProcessingMode, Settings};
use actions_telemetry_core::derive::{derive_job, derive_run};
use actions_telemetry_core::events::{self, ParsedEvent};
use actions_telemetry_core::processor::EventProcessor;
use actions_telemetry_core::queue::{InMemoryQueue, MessageQueue};
use actions_telemetry_core::server::{self, AppState};
use actions_telemetry_core::signature;
use actions_telemetry_core::telemetry::TelemetryEmitter;
use actions_telemetry_core::worker::QueueWorker;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "actions-telemetry",
    about = "Turns GitHub Actions workflow webhooks into duration metrics and trace spans",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level (RUST_LOG takes precedence when set)
    #[clap(long, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Emit logs as JSON
    #[clap(long, global = true)]
    log_json: bool,

    /// YAML configuration file; environment variables override it
    #[clap(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run the webhook server (and the queue worker in queued mode)
    Serve {
        /// Override the bind port
        #[clap(long)]
        port: Option<u16>,
    },

    /// Derive telemetry from a payload and print it as JSON, without exporting
    Derive {
        /// Event type, as sent in the X-GitHub-Event header
        #[clap(long)]
        event_type: String,

        /// Payload file (reads stdin when omitted)
        #[clap(long)]
        file: Option<PathBuf>,
    },

    /// Check a payload against its X-Hub-Signature-256 header value
    VerifySignature {
        #[clap(long)]
        secret: String,

        /// Header value, e.g. sha256=<hex>
        #[clap(long)]
        signature: String,

        /// Payload file (reads stdin when omitted)
        #[clap(long)]
        file: Option<PathBuf>,
    },
}

fn initialize_tracing(log_level: &LogLevel, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_filter_directive()));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level, cli.log_json);

    match cli.command {
        Command::Serve { port } => {
            let mut settings = Settings::load(cli.config.as_deref())?;
            if let Some(port) = port {
                settings.server.port = port;
            }
            serve(settings).await
        }
        Command::Derive { event_type, file } => derive(&event_type, file.as_deref()),
        Command::VerifySignature {
            secret,
            signature,
            file,
        } => verify_signature(&secret, &signature, file.as_deref()),
    }
}

async fn serve(settings: Settings) -> Result<()> {
    let emitter = TelemetryEmitter::from_settings(&settings.telemetry)?;
    info!(
        transport = emitter.transport_name(),
        exporting = emitter.transport_configured(),
        processing = ?settings.queue.processing,
        "Starting actions-telemetry"
    );
    let processor = EventProcessor::new(emitter);
    let mut state = AppState::new(settings.webhook_secret.clone(), processor.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = match settings.queue.processing {
        ProcessingMode::Inline => None,
        ProcessingMode::Queued => {
            let queue: Arc<dyn MessageQueue> = Arc::new(InMemoryQueue::new());
            state = state.with_queue(queue.clone());
            let worker = QueueWorker::new(queue, processor, &settings.queue);
            let rx = shutdown_rx.clone();
            Some(tokio::spawn(async move { worker.run(wait_for(rx)).await }))
        }
    };

    let listener = tokio::net::TcpListener::bind(settings.server.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", settings.server.bind_address()))?;

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server::serve(listener, server::router(state), wait_for(shutdown_rx)).await?;

    if let Some(worker) = worker {
        worker.await.context("Queue worker task failed")?;
    }
    Ok(())
}

/// Resolves once the shutdown flag is raised (or the sender is gone)
async fn wait_for(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn read_input(file: Option<&Path>) -> Result<Vec<u8>> {
    match file {
        Some(path) => {
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
        }
        None => {
            let mut buffer = Vec::new();
            io::stdin()
                .read_to_end(&mut buffer)
                .context("Failed to read payload from stdin")?;
            Ok(buffer)
        }
    }
}

fn derive(event_type: &str, file: Option<&Path>) -> Result<()> {
    let input = read_input(file)?;
    let payload: serde_json::Value =
        serde_json::from_slice(&input).context("Payload is not valid JSON")?;

    let processed_at = Utc::now();
    let output = match events::parse(event_type, &payload)? {
        ParsedEvent::WorkflowRun(event) => serde_json::to_value(derive_run(&event, processed_at))?,
        ParsedEvent::WorkflowJob(event) => serde_json::to_value(derive_job(&event, processed_at))?,
        ParsedEvent::Unhandled { event_type } => {
            serde_json::json!({"event_type": event_type, "handled": false})
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn verify_signature(secret: &str, signature_header: &str, file: Option<&Path>) -> Result<()> {
    let input = read_input(file)?;
    if signature::verify(&input, Some(signature_header), secret) {
        println!("valid");
        Ok(())
    } else {
        println!("invalid");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from(["actions-telemetry", "serve", "--port", "9000"]).unwrap();
        assert!(matches!(cli.command, Command::Serve { port: Some(9000) }));
        assert!(!cli.log_json);
    }

    #[test]
    fn test_parse_derive_with_global_flags() {
        let cli = Cli::try_parse_from([
            "actions-telemetry",
            "derive",
            "--event-type",
            "workflow_job",
            "--log-level",
            "debug",
            "--log-json",
        ])
        .unwrap();
        assert_eq!(cli.log_level.to_filter_directive(), "debug");
        assert!(cli.log_json);
        assert!(matches!(cli.command, Command::Derive { ref event_type, file: None } if event_type == "workflow_job"));
    }

    #[test]
    fn test_verify_signature_requires_secret() {
        let result = Cli::try_parse_from([
            "actions-telemetry",
            "verify-signature",
            "--signature",
            "sha256=00",
        ]);
        assert!(result.is_err());
    }
}
