//! Service configuration
//!
//! Settings come from an optional YAML file and are then overridden by
//! environment variables:
//!
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   port: 8080
//! webhook_secret: ""
//! telemetry:
//!   mode: metrics          # metrics | traces | both
//!   otlp_endpoint: ""      # empty: structured-log sink
//!   otlp_headers: {}
//!   timeout_seconds: 10
//!   service_name: actions-telemetry
//! queue:
//!   processing: inline     # inline | queued
//!   poll_interval_seconds: 5
//!   max_messages_per_batch: 32
//!   visibility_timeout_seconds: 300
//! ```
//!
//! Unknown keys are ignored. A non-numeric `PORT` (a placeholder left in some
//! CI environments) is discarded and the default port kept.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Configuration failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Which emission shape the telemetry adapter produces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmissionMode {
    /// Flat metric export only
    #[default]
    Metrics,
    /// Hierarchical span export only
    Traces,
    /// Both shapes, for dual consumption
    Both,
}

impl EmissionMode {
    pub fn emits_metrics(&self) -> bool {
        matches!(self, EmissionMode::Metrics | EmissionMode::Both)
    }

    pub fn emits_traces(&self) -> bool {
        matches!(self, EmissionMode::Traces | EmissionMode::Both)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EmissionMode::Metrics => "metrics",
            EmissionMode::Traces => "traces",
            EmissionMode::Both => "both",
        }
    }
}

impl fmt::Display for EmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "metrics" => Ok(EmissionMode::Metrics),
            "traces" => Ok(EmissionMode::Traces),
            "both" => Ok(EmissionMode::Both),
            other => Err(format!("expected metrics, traces or both, got {other:?}")),
        }
    }
}

/// Whether webhooks are processed in the request or handed to a queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    #[default]
    Inline,
    Queued,
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(ProcessingMode::Inline),
            "queued" => Ok(ProcessingMode::Queued),
            other => Err(format!("expected inline or queued, got {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default)]
    pub mode: EmissionMode,

    /// Base URL of an OTLP/HTTP collector; empty selects the log sink
    #[serde(default)]
    pub otlp_endpoint: String,

    /// Extra headers sent with every export (e.g. authentication)
    #[serde(default)]
    pub otlp_headers: BTreeMap<String, String>,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            mode: EmissionMode::default(),
            otlp_endpoint: String::new(),
            otlp_headers: BTreeMap::new(),
            timeout_seconds: default_timeout(),
            service_name: default_service_name(),
        }
    }
}

impl TelemetrySettings {
    pub fn transport_configured(&self) -> bool {
        !self.otlp_endpoint.trim().is_empty()
    }
}

fn default_timeout() -> u64 {
    10
}

fn default_service_name() -> String {
    "actions-telemetry".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default)]
    pub processing: ProcessingMode,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_max_messages")]
    pub max_messages_per_batch: usize,
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_seconds: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            processing: ProcessingMode::default(),
            poll_interval_seconds: default_poll_interval(),
            max_messages_per_batch: default_max_messages(),
            visibility_timeout_seconds: default_visibility_timeout(),
        }
    }
}

impl QueueSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }
}

fn default_poll_interval() -> u64 {
    5
}

fn default_max_messages() -> usize {
    32
}

fn default_visibility_timeout() -> u64 {
    300
}

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,

    /// Shared secret for webhook signatures; empty disables verification
    #[serde(default)]
    pub webhook_secret: String,

    #[serde(default)]
    pub telemetry: TelemetrySettings,

    #[serde(default)]
    pub queue: QueueSettings,
}

impl Settings {
    /// Load from an optional YAML file, then apply the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(std::env::vars())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml_ng::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(content)
    }

    /// Override fields from environment variables.
    ///
    /// Variables not listed here are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "HOST" => self.server.host = value,
                "PORT" => match value.trim().parse::<u16>() {
                    Ok(port) => self.server.port = port,
                    Err(_) => {
                        debug!(value = %value, "Ignoring non-numeric PORT, keeping default")
                    }
                },
                "GITHUB_WEBHOOK_SECRET" => self.webhook_secret = value,
                "TELEMETRY_MODE" => self.telemetry.mode = parse_enum("TELEMETRY_MODE", &value)?,
                "OTLP_ENDPOINT" => self.telemetry.otlp_endpoint = value,
                "OTLP_HEADERS" => {
                    self.telemetry.otlp_headers = parse_headers(&value)?;
                }
                "OTLP_TIMEOUT_SECONDS" => {
                    self.telemetry.timeout_seconds = parse_number("OTLP_TIMEOUT_SECONDS", &value)?
                }
                "SERVICE_NAME" => self.telemetry.service_name = value,
                "PROCESSING_MODE" => {
                    self.queue.processing = parse_enum("PROCESSING_MODE", &value)?
                }
                "POLL_INTERVAL_SECONDS" => {
                    self.queue.poll_interval_seconds =
                        parse_number("POLL_INTERVAL_SECONDS", &value)?
                }
                "MAX_MESSAGES_PER_BATCH" => {
                    self.queue.max_messages_per_batch =
                        parse_number("MAX_MESSAGES_PER_BATCH", &value)?
                }
                "VISIBILITY_TIMEOUT_SECONDS" => {
                    self.queue.visibility_timeout_seconds =
                        parse_number("VISIBILITY_TIMEOUT_SECONDS", &value)?
                }
                _ => {}
            }
        }

        if self.webhook_secret.is_empty() {
            warn!(
                target: "security",
                "GITHUB_WEBHOOK_SECRET is not set; webhook signatures will not be verified"
            );
        }
        Ok(())
    }
}

fn parse_number<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn parse_enum<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr<Err = String>,
{
    value.parse().map_err(|reason| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
        reason,
    })
}

/// Parse `key=value,key2=value2`
fn parse_headers(value: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
            _ => Err(ConfigError::InvalidValue {
                var: "OTLP_HEADERS",
                value: value.to_string(),
                reason: format!("expected key=value, got {pair:?}"),
            }),
        })
        .collect()
}
