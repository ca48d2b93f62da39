//! Tracing configuration types.

use serde::Deserialize;

/// Configuration for logging and optional OpenTelemetry export.
#[derive(Debug, Clone, Deserialize)]
pub struct TracingConfig {
    /// Service name attached to exported spans.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// OTLP collector endpoint (e.g. "http://localhost:4317").
    /// When `None`, spans are not exported and only fmt logging is used.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    #[serde(default)]
    pub protocol: OtlpProtocol,

    /// `EnvFilter` directive (e.g. "info", "seen_sync=debug,info").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Line format for stderr logs.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Stderr log line format. `json` emits one object per event, for log
/// shippers that cannot parse the human-readable form.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// OTLP transport protocol.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    #[default]
    Grpc,
    Http,
}

fn default_service_name() -> String {
    "seen-sync".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            otlp_endpoint: None,
            protocol: OtlpProtocol::default(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}
