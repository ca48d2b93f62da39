//! Tracing setup for seen-sync: fmt logging with optional OTLP span export.

pub mod config;
pub mod otlp;
pub mod spans;

pub use config::{LogFormat, OtlpProtocol, TracingConfig};
pub use otlp::{init_tracing, TracingGuard};
