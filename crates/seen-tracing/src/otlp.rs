//! Subscriber installation: stderr logs, optional OTLP span export.

use anyhow::Result;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogFormat, OtlpProtocol, TracingConfig};

/// RAII guard that flushes and shuts down the tracer provider on drop.
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
}

impl TracingGuard {
    /// Whether spans are being exported over OTLP.
    pub fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Some(ref mut provider) = self.provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to shutdown tracer provider: {e}");
            }
        }
    }
}

/// Install the global tracing subscriber.
///
/// Logs always go to stderr, as text or JSON per `log_format`. When
/// `otlp_endpoint` is set, spans are also exported; if the exporter cannot be
/// built the service still starts with stderr logging and a warning.
///
/// Hold the returned guard for the lifetime of the process.
pub fn init_tracing(config: &TracingConfig) -> TracingGuard {
    let (provider, export_error) = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => match build_provider(config, endpoint) {
            Ok(provider) => (Some(provider), None),
            Err(e) => (None, Some(e)),
        },
        None => (None, None),
    };

    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(otel_layer)
        .with(fmt_layer(config.log_format))
        .with(env_filter(config))
        .init();

    let endpoint = config.otlp_endpoint.as_deref().unwrap_or_default();
    if let Some(e) = export_error {
        tracing::warn!(
            error = %e,
            endpoint = %endpoint,
            "OTLP exporter failed to initialize, logging to stderr only"
        );
    } else if provider.is_some() {
        tracing::info!(
            endpoint = %endpoint,
            service = %config.service_name,
            protocol = ?config.protocol,
            "OpenTelemetry OTLP tracing initialized"
        );
    }

    TracingGuard { provider }
}

fn env_filter(config: &TracingConfig) -> EnvFilter {
    EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn fmt_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Build a batching tracer provider exporting to `endpoint`.
fn build_provider(config: &TracingConfig, endpoint: &str) -> Result<SdkTracerProvider> {
    let exporter = match config.protocol {
        OtlpProtocol::Grpc => opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()?,
        OtlpProtocol::Http => opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()?,
    };

    let resource = opentelemetry_sdk::Resource::builder_empty()
        .with_service_name(config.service_name.clone())
        .build();

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}
