//! Logging and telemetry wiring.
//!
//! Tracing always goes through an `EnvFilter` built from the configured log
//! level; `RUST_LOG` takes precedence when set. The `prometheus` feature adds
//! a scrape endpoint for the `metrics` counters and gauges this crate emits,
//! and the `otel` feature ships spans to an OTLP collector.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;
use crate::error::FailoverError;

#[cfg(feature = "otel")]
static TRACER_PROVIDER: std::sync::OnceLock<opentelemetry_sdk::trace::SdkTracerProvider> =
    std::sync::OnceLock::new();

/// Install the global subscriber and any feature-gated exporters. Called
/// once from `main` before the service starts; a second call fails with
/// [`FailoverError::Config`] since the subscriber is process-global.
pub fn init(config: &TelemetryConfig) -> Result<(), FailoverError> {
    #[cfg(feature = "prometheus")]
    if let Some(addr) = config.prometheus_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| FailoverError::Config(format!("prometheus exporter: {e}")))?;
        tracing::info!(%addr, "prometheus scrape endpoint listening");
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    #[cfg(feature = "otel")]
    if let Some(otel) = &config.opentelemetry {
        registry
            .with(otlp_layer(otel)?)
            .try_init()
            .map_err(|e| FailoverError::Config(format!("tracing init: {e}")))?;
        tracing::info!(endpoint = %otel.endpoint, "OTLP span export enabled");
        return Ok(());
    }

    registry
        .try_init()
        .map_err(|e| FailoverError::Config(format!("tracing init: {e}")))?;
    Ok(())
}

/// Build the OTLP span layer and stash its provider for [`shutdown`].
#[cfg(feature = "otel")]
fn otlp_layer<S>(
    config: &crate::config::OpenTelemetryConfig,
) -> Result<impl tracing_subscriber::Layer<S>, FailoverError>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_semantic_conventions::resource;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.endpoint)
        .build()
        .map_err(|e| FailoverError::Config(format!("otlp exporter: {e}")))?;

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_attributes([
                    KeyValue::new(resource::SERVICE_NAME, config.service_name.clone()),
                    KeyValue::new(resource::SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                ])
                .build(),
        )
        .build();

    let tracer = provider.tracer("smart-conn");
    let _ = TRACER_PROVIDER.set(provider);

    Ok(tracing_opentelemetry::layer().with_tracer(tracer))
}

/// Flush pending OTLP spans before exit. A no-op without the `otel` feature.
pub fn shutdown() {
    #[cfg(feature = "otel")]
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = %e, "tracer provider shutdown failed");
        }
    }
}
