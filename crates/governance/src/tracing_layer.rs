//! Logging and distributed tracing setup.

use opentelemetry::{trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use orchestra_core::{Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

const DEFAULT_FILTER: &str = "info,orchestra=debug";
const SERVICE_NAME: &str = "orchestra";

/// Install the global subscriber: env filter, stdout formatting (JSON when
/// `json` is set) and an OTLP exporter when `OTEL_EXPORTER_OTLP_ENDPOINT`
/// is present.
pub fn configure_tracing(json: bool) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let registry = tracing_subscriber::registry().with(fmt_layer).with(env_filter);

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        let provider = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint.clone()),
            )
            .with_trace_config(
                sdktrace::Config::default()
                    .with_resource(Resource::new(vec![KeyValue::new("service.name", SERVICE_NAME)])),
            )
            .install_batch(runtime::Tokio)
            .map_err(|e| Error::configuration(format!("Failed to install OTLP pipeline: {}", e)))?;

        let tracer = provider.tracer(SERVICE_NAME);
        opentelemetry::global::set_tracer_provider(provider);
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        registry
            .with(otel_layer)
            .try_init()
            .map_err(|e| Error::internal(format!("Failed to install subscriber: {}", e)))?;
        tracing::info!(endpoint = %endpoint, "OpenTelemetry tracing enabled");
    } else {
        registry
            .try_init()
            .map_err(|e| Error::internal(format!("Failed to install subscriber: {}", e)))?;
    }

    Ok(())
}
