//! OTLP span export for the server and CLI.

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{ExporterBuildError, Protocol, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::collections::HashMap;
use thiserror::Error;
use tracing_subscriber::Registry;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use url::Url;

use crate::env::env_filter;

const SERVICE_NAME: &str = "ibdesk";
const TRACER_NAME: &str = "ibdesk-tracer";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to build OTLP exporter")]
    OtlpExporter(#[from] ExporterBuildError),

    #[error("Failed to build HTTP client for span export: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("HTTP client thread panicked")]
    ThreadSpawn,

    #[error("Failed to set global subscriber")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Flushes pending spans when dropped. Hold it until the process exits.
pub struct TelemetryGuard {
    tracer_provider: SdkTracerProvider,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.tracer_provider.force_flush() {
            eprintln!("Failed to flush spans on shutdown: {e}");
        }
    }
}

/// The blocking client starts a runtime of its own, which tokio forbids on its
/// worker threads.
fn blocking_http_client() -> Result<reqwest::blocking::Client, TelemetryError> {
    std::thread::spawn(|| reqwest::blocking::Client::builder().gzip(true).build())
        .join()
        .map_err(|_| TelemetryError::ThreadSpawn)?
        .map_err(TelemetryError::from)
}

fn tracer_provider(
    endpoint: &Url,
    api_key: Option<String>,
) -> Result<SdkTracerProvider, TelemetryError> {
    let headers: HashMap<String, String> = api_key
        .map(|key| ("authorization".to_string(), key))
        .into_iter()
        .collect();

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_http_client(blocking_http_client()?)
        .with_endpoint(endpoint.as_str())
        .with_headers(headers)
        .with_protocol(Protocol::HttpBinary)
        .build()?;

    let resource = Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
        .build();

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}

/// Compact console logging plus OTLP/HTTP span export to `endpoint`.
pub fn setup_telemetry(
    endpoint: &Url,
    api_key: Option<String>,
    log_level: tracing::Level,
) -> Result<TelemetryGuard, TelemetryError> {
    let tracer_provider = tracer_provider(endpoint, api_key)?;

    let spans = tracing_opentelemetry::layer()
        .with_tracer(tracer_provider.tracer(TRACER_NAME))
        .with_filter(env_filter(log_level));
    let console = tracing_subscriber::fmt::layer()
        .compact()
        .with_filter(env_filter(log_level));

    tracing::subscriber::set_global_default(Registry::default().with(console).with(spans))?;

    Ok(TelemetryGuard { tracer_provider })
}
