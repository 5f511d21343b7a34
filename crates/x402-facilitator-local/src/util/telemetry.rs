//! Logging and tracing setup.
//!
//! [`Telemetry::register`] installs a `tracing` subscriber with an `fmt` layer filtered by
//! `RUST_LOG` (default `info`). With the `telemetry` feature, and when any
//! `OTEL_EXPORTER_OTLP_*` variable is set, spans and metrics are also exported over OTLP
//! (`http/protobuf` unless `OTEL_EXPORTER_OTLP_PROTOCOL=grpc`).
//!
//! ```ignore
//! let telemetry = Telemetry::new()
//!     .with_name(env!("CARGO_PKG_NAME"))
//!     .with_version(env!("CARGO_PKG_VERSION"))
//!     .register();
//! let app = app.layer(telemetry.http_tracing());
//! ```

use axum::http::Request;
use tower_http::trace::{HttpMakeClassifier, MakeSpan, TraceLayer};
use tracing::Span;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[cfg(feature = "telemetry")]
use opentelemetry::{KeyValue, trace::TracerProvider as _};
#[cfg(feature = "telemetry")]
use opentelemetry_sdk::{
    Resource,
    metrics::{MeterProviderBuilder, PeriodicReader, SdkMeterProvider},
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
#[cfg(feature = "telemetry")]
use opentelemetry_semantic_conventions::{
    SCHEMA_URL,
    attribute::{DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_VERSION},
};
#[cfg(feature = "telemetry")]
use tracing_opentelemetry::{MetricsLayer, OpenTelemetryLayer};

/// Builder for the process-wide subscriber.
#[derive(Debug, Clone)]
pub struct Telemetry {
    name: String,
    version: String,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Installs the global subscriber. A second call leaves the first subscriber in place.
    pub fn register(self) -> TelemetryProviders {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer());

        #[cfg(feature = "telemetry")]
        {
            let providers = TelemetryProtocol::from_env().and_then(|protocol| {
                match otel::init_providers(&self, protocol) {
                    Ok(providers) => Some((protocol, providers)),
                    Err(e) => {
                        eprintln!("OpenTelemetry exporter unavailable: {e}");
                        None
                    }
                }
            });
            match providers {
                Some((protocol, (tracer_provider, meter_provider))) => {
                    let tracer = tracer_provider.tracer(self.name.clone());
                    registry
                        .with(MetricsLayer::new(meter_provider.clone()))
                        .with(OpenTelemetryLayer::new(tracer))
                        .try_init()
                        .ok();
                    tracing::info!(
                        service = %self.name,
                        version = %self.version,
                        "OpenTelemetry tracing and metrics exporter is enabled via {:?}",
                        protocol
                    );
                    TelemetryProviders {
                        tracer_provider: Some(tracer_provider),
                        meter_provider: Some(meter_provider),
                    }
                }
                None => {
                    registry.try_init().ok();
                    tracing::info!(service = %self.name, version = %self.version, "OpenTelemetry is not enabled");
                    TelemetryProviders {
                        tracer_provider: None,
                        meter_provider: None,
                    }
                }
            }
        }

        #[cfg(not(feature = "telemetry"))]
        {
            registry.try_init().ok();
            tracing::debug!(service = %self.name, version = %self.version, "Logging initialized");
            TelemetryProviders {}
        }
    }
}

/// OTLP transport selected by `OTEL_EXPORTER_OTLP_PROTOCOL`.
#[cfg(feature = "telemetry")]
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TelemetryProtocol {
    HTTP,
    GRPC,
}

#[cfg(feature = "telemetry")]
impl TelemetryProtocol {
    /// `None` unless some `OTEL_EXPORTER_OTLP_*` variable is present.
    fn from_env() -> Option<Self> {
        let is_enabled = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok()
            || std::env::var("OTEL_EXPORTER_OTLP_HEADERS").is_ok()
            || std::env::var("OTEL_EXPORTER_OTLP_PROTOCOL").is_ok();
        if !is_enabled {
            return None;
        }
        let protocol = match std::env::var("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
            Ok("grpc") => TelemetryProtocol::GRPC,
            _ => TelemetryProtocol::HTTP,
        };
        Some(protocol)
    }
}

#[cfg(feature = "telemetry")]
mod otel {
    use super::*;
    use opentelemetry_otlp::ExporterBuildError;

    fn resource(telemetry: &Telemetry) -> Resource {
        let deployment_env =
            std::env::var("DEPLOYMENT_ENV").unwrap_or_else(|_| "develop".to_string());
        Resource::builder()
            .with_service_name(telemetry.name.clone())
            .with_schema_url(
                [
                    KeyValue::new(SERVICE_VERSION, telemetry.version.clone()),
                    KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, deployment_env),
                ],
                SCHEMA_URL,
            )
            .build()
    }

    pub fn init_providers(
        telemetry: &Telemetry,
        protocol: TelemetryProtocol,
    ) -> Result<(SdkTracerProvider, SdkMeterProvider), ExporterBuildError> {
        let span_exporter = opentelemetry_otlp::SpanExporter::builder();
        let span_exporter = match protocol {
            TelemetryProtocol::HTTP => span_exporter.with_http().build()?,
            TelemetryProtocol::GRPC => span_exporter.with_tonic().build()?,
        };
        let tracer_provider = SdkTracerProvider::builder()
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                1.0,
            ))))
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource(telemetry))
            .with_batch_exporter(span_exporter)
            .build();

        let metric_exporter = opentelemetry_otlp::MetricExporter::builder();
        let metric_exporter = match protocol {
            TelemetryProtocol::HTTP => metric_exporter.with_http().build()?,
            TelemetryProtocol::GRPC => metric_exporter.with_tonic().build()?,
        };
        let reader = PeriodicReader::builder(metric_exporter)
            .with_interval(std::time::Duration::from_secs(30))
            .build();
        let meter_provider = MeterProviderBuilder::default()
            .with_resource(resource(telemetry))
            .with_reader(reader)
            .build();
        opentelemetry::global::set_meter_provider(meter_provider.clone());

        Ok((tracer_provider, meter_provider))
    }
}

/// Handles to the exporters installed by [`Telemetry::register`]. Dropping flushes them.
pub struct TelemetryProviders {
    #[cfg(feature = "telemetry")]
    tracer_provider: Option<SdkTracerProvider>,
    #[cfg(feature = "telemetry")]
    meter_provider: Option<SdkMeterProvider>,
}

impl TelemetryProviders {
    /// Request tracing for axum routers.
    pub fn http_tracing(&self) -> TraceLayer<HttpMakeClassifier, HttpMakeSpan> {
        TraceLayer::new_for_http().make_span_with(HttpMakeSpan)
    }
}

#[cfg(feature = "telemetry")]
impl Drop for TelemetryProviders {
    fn drop(&mut self) {
        if let Some(tracer_provider) = self.tracer_provider.as_ref()
            && let Err(err) = tracer_provider.shutdown()
        {
            eprintln!("{err:?}");
        }
        if let Some(meter_provider) = self.meter_provider.as_ref()
            && let Err(err) = meter_provider.shutdown()
        {
            eprintln!("{err:?}");
        }
    }
}

/// One `http_request` span per request, named `METHOD /path` for OpenTelemetry.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpMakeSpan;

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        tracing::info_span!(
            "http_request",
            otel.kind = "server",
            otel.name = %format!("{} {}", request.method(), request.uri().path()),
            method = %request.method(),
            uri = %request.uri(),
            version = ?request.version(),
        )
    }
}
