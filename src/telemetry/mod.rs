//! Logging and OpenTelemetry tracing setup.
//!
//! - Console output, human-readable or JSON lines (`LOG_FORMAT=json`)
//! - OTLP exporter for traces when `otel.enabled` is set
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `RUST_LOG` | Log filter directives | `info` |
//! | `LOG_FORMAT` | `json` for structured log lines | plain text |
//! | `OTEL__ENABLED` | Enable OpenTelemetry tracing | `false` |
//! | `OTEL__ENDPOINT` | OTLP gRPC endpoint | `http://localhost:4317` |
//! | `OTEL__SERVICE_NAME` | Service name in traces | `bookmark-realtime` |
//! | `OTEL__SAMPLING_RATIO` | Trace sampling ratio (0.0-1.0) | `1.0` |

use opentelemetry::trace::TracerProvider;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider as SdkTracerProvider},
    Resource,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::OtelConfig;

/// Result type for telemetry operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Telemetry-specific error type
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Failed to build OTLP exporter: {0}")]
    ExporterBuild(String),
}

/// Keeps the tracer provider alive; flushes pending spans on drop.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            tracing::info!("Shutting down OpenTelemetry tracer provider");
            if let Err(e) = provider.shutdown() {
                eprintln!("OpenTelemetry shutdown failed: {e}");
            }
        }
    }
}

/// Whether log lines should be emitted as JSON
fn json_logs() -> bool {
    std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Initialize logging and, when enabled, OpenTelemetry tracing.
///
/// Keep the returned guard alive for the lifetime of the process.
pub fn init_telemetry(config: &OtelConfig) -> TelemetryResult<TelemetryGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = json_logs();
    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!json).then(tracing_subscriber::fmt::layer);

    let provider = if config.enabled {
        Some(build_tracer_provider(config)?)
    } else {
        None
    };
    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(otel_layer)
        .init();

    if provider.is_some() {
        tracing::info!(
            endpoint = %config.endpoint,
            service_name = %config.service_name,
            sampling_ratio = config.sampling_ratio,
            "Tracing initialized with OTLP export"
        );
    } else {
        tracing::info!(json = json, "Tracing initialized");
    }

    Ok(TelemetryGuard { provider })
}

/// Ratio outside (0, 1) collapses to always/never
fn sampler_for(ratio: f64) -> Sampler {
    match ratio {
        r if r >= 1.0 => Sampler::AlwaysOn,
        r if r <= 0.0 => Sampler::AlwaysOff,
        r => Sampler::TraceIdRatioBased(r),
    }
}

fn build_tracer_provider(config: &OtelConfig) -> TelemetryResult<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.endpoint)
        .build()
        .map_err(|e| TelemetryError::ExporterBuild(e.to_string()))?;

    let resource = Resource::new([
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(sampler_for(config.sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build())
}

/// Span attribute builders shared by instrumented code.
pub mod attributes {
    use opentelemetry::KeyValue;

    pub fn event_id(id: &str) -> KeyValue {
        KeyValue::new("event.id", id.to_string())
    }

    pub fn event_type(kind: &str) -> KeyValue {
        KeyValue::new("event.type", kind.to_string())
    }

    pub fn delivered_count(count: usize) -> KeyValue {
        KeyValue::new("fanout.delivered_count", count as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otel_disabled_by_default() {
        let config = OtelConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.service_name, "bookmark-realtime");
    }

    #[test]
    fn test_sampler_bounds() {
        assert!(matches!(sampler_for(1.5), Sampler::AlwaysOn));
        assert!(matches!(sampler_for(0.0), Sampler::AlwaysOff));
        assert!(matches!(sampler_for(0.25), Sampler::TraceIdRatioBased(r) if r == 0.25));
    }

    #[test]
    fn test_event_attributes() {
        assert_eq!(attributes::event_id("msg_1").key.as_str(), "event.id");
        assert_eq!(attributes::event_type("deleted").key.as_str(), "event.type");
        assert_eq!(
            attributes::delivered_count(3).key.as_str(),
            "fanout.delivered_count"
        );
    }

    #[test]
    fn test_guard_without_provider_drops_cleanly() {
        drop(TelemetryGuard { provider: None });
    }
}
