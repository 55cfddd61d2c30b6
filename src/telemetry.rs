use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const SERVICE_NAME: &str = "primetric-source";

static METRICS: OnceLock<SourceMetrics> = OnceLock::new();
static METER_PROVIDER: OnceLock<SdkMeterProvider> = OnceLock::new();

/// Metrics for an extraction run
pub struct SourceMetrics {
    pub token_requests: Counter<u64>,
    pub token_errors: Counter<u64>,

    pub pages_fetched: Counter<u64>,
    pub records_read: Counter<u64>,
    pub http_errors: Counter<u64>,

    pub page_fetch_seconds: Histogram<f64>,
}

impl SourceMetrics {
    fn new(meter: &Meter) -> Self {
        Self {
            token_requests: meter
                .u64_counter("primetric_token_requests_total")
                .with_description("Total number of access token requests")
                .build(),
            token_errors: meter
                .u64_counter("primetric_token_errors_total")
                .with_description("Total number of failed access token requests")
                .build(),
            pages_fetched: meter
                .u64_counter("primetric_pages_fetched_total")
                .with_description("Total number of resource pages fetched")
                .build(),
            records_read: meter
                .u64_counter("primetric_records_read_total")
                .with_description("Total number of records read from resource pages")
                .build(),
            http_errors: meter
                .u64_counter("primetric_http_errors_total")
                .with_description("Total number of failed resource page requests")
                .build(),
            page_fetch_seconds: meter
                .f64_histogram("primetric_page_fetch_seconds")
                .with_description("Time spent fetching and decoding a resource page")
                .build(),
        }
    }
}

/// Metrics handle, `None` until `init_telemetry` has run
pub fn get_metrics() -> Option<&'static SourceMetrics> {
    METRICS.get()
}

pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
    pub log_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_filter: "info".to_string(),
        }
    }
}

fn create_resource() -> Resource {
    Resource::new(vec![
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_NAME,
            SERVICE_NAME,
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
        ),
    ])
}

fn init_tracer_provider(
    endpoint: &str,
) -> Result<TracerProvider, opentelemetry::trace::TraceError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(3))
        .build()?;

    let provider = TracerProvider::builder()
        .with_resource(create_resource())
        .with_batch_exporter(exporter, runtime::Tokio)
        .build();

    Ok(provider)
}

fn init_meter_provider(
    endpoint: &str,
) -> Result<SdkMeterProvider, opentelemetry_sdk::metrics::MetricError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(3))
        .build()?;

    let reader = PeriodicReader::builder(exporter, runtime::Tokio)
        .with_interval(Duration::from_secs(10))
        .build();

    let provider = SdkMeterProvider::builder()
        .with_resource(create_resource())
        .with_reader(reader)
        .build();

    Ok(provider)
}

/// Install logging (to stderr, stdout carries records) and metrics.
/// Must be called from within a tokio runtime when an OTLP endpoint is set.
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::new(&config.log_filter);
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match &config.otlp_endpoint {
        Some(endpoint) => {
            let tracer_provider = init_tracer_provider(endpoint)
                .map_err(|e| format!("Failed to init tracer: {}", e))?;
            let meter_provider = init_meter_provider(endpoint)
                .map_err(|e| format!("Failed to init meter: {}", e))?;

            global::set_tracer_provider(tracer_provider.clone());
            global::set_meter_provider(meter_provider.clone());

            let tracer = tracer_provider.tracer(SERVICE_NAME);

            let meter = meter_provider.meter(SERVICE_NAME);
            let _ = METRICS.set(SourceMetrics::new(&meter));
            let _ = METER_PROVIDER.set(meter_provider);

            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .with(otel_layer)
                .init();

            info!(
                endpoint = %endpoint,
                "OpenTelemetry initialized with OTLP export"
            );
        }
        None => {
            let meter_provider = SdkMeterProvider::builder()
                .with_resource(create_resource())
                .build();

            global::set_meter_provider(meter_provider.clone());

            let meter = meter_provider.meter(SERVICE_NAME);
            let _ = METRICS.set(SourceMetrics::new(&meter));
            let _ = METER_PROVIDER.set(meter_provider);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();

            info!("Telemetry initialized without OTLP export");
        }
    }

    Ok(())
}

/// Flush pending spans and metrics before exit
pub fn shutdown_telemetry() {
    if let Some(provider) = METER_PROVIDER.get() {
        let _ = provider.shutdown();
    }
    global::shutdown_tracer_provider();
}
