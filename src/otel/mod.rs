//! Tracing and metrics for marketplace-sync
//!
//! [`init_tracing`] installs the process-wide `tracing` subscriber. When
//! OpenTelemetry is enabled, spans and [`SyncMetrics`] are exported over
//! OTLP; otherwise the meter provider has no reader and records are dropped.

use crate::config::{LoggingConfig, OtelConfig};
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter, MeterProvider as _},
    trace::TracerProvider as _,
    KeyValue,
};
use opentelemetry_sdk::{metrics::SdkMeterProvider, trace::TracerProvider, Resource};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// OpenTelemetry error types
#[derive(Debug, Error)]
pub enum OtelError {
    /// Failed to initialize tracer
    #[error("Failed to initialize tracer: {0}")]
    TracerInit(String),

    /// Failed to initialize meter
    #[error("Failed to initialize meter: {0}")]
    MeterInit(String),

    /// Failed to shutdown
    #[error("Failed to shutdown: {0}")]
    Shutdown(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Trace and metric providers for the worker process
pub struct OtelProvider {
    tracer_provider: Option<TracerProvider>,
    meter_provider: SdkMeterProvider,
    config: OtelConfig,
}

impl OtelProvider {
    /// Create providers for the given configuration
    pub fn new(config: &OtelConfig) -> Result<Self, OtelError> {
        let resource = Resource::new(vec![KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]);

        let (tracer_provider, meter_provider) = if config.enabled {
            let endpoint = config.endpoint.as_ref().ok_or_else(|| {
                OtelError::Config("OTLP endpoint is required when enabled".into())
            })?;

            let tracer_provider = Self::init_tracer_provider(endpoint, &resource)?;
            let meter_provider = Self::init_meter_provider(endpoint, &resource)?;
            (Some(tracer_provider), meter_provider)
        } else {
            let meter_provider = SdkMeterProvider::builder().with_resource(resource).build();
            (None, meter_provider)
        };

        if let Some(ref tp) = tracer_provider {
            global::set_tracer_provider(tp.clone());
        }

        Ok(Self {
            tracer_provider,
            meter_provider,
            config: config.clone(),
        })
    }

    fn init_tracer_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<TracerProvider, OtelError> {
        use opentelemetry_otlp::WithExportConfig;
        use opentelemetry_sdk::runtime;
        use opentelemetry_sdk::trace::{Config, Sampler};

        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint)
            .build_span_exporter()
            .map_err(|e| OtelError::TracerInit(e.to_string()))?;

        Ok(TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_config(
                Config::default()
                    .with_sampler(Sampler::AlwaysOn)
                    .with_resource(resource.clone()),
            )
            .build())
    }

    fn init_meter_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<SdkMeterProvider, OtelError> {
        use opentelemetry_otlp::{MetricsExporterBuilder, WithExportConfig};
        use opentelemetry_sdk::metrics::reader::{
            DefaultAggregationSelector, DefaultTemporalitySelector,
        };
        use opentelemetry_sdk::{metrics::PeriodicReader, runtime};

        let exporter = MetricsExporterBuilder::from(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .build_metrics_exporter(
            Box::new(DefaultTemporalitySelector::new()),
            Box::new(DefaultAggregationSelector::new()),
        )
        .map_err(|e| OtelError::MeterInit(e.to_string()))?;

        let reader = PeriodicReader::builder(exporter, runtime::Tokio).build();

        Ok(SdkMeterProvider::builder()
            .with_resource(resource.clone())
            .with_reader(reader)
            .build())
    }

    /// Tracer for the `tracing-opentelemetry` layer
    pub fn tracer(&self, name: &'static str) -> opentelemetry_sdk::trace::Tracer {
        match self.tracer_provider {
            Some(ref tp) => tp.tracer(name),
            None => TracerProvider::builder().build().tracer(name),
        }
    }

    /// Meter for creating instruments
    pub fn meter(&self) -> Meter {
        self.meter_provider.meter(self.config.service_name.clone())
    }

    /// Check if OpenTelemetry export is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Flush and stop the providers
    pub fn shutdown(&self) -> Result<(), OtelError> {
        if let Err(e) = self.meter_provider.shutdown() {
            return Err(OtelError::Shutdown(format!(
                "Meter shutdown failed: {:?}",
                e
            )));
        }

        if let Some(ref tp) = self.tracer_provider {
            for result in tp.force_flush() {
                if let Err(e) = result {
                    return Err(OtelError::Shutdown(format!("Tracer flush failed: {:?}", e)));
                }
            }
        }

        Ok(())
    }
}

impl Drop for OtelProvider {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Instruments recorded by the request executor and the synchronizer
pub struct SyncMetrics {
    /// Terminal outcomes of marketplace HTTP calls
    pub requests_total: Counter<u64>,

    /// Retried attempts, by reason
    pub retries_total: Counter<u64>,

    /// Synchronizer operations, by outcome
    pub operations_total: Counter<u64>,

    /// Wall time of marketplace HTTP calls including retries
    pub request_duration: Histogram<f64>,
}

impl SyncMetrics {
    /// Create instruments on the given meter
    pub fn new(meter: &Meter) -> Self {
        Self {
            requests_total: meter
                .u64_counter("marketplace_sync_requests_total")
                .with_description("Marketplace API calls by terminal status")
                .init(),
            retries_total: meter
                .u64_counter("marketplace_sync_retries_total")
                .with_description("Retried marketplace API attempts")
                .init(),
            operations_total: meter
                .u64_counter("marketplace_sync_operations_total")
                .with_description("Sync operations by outcome")
                .init(),
            request_duration: meter
                .f64_histogram("marketplace_sync_request_duration_seconds")
                .with_description("Marketplace API call duration in seconds")
                .init(),
        }
    }

    /// Record a terminal request outcome and its duration
    pub fn record_request(&self, marketplace: &str, status: &str, duration_secs: f64) {
        let attrs = [
            KeyValue::new("marketplace", marketplace.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.requests_total.add(1, &attrs);
        self.request_duration.record(duration_secs, &attrs[..1]);
    }

    /// Record a retried attempt
    pub fn record_retry(&self, marketplace: &str, reason: &str) {
        self.retries_total.add(
            1,
            &[
                KeyValue::new("marketplace", marketplace.to_string()),
                KeyValue::new("reason", reason.to_string()),
            ],
        );
    }

    /// Record a synchronizer operation
    pub fn record_operation(&self, marketplace: &str, operation: &str, outcome: &str) {
        self.operations_total.add(
            1,
            &[
                KeyValue::new("marketplace", marketplace.to_string()),
                KeyValue::new("operation", operation.to_string()),
                KeyValue::new("outcome", outcome.to_string()),
            ],
        );
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over the configured level. The `json` format
/// emits one JSON object per event, anything else uses the compact text
/// formatter.
pub fn init_tracing(otel: &OtelProvider, logging: &LoggingConfig) -> Result<(), OtelError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = if logging.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().compact().boxed()
    };

    let otel_layer = otel.is_enabled().then(|| {
        tracing_opentelemetry::layer().with_tracer(otel.tracer("marketplace-sync"))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(otel_layer)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| OtelError::TracerInit(e.to_string()))
}
