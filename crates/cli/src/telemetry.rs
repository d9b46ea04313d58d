// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! OpenTelemetry traces and metrics export

use std::sync::OnceLock;

use anyhow::Context as _;
use avs_config::{ExporterKind, MetricsConfig, TelemetryConfig, TracingConfig};
use opentelemetry::{InstrumentationScope, KeyValue, trace::TracerProvider as _};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    metrics::{SdkMeterProvider, periodic_reader_with_async_runtime::PeriodicReader},
    propagation::TraceContextPropagator,
    runtime::Tokio,
    trace::{
        IdGenerator, Sampler, SdkTracerProvider, Tracer,
        span_processor_with_async_runtime::BatchSpanProcessor,
    },
};
use opentelemetry_semantic_conventions as semcov;

struct Providers {
    tracer: SdkTracerProvider,
    meter: SdkMeterProvider,
}

static PROVIDERS: OnceLock<Providers> = OnceLock::new();

/// Install the global tracer and meter providers
///
/// Returns the tracer to plug into the `tracing` subscriber, or `None` when
/// traces are not exported.
pub fn setup(config: &TelemetryConfig) -> anyhow::Result<Option<Tracer>> {
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    let tracer = tracer_provider(&config.tracing).context("Failed to configure traces export")?;
    let meter = meter_provider(&config.metrics).context("Failed to configure metrics export")?;

    opentelemetry::global::set_tracer_provider(tracer.clone());
    opentelemetry::global::set_meter_provider(meter.clone());

    let exported = config.tracing.exporter != ExporterKind::None;
    let scope = InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
        .with_version(crate::VERSION)
        .with_schema_url(semcov::SCHEMA_URL)
        .build();
    let layer_tracer = exported.then(|| tracer.tracer_with_scope(scope));

    PROVIDERS
        .set(Providers { tracer, meter })
        .map_err(|_| anyhow::anyhow!("telemetry was already set up"))?;

    Ok(layer_tracer)
}

/// Flush and stop the exporters, if [`setup`] ran
pub fn shutdown() -> opentelemetry_sdk::error::OTelSdkResult {
    let Some(providers) = PROVIDERS.get() else {
        return Ok(());
    };

    providers.tracer.shutdown()?;
    providers.meter.shutdown()
}

/// Generates invalid IDs, so that log lines do not carry the IDs of traces
/// which go nowhere
#[derive(Debug, Clone, Copy)]
struct NoopIdGenerator;

impl IdGenerator for NoopIdGenerator {
    fn new_trace_id(&self) -> opentelemetry::TraceId {
        opentelemetry::TraceId::INVALID
    }

    fn new_span_id(&self) -> opentelemetry::SpanId {
        opentelemetry::SpanId::INVALID
    }
}

fn tracer_provider(config: &TracingConfig) -> anyhow::Result<SdkTracerProvider> {
    let builder = SdkTracerProvider::builder().with_resource(resource());

    let provider = match config.exporter {
        ExporterKind::None => builder
            .with_id_generator(NoopIdGenerator)
            .with_sampler(Sampler::AlwaysOff)
            .build(),

        ExporterKind::Stdout => builder
            .with_sampler(sampler(config))
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build(),

        ExporterKind::Otlp => {
            let mut exporter = opentelemetry_otlp::SpanExporter::builder().with_http();
            if let Some(endpoint) = &config.endpoint {
                exporter = exporter.with_endpoint(endpoint.as_str());
            }
            let exporter = exporter.build()?;

            builder
                .with_sampler(sampler(config))
                .with_span_processor(BatchSpanProcessor::builder(exporter, Tokio).build())
                .build()
        }
    };

    Ok(provider)
}

fn sampler(config: &TracingConfig) -> Sampler {
    let ratio = Sampler::TraceIdRatioBased(config.sample_rate.unwrap_or(1.0));
    Sampler::ParentBased(Box::new(ratio))
}

fn meter_provider(config: &MetricsConfig) -> anyhow::Result<SdkMeterProvider> {
    let builder = SdkMeterProvider::builder().with_resource(resource());

    let provider = match config.exporter {
        // Without a reader, instruments are no-ops
        ExporterKind::None => builder.build(),

        ExporterKind::Stdout => {
            let exporter = opentelemetry_stdout::MetricExporter::builder().build();
            builder
                .with_reader(PeriodicReader::builder(exporter, Tokio).build())
                .build()
        }

        ExporterKind::Otlp => {
            let mut exporter = opentelemetry_otlp::MetricExporter::builder().with_http();
            if let Some(endpoint) = &config.endpoint {
                exporter = exporter.with_endpoint(endpoint.as_str());
            }
            let exporter = exporter.build()?;

            builder
                .with_reader(PeriodicReader::builder(exporter, Tokio).build())
                .build()
        }
    };

    Ok(provider)
}

fn resource() -> Resource {
    Resource::builder()
        .with_service_name(env!("CARGO_PKG_NAME"))
        .with_attributes([
            KeyValue::new(semcov::resource::SERVICE_VERSION, crate::VERSION),
            KeyValue::new(semcov::resource::PROCESS_RUNTIME_NAME, "rust"),
        ])
        .build()
}

#[cfg(test)]
mod tests {
    use opentelemetry::metrics::MeterProvider as _;

    use super::*;

    #[test]
    fn test_disabled_exporters() {
        let meter = meter_provider(&MetricsConfig::default()).unwrap();
        let counter = meter.meter("test").u64_counter("test").build();
        counter.add(1, &[]);

        let tracer = tracer_provider(&TracingConfig::default()).unwrap();
        let _tracer = tracer.tracer("test");
    }
}
