//! Named tracing pipelines.
//!
//! A backend references at most one pipeline by name. A missing name is not an
//! error: the tracing wrapper is simply left out of that backend's chains.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{self as sdktrace, Sampler, TracerProvider},
    Resource,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Tracers by configured name
pub type TracerCollection = HashMap<String, Arc<Tracer>>;

/// Tracing pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TracingOptions {
    /// Service name reported on every span
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// OTLP endpoint (e.g., "http://localhost:4317"); spans stay local when unset
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Fraction of traces sampled
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            endpoint: None,
            sample_rate: default_sample_rate(),
        }
    }
}

fn default_service_name() -> String {
    "pmp-proxy-gateway".to_string()
}

fn default_sample_rate() -> f64 {
    1.0
}

/// A named tracer handle attached to spans by the tracing middleware
pub struct Tracer {
    name: String,
    options: TracingOptions,
    inner: sdktrace::Tracer,
    // tracers only hold a weak reference to a locally built provider
    _provider: Option<TracerProvider>,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish()
    }
}

impl Tracer {
    /// Build a tracer; with an endpoint the OTLP batch exporter is installed
    pub fn new(name: &str, options: &TracingOptions) -> anyhow::Result<Self> {
        let sampler = if options.sample_rate >= 1.0 {
            Sampler::AlwaysOn
        } else if options.sample_rate <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::TraceIdRatioBased(options.sample_rate)
        };
        let trace_config = sdktrace::Config::default()
            .with_sampler(sampler)
            .with_resource(Resource::new(vec![KeyValue::new(
                "service.name",
                options.service_name.clone(),
            )]));

        let (inner, provider) = match options.endpoint {
            Some(ref endpoint) => {
                info!(tracer = %name, endpoint = %endpoint, "Installing OTLP trace exporter");
                let tracer = opentelemetry_otlp::new_pipeline()
                    .tracing()
                    .with_exporter(
                        opentelemetry_otlp::new_exporter()
                            .tonic()
                            .with_endpoint(endpoint.clone()),
                    )
                    .with_trace_config(trace_config)
                    .install_batch(opentelemetry_sdk::runtime::Tokio)?;
                (tracer, None)
            }
            None => {
                let provider = TracerProvider::builder().with_config(trace_config).build();
                (provider.tracer(name.to_string()), Some(provider))
            }
        };

        Ok(Self {
            name: name.to_string(),
            options: options.clone(),
            inner,
            _provider: provider,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &TracingOptions {
        &self.options
    }

    pub fn inner(&self) -> &sdktrace::Tracer {
        &self.inner
    }
}

/// Build every configured tracer
pub fn build_tracers(options: &HashMap<String, TracingOptions>) -> anyhow::Result<TracerCollection> {
    let mut tracers = TracerCollection::new();
    for (name, tracing_options) in options {
        let tracer = Tracer::new(name, tracing_options)?;
        info!(tracer = %name, service = %tracing_options.service_name, "Initialized tracer");
        tracers.insert(name.clone(), Arc::new(tracer));
    }
    Ok(tracers)
}

/// Flush and stop any installed exporters
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_options_default() {
        let options = TracingOptions::default();
        assert_eq!(options.service_name, "pmp-proxy-gateway");
        assert!(options.endpoint.is_none());
        assert_eq!(options.sample_rate, 1.0);
    }

    #[test]
    fn test_local_tracer() {
        let options = TracingOptions {
            service_name: "test-service".to_string(),
            endpoint: None,
            sample_rate: 0.5,
        };
        let tracer = Tracer::new("local", &options).unwrap();
        assert_eq!(tracer.name(), "local");
        assert_eq!(tracer.options().service_name, "test-service");
    }

    #[test]
    fn test_build_tracers() {
        let mut options = HashMap::new();
        options.insert("std".to_string(), TracingOptions::default());
        let tracers = build_tracers(&options).unwrap();
        assert!(tracers.contains_key("std"));
    }
}
