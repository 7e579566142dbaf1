use anyhow::Result;

/// Installs the global subscriber: env filter plus fmt output, and an OTLP span exporter when an
/// endpoint is configured.
pub fn init_tracing(service_name: &'static str, otlp_endpoint: Option<&str>) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,traffic_pipeline=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    match otlp_endpoint.and_then(otlp_traces_endpoint) {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::new_exporter()
                .http()
                .with_endpoint(endpoint);
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                    KeyValue::new("service.name", service_name),
                ])))
                .install_batch(Tokio)?;

            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .with(otel_layer)
                .try_init()?;
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }

    Ok(())
}

/// Collector base URL to the OTLP/HTTP traces path. Blank input disables export.
fn otlp_traces_endpoint(endpoint: &str) -> Option<String> {
    let base = endpoint.trim().trim_end_matches('/');
    if base.is_empty() {
        return None;
    }
    if base.ends_with("/v1/traces") {
        Some(base.to_string())
    } else {
        Some(format!("{base}/v1/traces"))
    }
}

/// Flushes pending spans before the process exits.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
