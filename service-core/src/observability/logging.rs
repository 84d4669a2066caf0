use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, runtime, trace as sdktrace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Settings for the process-wide tracing subscriber.
#[derive(Debug, Clone)]
pub struct TracingOptions {
    pub service_name: String,
    /// Fallback filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// OTLP gRPC collector; spans are only exported when set.
    pub otlp_endpoint: Option<String>,
    pub json: bool,
}

/// Install the global subscriber: env filter, optional OTLP exporter and a
/// JSON (or human readable) formatter.
pub fn init_tracing(options: &TracingOptions) -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&options.log_level));

    let telemetry = match options.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let otlp_exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint);

            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(otlp_exporter)
                .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                    KeyValue::new("service.name", options.service_name.clone()),
                ])))
                .install_batch(runtime::Tokio)
                .map_err(|e| {
                    anyhow::anyhow!(
                        "Failed to initialize OTLP tracer for '{}' at '{}': {}",
                        options.service_name,
                        endpoint,
                        e
                    )
                })?;

            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let json_layer = options.json.then(|| {
        tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .json()
            .flatten_event(true)
    });
    let text_layer = (!options.json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(telemetry)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    Ok(())
}
