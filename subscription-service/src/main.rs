use service_core::observability::{init_tracing, TracingOptions};
use subscription_service::{config::Config, services::init_metrics, Application};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    init_tracing(&TracingOptions {
        service_name: config.service_name.clone(),
        log_level: config.telemetry.log_level.clone(),
        otlp_endpoint: config.telemetry.otlp_endpoint.clone(),
        json: config.telemetry.json_logs,
    })?;
    init_metrics();

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
