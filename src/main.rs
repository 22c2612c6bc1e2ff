use anyhow::Context;
use nudm_gateway::{config::GatewayConfig, init_tracing, run};
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional YAML file; NUDM__* environment variables override it
    let config_path = env::args().nth(1);

    let config = GatewayConfig::load(config_path.as_deref()).with_context(|| {
        format!(
            "Failed to load configuration from {}\nUsage: nudm-gateway [config_file]",
            config_path.as_deref().unwrap_or("environment")
        )
    })?;

    init_tracing(config.logging.format);

    run(config).await.context("nUDM service error")
}
