//! Gateway entry point.
//!
//! Loads configuration (`GATEWAY_CONFIG` or `gateway.{yaml,yml,toml}`), initializes
//! logging and serves until Ctrl+C or SIGTERM.

use gateway_server::{GatewayContext, Server, ServerError};
use gateway_telemetry::init_logging;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Gateway exited with error");
        eprintln!("gateway: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ServerError> {
    let config = gateway_config::load_config()
        .await
        .map_err(|e| ServerError::Config(e.to_string()))?;

    init_logging(&config.observability.logging).map_err(|e| ServerError::Config(e.to_string()))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        services = config.services.len(),
        "Starting gateway"
    );

    let context = GatewayContext::from_config(config)
        .await
        .map_err(|e| ServerError::Config(e.to_string()))?;

    Server::new(context).run().await
}
