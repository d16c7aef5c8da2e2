use anyhow::Result;

use ws_relay::config::Settings;
use ws_relay::server::{self, AppState};
use ws_relay::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    init_telemetry(&settings.logging)?;
    tracing::info!(
        addr = %settings.server_addr(),
        tls = settings.tls_paths().is_some(),
        echo_to_sender = settings.relay.echo_to_sender,
        "Configuration loaded"
    );

    // Create application state
    let state = AppState::new(settings);
    tracing::info!("Application state initialized");

    server::run(state).await?;

    Ok(())
}
