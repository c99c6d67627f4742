use anyhow::Result;
use octobridge::bridge::{Bridge, BridgeCommand};
use octobridge::config::Config;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    octobridge::logging::init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    // Command channel for external control surfaces
    let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel::<BridgeCommand>();

    let mut bridge = Bridge::new(config, cmd_rx)
        .map_err(|e| anyhow::anyhow!("Failed to create bridge: {}", e))?;

    info!("Octobridge starting up");

    bridge
        .setup()
        .await
        .map_err(|e| anyhow::anyhow!("Bridge setup failed: {}", e))?;

    // Stop the loop cleanly on Ctrl-C
    let shutdown = bridge.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown.send(());
        }
    });

    match bridge.run().await {
        Ok(()) => {
            info!("Bridge shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Bridge failed with error: {}", e);
            Err(anyhow::anyhow!("Bridge error: {}", e))
        }
    }
}
