//! Camera Node - Main Entry Point

use std::sync::Arc;
use std::time::Duration;

use camera_controller::{init_logging, init_metrics, AppConfig, CameraController};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging()?;

    info!("=== Camera Node v{} ===", env!("CARGO_PKG_VERSION"));
    let config = AppConfig::load()?;
    init_metrics(&config.metrics)?;
    info!("Using capture device {}", config.camera.device);

    let controller = Arc::new(CameraController::open(&config)?);

    let period = Duration::from_secs(config.controller.status_log_seconds.max(1));
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Interrupt received");
                break;
            }
            _ = ticker.tick() => {
                let status = serde_json::to_string(&controller.status())?;
                info!("Status: {}", status);
            }
        }
    }

    // Joining the capture thread blocks; keep it off the runtime workers
    let handle = controller.clone();
    tokio::task::spawn_blocking(move || handle.shutdown()).await?;

    Ok(())
}
