//! Camera Node Controller
//!
//! Owns the capture device for the life of the process and serves the latest
//! frame to any number of concurrent callers. One capture thread feeds the
//! presence coordinator, the shared buffer and the recorder, in that order.

pub mod buffer;
pub mod config;
pub mod controller;
pub mod stream;

pub use buffer::{CameraStatus, SharedFrameBuffer};
pub use config::{AppConfig, ControllerConfig, MetricsConfig, StreamConfig};
pub use controller::{CameraController, DetectionListing};
pub use stream::{multipart_chunk, MjpegStream, MULTIPART_CONTENT_TYPE};

pub use recorder::{StartOutcome, StopOutcome};
pub use storage::MediaListing;

use camera_capture::CameraError;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use presence::DetectionError;
use recorder::RecorderError;
use storage::StorageError;
use thiserror::Error;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Controller error types
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Metrics exporter error: {0}")]
    Metrics(#[from] BuildError),
}

/// Initialize logging
pub fn init_logging() -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must run inside the Tokio runtime that serves the endpoint. When disabled
/// no recorder is installed and every counter is a no-op.
pub fn init_metrics(config: &MetricsConfig) -> Result<(), ControllerError> {
    if !config.enabled {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()?;
    info!("Metrics exporter listening on {}", config.listen);
    Ok(())
}
