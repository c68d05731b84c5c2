//! Application configuration
//!
//! Layered with the `config` crate: an optional TOML file, then environment
//! variables such as `CAMERA_NODE__CAMERA__DEVICE=/dev/video2`.

use std::net::SocketAddr;
use std::time::Duration;

use camera_capture::{CameraConfig, OverlayConfig};
use config::{Config, ConfigError, Environment, File};
use presence::DetectionConfig;
use recorder::RecordingConfig;
use serde::{Deserialize, Serialize};
use storage::StorageConfig;

/// Default configuration file, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "camera-node.toml";
/// Environment variable overriding the configuration file path
pub const CONFIG_PATH_ENV: &str = "CAMERA_NODE_CONFIG";
/// Environment variable prefix for individual settings
pub const ENV_PREFIX: &str = "CAMERA_NODE";

/// Capture loop and on-demand encoding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// JPEG quality of `current_jpeg`
    pub live_quality: u8,
    /// JPEG quality of captured photos
    pub photo_quality: u8,
    /// Pause before the first device reopen (milliseconds)
    pub retry_interval_ms: u64,
    /// Upper bound for the doubling reopen pause (milliseconds)
    pub max_retry_interval_ms: u64,
    /// Burn the capture time into each frame
    pub timestamp_overlay: bool,
    /// Status log period of the binary (seconds)
    pub status_log_seconds: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            live_quality: 70,
            photo_quality: 95,
            retry_interval_ms: 100,
            max_retry_interval_ms: 2000,
            timestamp_overlay: true,
            status_log_seconds: 30,
        }
    }
}

impl ControllerConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn max_retry_interval(&self) -> Duration {
        Duration::from_millis(self.max_retry_interval_ms.max(self.retry_interval_ms))
    }
}

/// Live stream consumer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Wait between polls while no frame exists yet (milliseconds)
    pub idle_wait_ms: u64,
    /// Overrides the controller's live quality for stream parts
    pub jpeg_quality: Option<u8>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_wait_ms: 100,
            jpeg_quality: None,
        }
    }
}

impl StreamConfig {
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }
}

/// Prometheus exporter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the exporter; when off, counters are not recorded
    pub enabled: bool,
    /// Scrape endpoint address
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}

/// Complete node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraConfig,
    pub storage: StorageConfig,
    pub recording: RecordingConfig,
    pub detection: DetectionConfig,
    pub controller: ControllerConfig,
    pub overlay: OverlayConfig,
    pub stream: StreamConfig,
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Load from `$CAMERA_NODE_CONFIG` (or `camera-node.toml`) and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    /// Load from a specific file, which may be absent
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::PixelFormat;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.camera.device, "/dev/video0");
        assert_eq!((config.camera.width, config.camera.height), (640, 480));
        assert_eq!(config.controller.live_quality, 70);
        assert_eq!(config.controller.photo_quality, 95);
        assert_eq!(config.recording.fps, 20);
        assert_eq!(config.detection.cooldown_seconds, 5);
        assert_eq!(config.stream.idle_wait(), Duration::from_millis(100));
        assert!(config.detection.model_path.is_none());
        assert_eq!(config.recording.max_consecutive_failures, 50);
        assert_eq!(config.camera.read_timeout_ms, 2000);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.listen.port(), 9090);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = AppConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.controller.retry_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_file_overrides_selected_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(
            &path,
            r#"
[camera]
device = "/dev/video2"
format = "yuyv"

[detection]
cooldown_seconds = 2
model_path = "models/person.onnx"

[storage]
root = "/var/lib/camera-node"

[overlay]
font_path = "/opt/fonts/mono.ttf"
scale = 28.0

[metrics]
listen = "127.0.0.1:9100"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.camera.device, "/dev/video2");
        assert_eq!(config.camera.format, PixelFormat::Yuyv);
        assert_eq!(config.camera.width, 640);
        assert_eq!(config.detection.cooldown_seconds, 2);
        assert_eq!(config.detection.model_path.as_deref(), Some("models/person.onnx"));
        assert_eq!(config.storage.photo_dir, "photos");
        assert_eq!(config.overlay.font_path, std::path::PathBuf::from("/opt/fonts/mono.ttf"));
        assert_eq!(config.overlay.scale, 28.0);
        assert_eq!(config.overlay.x, 10);
        assert_eq!(config.metrics.listen, SocketAddr::from(([127, 0, 0, 1], 9100)));
    }

    #[test]
    fn test_retry_cap_never_below_initial() {
        let config = ControllerConfig {
            retry_interval_ms: 500,
            max_retry_interval_ms: 100,
            ..Default::default()
        };
        assert_eq!(config.max_retry_interval(), Duration::from_millis(500));
    }
}
