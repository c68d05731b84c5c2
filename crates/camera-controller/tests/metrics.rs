//! Counters reach an installed Prometheus recorder

use std::thread;
use std::time::{Duration, Instant};

use camera_capture::{CameraError, FrameSource, VideoFrame};
use camera_controller::{init_metrics, AppConfig, CameraController, MetricsConfig};
use chrono::Local;
use metrics_exporter_prometheus::PrometheusBuilder;
use storage::StorageConfig;

/// Fails its first read, then yields 8x8 grey frames
struct GreySource {
    produced: u64,
    failed: bool,
}

impl FrameSource for GreySource {
    fn read(&mut self) -> Result<VideoFrame, CameraError> {
        thread::sleep(Duration::from_millis(2));
        if !self.failed {
            self.failed = true;
            return Err(CameraError::Stream("warming up".into()));
        }
        self.produced += 1;
        VideoFrame::from_rgb(vec![128; 8 * 8 * 3], 8, 8, Local::now(), self.produced)
    }

    fn reopen(&mut self) -> Result<(), CameraError> {
        Ok(())
    }

    fn dimensions(&self) -> (u32, u32) {
        (8, 8)
    }
}

#[test]
fn test_capture_counters_are_exported() {
    let handle = PrometheusBuilder::new().install_recorder().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig {
        storage: StorageConfig {
            root: dir.path().to_path_buf(),
            ..Default::default()
        },
        ..Default::default()
    };
    config.controller.retry_interval_ms = 1;
    config.controller.timestamp_overlay = false;

    let source = GreySource {
        produced: 0,
        failed: false,
    };
    let controller = CameraController::start(&config, Box::new(source), None).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while controller.status().frames_captured < 5 {
        assert!(Instant::now() < deadline, "timed out waiting for frames");
        thread::sleep(Duration::from_millis(5));
    }
    controller.capture_photo().unwrap().unwrap();
    controller.shutdown();

    let rendered = handle.render();
    assert!(rendered.contains("camera_frames_captured_total"), "{}", rendered);
    assert!(rendered.contains("camera_read_failures_total 1"), "{}", rendered);
    assert!(rendered.contains("camera_photos_captured_total 1"), "{}", rendered);
}

#[test]
fn test_disabled_exporter_installs_nothing() {
    let config = MetricsConfig {
        enabled: false,
        ..Default::default()
    };
    assert!(init_metrics(&config).is_ok());
}
