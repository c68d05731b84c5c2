//! Camera controller and capture loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use camera_capture::{FrameSource, TimestampOverlay, V4l2Source};
use chrono::Local;
use presence::{DetectionCoordinator, Detector, OnnxPersonDetector};
use recorder::{Recorder, StartOutcome, StopOutcome};
use serde::{Deserialize, Serialize};
use storage::{MediaKind, MediaListing, MediaStore};
use tracing::{debug, error, info, warn};

use crate::buffer::{CameraStatus, SharedFrameBuffer};
use crate::config::{AppConfig, ControllerConfig};
use crate::ControllerError;

/// Detection frames (newest first) and the detection log (oldest first)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionListing {
    pub detection_images: Vec<String>,
    pub detection_log: Vec<String>,
}

/// State shared between caller threads and the capture thread.
///
/// Lock order: `recorder` before `buffer`, never the reverse.
struct Shared {
    buffer: SharedFrameBuffer,
    recorder: Mutex<Recorder>,
    store: Arc<MediaStore>,
    config: ControllerConfig,
    running: AtomicBool,
}

impl Shared {
    fn recorder(&self) -> MutexGuard<'_, Recorder> {
        self.recorder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-wide camera controller. Construct once, share by `Arc`.
pub struct CameraController {
    shared: Arc<Shared>,
    capture_thread: Mutex<Option<JoinHandle<()>>>,
}

impl CameraController {
    /// Open the configured V4L2 device and person model, then start capturing.
    ///
    /// Fails only when the device or the configured model cannot be opened.
    pub fn open(config: &AppConfig) -> Result<Self, ControllerError> {
        let source = V4l2Source::open(config.camera.clone())?;
        let detector = OnnxPersonDetector::from_config(&config.detection)?
            .map(|d| Box::new(d) as Box<dyn Detector>);
        Self::start(config, Box::new(source), detector)
    }

    /// Start the capture loop over an already opened source
    pub fn start(
        config: &AppConfig,
        source: Box<dyn FrameSource>,
        detector: Option<Box<dyn Detector>>,
    ) -> Result<Self, ControllerError> {
        let store = Arc::new(MediaStore::open(&config.storage)?);
        let recorder = Recorder::new(store.clone(), config.recording.clone());
        let coordinator = detector
            .map(|d| DetectionCoordinator::new(d, store.clone(), config.detection.clone()));
        let overlay = if config.controller.timestamp_overlay {
            match TimestampOverlay::load(&config.overlay) {
                Ok(overlay) => Some(overlay),
                Err(e) => {
                    warn!("Timestamp overlay disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let shared = Arc::new(Shared {
            buffer: SharedFrameBuffer::new(),
            recorder: Mutex::new(recorder),
            store,
            config: config.controller.clone(),
            running: AtomicBool::new(true),
        });

        let (width, height) = source.dimensions();
        let loop_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || capture_loop(loop_shared, source, coordinator, overlay))?;

        info!("Camera controller started ({}x{})", width, height);
        Ok(Self {
            shared,
            capture_thread: Mutex::new(Some(handle)),
        })
    }

    /// Latest frame as JPEG at the live quality, or `None` before the first frame
    pub fn current_jpeg(&self) -> Option<Vec<u8>> {
        self.current_jpeg_with_quality(self.shared.config.live_quality)
    }

    /// Latest frame as JPEG at a caller-chosen quality
    pub fn current_jpeg_with_quality(&self, quality: u8) -> Option<Vec<u8>> {
        let frame = self.shared.buffer.read_frame()?;
        match frame.encode_jpeg(quality) {
            Ok(jpeg) => Some(jpeg),
            Err(e) => {
                warn!("Failed to encode frame {}: {}", frame.sequence, e);
                None
            }
        }
    }

    /// Save the latest frame as a photo. `Ok(None)` if nothing was captured yet.
    pub fn capture_photo(&self) -> Result<Option<String>, ControllerError> {
        let Some(frame) = self.shared.buffer.read_frame() else {
            debug!("Photo requested before first frame");
            return Ok(None);
        };
        let jpeg = frame.encode_jpeg(self.shared.config.photo_quality)?;
        let filename = self.shared.store.save(MediaKind::Photo, Local::now(), &jpeg)?;
        metrics::counter!("camera_photos_captured_total").increment(1);
        info!("Photo captured: {}", filename);
        Ok(Some(filename))
    }

    /// Open a recording session sized to the latest frame
    pub fn start_recording(&self) -> Result<StartOutcome, ControllerError> {
        let mut recorder = self.shared.recorder();
        let dims = self.shared.buffer.read_frame().map(|f| f.dimensions());
        let outcome = recorder.start(dims, Local::now())?;
        if let StartOutcome::Started { filename } = &outcome {
            self.shared.buffer.update_status(|s| {
                s.is_recording = true;
                s.recording_file = Some(filename.clone());
            });
        }
        Ok(outcome)
    }

    /// Close the recording session, if any
    pub fn stop_recording(&self) -> StopOutcome {
        let mut recorder = self.shared.recorder();
        if recorder.is_recording() {
            self.shared.buffer.update_status(|s| {
                s.is_recording = false;
                s.recording_file = None;
            });
        }
        recorder.stop()
    }

    pub fn status(&self) -> CameraStatus {
        self.shared.buffer.read_status()
    }

    /// Photos and videos on disk, newest first
    pub fn list_media(&self) -> Result<MediaListing, ControllerError> {
        Ok(self.shared.store.list_media()?)
    }

    pub fn list_detections(&self) -> Result<DetectionListing, ControllerError> {
        Ok(DetectionListing {
            detection_images: self.shared.store.list(MediaKind::Detection)?,
            detection_log: self.shared.store.detection_log()?,
        })
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop the capture loop, wait for it and finalize any open recording
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down camera controller");

        let handle = self
            .capture_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Capture thread panicked");
            }
        }

        if let StopOutcome::Stopped { filename, frames } = self.stop_recording() {
            info!("Finalized {} ({} frames) on shutdown", filename, frames);
        }
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn capture_loop(
    shared: Arc<Shared>,
    mut source: Box<dyn FrameSource>,
    mut coordinator: Option<DetectionCoordinator>,
    overlay: Option<TimestampOverlay>,
) {
    let initial_backoff = shared.config.retry_interval();
    let max_backoff = shared.config.max_retry_interval();
    let mut backoff = initial_backoff;

    while shared.running.load(Ordering::Acquire) {
        let mut frame = match source.read() {
            Ok(frame) => frame,
            Err(e) => {
                metrics::counter!("camera_read_failures_total").increment(1);
                warn!("Frame read failed: {}. Reopening in {:?}", e, backoff);
                thread::sleep(backoff);
                backoff = (backoff * 2).min(max_backoff);
                if let Err(e) = source.reopen() {
                    warn!("Device reopen failed: {}", e);
                }
                continue;
            }
        };
        backoff = initial_backoff;

        if let Some(overlay) = &overlay {
            overlay.stamp(&mut frame);
        }
        let frame = Arc::new(frame);

        let presence = coordinator.as_mut().map(|c| {
            c.feed(&frame);
            c.presence()
        });
        shared.buffer.publish(frame.clone(), presence);
        metrics::counter!("camera_frames_captured_total").increment(1);

        let mut recorder = shared.recorder();
        if let Some(StopOutcome::Stopped { filename, frames }) = recorder.feed(&frame) {
            // Recorder lock held: status and recorder change together
            shared.buffer.update_status(|s| {
                s.is_recording = false;
                s.recording_file = None;
            });
            warn!("Recording {} abandoned after {} frames", filename, frames);
        }
    }

    info!("Capture loop stopped");
}
