//! Video Recorder
//!
//! Two-state machine (Idle, Recording) that owns one open video encoder while
//! a session is active. Start and stop misuse are reported as outcomes, not
//! errors. A failed frame write is logged and the session carries on, until
//! too many writes in a row fail and the session is closed.

pub mod encoder;

pub use encoder::{count_frames, FrameEncoder, GstAviWriter};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use camera_capture::VideoFrame;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use storage::{MediaKind, MediaStore, StorageError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Recorder error types
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Encoder open failed: {0}")]
    EncoderOpen(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("GStreamer error: {0}")]
    Gst(#[from] gstreamer::glib::Error),

    #[error("State change failed: {0}")]
    StateChange(#[from] gstreamer::StateChangeError),
}

/// Recording configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Nominal frame rate written to the container header
    pub fps: u32,
    /// JPEG quality of each stored frame
    pub jpeg_quality: u8,
    /// Consecutive failed frames after which the session is closed; 0 never closes
    pub max_consecutive_failures: u32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            fps: 20,
            jpeg_quality: 80,
            max_consecutive_failures: 50,
        }
    }
}

/// Result of a start request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session was opened
    Started { filename: String },
    /// A session is already open; nothing changed
    AlreadyActive { filename: String },
    /// No frame has been captured yet, so dimensions are unknown
    NoFrame,
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The session was closed
    Stopped { filename: String, frames: u64 },
    /// No session was open
    NotActive,
}

/// Opens the encoder for a new session: `(path, width, height, fps)`
type EncoderFactory =
    Box<dyn Fn(&Path, u32, u32, u32) -> Result<Box<dyn FrameEncoder>, RecorderError> + Send>;

fn open_gst_avi(
    path: &Path,
    width: u32,
    height: u32,
    fps: u32,
) -> Result<Box<dyn FrameEncoder>, RecorderError> {
    Ok(Box::new(GstAviWriter::new(path, width, height, fps)?))
}

/// One open recording
pub struct RecordingSession {
    filename: String,
    path: PathBuf,
    encoder: Box<dyn FrameEncoder>,
    started_at: DateTime<Local>,
    failed_writes: u64,
    consecutive_failures: u32,
}

impl RecordingSession {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn frames(&self) -> u64 {
        self.encoder.frame_count()
    }

    pub fn failed_writes(&self) -> u64 {
        self.failed_writes
    }

    fn close(self) -> StopOutcome {
        let expected = self.encoder.frame_count();
        let frames = match self.encoder.finish() {
            Ok(frames) => frames,
            Err(e) => {
                // The file keeps whatever reached disk; a damaged tail is tolerated
                error!("Failed to finalize {}: {}", self.path.display(), e);
                expected
            }
        };
        info!(
            "Recording stopped: {} ({} frames, {} failed writes)",
            self.filename, frames, self.failed_writes
        );
        StopOutcome::Stopped {
            filename: self.filename,
            frames,
        }
    }
}

/// Recorder state machine
pub struct Recorder {
    store: Arc<MediaStore>,
    config: RecordingConfig,
    open_encoder: EncoderFactory,
    session: Option<RecordingSession>,
}

impl Recorder {
    /// Create an idle recorder writing Motion-JPEG AVI into the store's video directory
    pub fn new(store: Arc<MediaStore>, config: RecordingConfig) -> Self {
        Self::with_encoder(store, config, open_gst_avi)
    }

    /// Create an idle recorder whose sessions use a custom encoder
    pub fn with_encoder<F>(store: Arc<MediaStore>, config: RecordingConfig, open_encoder: F) -> Self
    where
        F: Fn(&Path, u32, u32, u32) -> Result<Box<dyn FrameEncoder>, RecorderError>
            + Send
            + 'static,
    {
        Self {
            store,
            config,
            open_encoder: Box::new(open_encoder),
            session: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Active session, if any
    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    /// Idle → Recording. `dims` are the current frame's dimensions.
    ///
    /// On encoder failure the recorder stays idle and the empty file is removed.
    pub fn start(
        &mut self,
        dims: Option<(u32, u32)>,
        at: DateTime<Local>,
    ) -> Result<StartOutcome, RecorderError> {
        if let Some(session) = &self.session {
            return Ok(StartOutcome::AlreadyActive {
                filename: session.filename.clone(),
            });
        }
        let Some((width, height)) = dims else {
            return Ok(StartOutcome::NoFrame);
        };

        let reserved = self.store.reserve(MediaKind::Video, at)?;
        // The name is claimed; the encoder reopens the path itself
        drop(reserved.file);
        let fps = self.config.fps;
        let encoder = match (self.open_encoder)(&reserved.path, width, height, fps) {
            Ok(encoder) => encoder,
            Err(e) => {
                if let Err(rm) = fs::remove_file(&reserved.path) {
                    warn!("Failed to remove {}: {}", reserved.path.display(), rm);
                }
                return Err(e);
            }
        };

        info!(
            "Recording started: {} ({}x{} @ {} fps)",
            reserved.filename, width, height, fps
        );
        let filename = reserved.filename.clone();
        self.session = Some(RecordingSession {
            filename: reserved.filename,
            path: reserved.path,
            encoder,
            started_at: at,
            failed_writes: 0,
            consecutive_failures: 0,
        });
        Ok(StartOutcome::Started { filename })
    }

    /// Append a frame to the open session. No-op while idle.
    ///
    /// Returns the stop outcome when this frame's failure closed the session.
    pub fn feed(&mut self, frame: &VideoFrame) -> Option<StopOutcome> {
        let quality = self.config.jpeg_quality;
        let session = self.session.as_mut()?;

        let written = if frame.dimensions() != session.encoder.dimensions() {
            Err(format!(
                "{}x{} frame does not fit {:?} session",
                frame.width,
                frame.height,
                session.encoder.dimensions()
            ))
        } else {
            frame
                .encode_jpeg(quality)
                .map_err(|e| e.to_string())
                .and_then(|jpeg| session.encoder.write_frame(&jpeg).map_err(|e| e.to_string()))
        };

        match written {
            Ok(()) => {
                session.consecutive_failures = 0;
                metrics::counter!("recorder_frames_written_total").increment(1);
                debug!("Recorded frame {} to {}", frame.sequence, session.filename);
                None
            }
            Err(e) => {
                session.failed_writes += 1;
                session.consecutive_failures += 1;
                metrics::counter!("recorder_write_failures_total").increment(1);
                warn!("Dropped frame {} from {}: {}", frame.sequence, session.filename, e);

                let limit = self.config.max_consecutive_failures;
                if limit > 0 && session.consecutive_failures >= limit {
                    error!(
                        "Closing {} after {} consecutive failed frames",
                        session.filename, session.consecutive_failures
                    );
                    metrics::counter!("recorder_sessions_aborted_total").increment(1);
                    return Some(self.stop());
                }
                None
            }
        }
    }

    /// Recording → Idle, flushing and closing the encoder.
    pub fn stop(&mut self) -> StopOutcome {
        match self.session.take() {
            Some(session) => session.close(),
            None => StopOutcome::NotActive,
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("Recorder dropped with an open session, finalizing");
            self.stop();
        }
    }
}
