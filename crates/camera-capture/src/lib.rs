//! Camera Capture Library for the Camera Node
//!
//! Provides blocking frame capture from a V4L2 device.
//! Supports:
//! - MJPEG and YUYV device formats, decoded to RGB before a frame exists
//! - Device close/reopen for recovery after read failures
//! - Timestamp overlay burned into captured frames

pub mod frame;
pub mod overlay;
pub mod v4l2;

pub use frame::{PixelFormat, VideoFrame};
pub use overlay::{OverlayConfig, TimestampOverlay};
pub use v4l2::V4l2Source;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Frame decode failed: {0}")]
    Decode(String),

    #[error("Frame encode failed: {0}")]
    Encode(String),

    #[error("Overlay font unavailable: {0}")]
    Font(String),

    #[error("Camera not initialized")]
    NotInitialized,
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Requested device pixel format
    pub format: PixelFormat,
    /// Number of mmap buffers requested from the driver
    pub buffer_count: u32,
    /// Longest wait for one frame before the read fails (milliseconds)
    pub read_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            format: PixelFormat::Mjpeg,
            buffer_count: 4,
            read_timeout_ms: 2000,
        }
    }
}

/// A blocking source of fully decoded frames.
///
/// Only the capture thread calls into a source, so implementations need
/// `Send` but not `Sync`.
pub trait FrameSource: Send {
    /// Block until the next frame is available.
    fn read(&mut self) -> Result<VideoFrame, CameraError>;

    /// Release the underlying device and acquire it again.
    fn reopen(&mut self) -> Result<(), CameraError>;

    /// Fixed frame dimensions for the lifetime of the device.
    fn dimensions(&self) -> (u32, u32);
}
