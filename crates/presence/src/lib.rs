//! Person Presence Detection
//!
//! Turns a continuous frame stream into discrete presence transitions:
//! - Rate-limits the expensive detector to one invocation per cooldown
//! - Debounces raw detections into "appeared" / "left" events
//! - Persists annotated frames and an append-only detection log

pub mod annotate;
pub mod config;
pub mod coordinator;
pub mod detector;
pub mod state;

pub use config::DetectionConfig;
pub use coordinator::{DetectionCoordinator, FeedOutcome};
pub use detector::OnnxPersonDetector;
pub use state::{DetectionEvent, PresenceSnapshot, TransitionKind};

use camera_capture::VideoFrame;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Detection error types
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Unexpected model output: {0}")]
    OutputShape(String),

    #[error("Image processing failed: {0}")]
    ImageProcessing(String),
}

/// Axis-aligned box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Result of one detector invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub detected: bool,
    pub boxes: Vec<BoundingBox>,
}

impl Detection {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_boxes(boxes: Vec<BoundingBox>) -> Self {
        Self {
            detected: !boxes.is_empty(),
            boxes,
        }
    }

    /// Confidence score of each box
    pub fn scores(&self) -> Vec<f32> {
        self.boxes.iter().map(|b| b.confidence).collect()
    }
}

/// Person detector capability.
///
/// Called synchronously from the capture thread; implementations must be
/// callable repeatedly without leaking resources.
pub trait Detector: Send {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Detection, DetectionError>;
}

impl<F> Detector for F
where
    F: FnMut(&VideoFrame) -> Result<Detection, DetectionError> + Send,
{
    fn detect(&mut self, frame: &VideoFrame) -> Result<Detection, DetectionError> {
        self(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&bbox(20.0, 20.0, 5.0, 5.0)), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_detection_flag_follows_boxes() {
        assert!(!Detection::from_boxes(vec![]).detected);
        let d = Detection::from_boxes(vec![bbox(1.0, 1.0, 2.0, 2.0)]);
        assert!(d.detected);
        assert_eq!(d.scores(), vec![0.9]);
    }
}
