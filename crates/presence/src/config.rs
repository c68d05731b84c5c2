//! Presence detection configuration

use serde::{Deserialize, Serialize};

/// Presence detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum interval between detector invocations (seconds)
    pub cooldown_seconds: u64,

    /// ONNX person model; detection is disabled when unset
    pub model_path: Option<String>,

    /// Minimum person class score
    pub confidence_threshold: f32,

    /// Overlap above which weaker boxes are suppressed
    pub iou_threshold: f32,

    /// Square model input side (pixels)
    pub input_size: u32,

    /// JPEG quality of saved detection frames
    pub jpeg_quality: u8,

    /// Transition events kept in memory for status queries
    pub recent_events: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: 5,
            model_path: None,
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            input_size: 640,
            jpeg_quality: 90,
            recent_events: 32,
        }
    }
}

impl DetectionConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_seconds.min(i64::MAX as u64) as i64)
    }
}
