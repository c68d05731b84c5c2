//! Presence state and transition events

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Log line timestamp format
pub const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Direction of a presence change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Appeared,
    Left,
}

impl TransitionKind {
    pub fn from_present(present: bool) -> Self {
        if present {
            TransitionKind::Appeared
        } else {
            TransitionKind::Left
        }
    }
}

/// One debounced presence transition. Immutable once logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub timestamp: DateTime<Local>,
    pub kind: TransitionKind,
    pub scores: Vec<f32>,
    /// Saved frame under the detections directory
    pub frame_file: Option<String>,
}

impl DetectionEvent {
    /// Human-readable detection log line (no trailing newline)
    pub fn log_line(&self) -> String {
        let mut line = format!("{} - ", self.timestamp.format(LOG_TIME_FORMAT));
        match self.kind {
            TransitionKind::Appeared => {
                line.push_str("Person detected");
                if !self.scores.is_empty() {
                    let scores: Vec<String> =
                        self.scores.iter().map(|s| format!("{:.2}", s)).collect();
                    line.push_str(&format!(" (confidence: {})", scores.join(", ")));
                }
            }
            TransitionKind::Left => line.push_str("Person left"),
        }
        if let Some(file) = &self.frame_file {
            line.push_str(&format!(" - {}", file));
        }
        line
    }
}

/// Presence fields copied into the camera status
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub person_detected: bool,
    pub last_detection_time: Option<DateTime<Local>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 17, 9, 0, 5).unwrap()
    }

    #[test]
    fn test_appeared_log_line() {
        let event = DetectionEvent {
            timestamp: at(),
            kind: TransitionKind::Appeared,
            scores: vec![0.912, 0.5],
            frame_file: Some("detection_20240517_090005.jpg".into()),
        };
        assert_eq!(
            event.log_line(),
            "2024-05-17 09:00:05 - Person detected (confidence: 0.91, 0.50) - \
             detection_20240517_090005.jpg"
        );
    }

    #[test]
    fn test_left_log_line() {
        let event = DetectionEvent {
            timestamp: at(),
            kind: TransitionKind::Left,
            scores: vec![],
            frame_file: None,
        };
        assert_eq!(event.log_line(), "2024-05-17 09:00:05 - Person left");
    }
}
