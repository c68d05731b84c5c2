//! Detection coordinator
//!
//! Rate-limits detector invocations to one per cooldown window and debounces
//! raw results into presence transitions. Every transition is persisted as a
//! detection frame plus one log line; while a person stays present, each
//! invocation saves another frame without logging.

use std::collections::VecDeque;
use std::sync::Arc;

use camera_capture::frame::encode_jpeg;
use camera_capture::VideoFrame;
use chrono::{DateTime, Local};
use storage::{MediaKind, MediaStore};
use tracing::{debug, info, warn};

use crate::annotate::annotate;
use crate::state::{DetectionEvent, PresenceSnapshot, TransitionKind};
use crate::{Detection, DetectionConfig, DetectionError, Detector};

/// What a single fed frame led to
#[derive(Debug, Clone, PartialEq)]
pub enum FeedOutcome {
    /// Inside the cooldown window; detector not invoked
    Skipped,
    /// Invoked, nobody present before or now
    Absent,
    /// Invoked, person still present; evidence frame saved if possible
    StillPresent { frame_file: Option<String> },
    /// Presence changed
    Transition(DetectionEvent),
}

/// Presence state machine driven by the capture loop
pub struct DetectionCoordinator {
    detector: Box<dyn Detector>,
    store: Arc<MediaStore>,
    config: DetectionConfig,
    last_invocation: Option<DateTime<Local>>,
    person_present: bool,
    last_detection_time: Option<DateTime<Local>>,
    last_event_time: Option<DateTime<Local>>,
    recent: VecDeque<DetectionEvent>,
    invocations: u64,
}

impl DetectionCoordinator {
    pub fn new(
        detector: Box<dyn Detector>,
        store: Arc<MediaStore>,
        config: DetectionConfig,
    ) -> Self {
        info!(
            "Presence detection enabled (cooldown {}s, threshold {})",
            config.cooldown_seconds, config.confidence_threshold
        );
        Self {
            detector,
            store,
            recent: VecDeque::with_capacity(config.recent_events),
            config,
            last_invocation: None,
            person_present: false,
            last_detection_time: None,
            last_event_time: None,
            invocations: 0,
        }
    }

    /// Last known presence state
    pub fn presence(&self) -> PresenceSnapshot {
        PresenceSnapshot {
            person_detected: self.person_present,
            last_detection_time: self.last_detection_time,
        }
    }

    /// Most recent transitions, oldest first
    pub fn recent_events(&self) -> impl Iterator<Item = &DetectionEvent> {
        self.recent.iter()
    }

    /// Number of detector invocations so far
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    fn due(&self, t: DateTime<Local>) -> bool {
        match self.last_invocation {
            None => true,
            // A backwards clock step also counts as due
            Some(last) => t < last || t - last >= self.config.cooldown(),
        }
    }

    /// Process one captured frame
    pub fn feed(&mut self, frame: &VideoFrame) -> FeedOutcome {
        let t = frame.captured_at;
        if !self.due(t) {
            return FeedOutcome::Skipped;
        }
        self.last_invocation = Some(t);
        self.invocations += 1;
        metrics::counter!("presence_detector_invocations_total").increment(1);

        let detection = match self.detector.detect(frame) {
            Ok(detection) => detection,
            Err(e) => {
                metrics::counter!("presence_detector_failures_total").increment(1);
                warn!("Person detection failed on frame {}: {}", frame.sequence, e);
                Detection::none()
            }
        };
        if detection.detected {
            self.last_detection_time = Some(t);
        }

        if detection.detected == self.person_present {
            if !detection.detected {
                return FeedOutcome::Absent;
            }
            let frame_file = self.save_frame(frame, &detection);
            debug!("Person still present ({} boxes)", detection.boxes.len());
            return FeedOutcome::StillPresent { frame_file };
        }

        self.person_present = detection.detected;
        let kind = TransitionKind::from_present(detection.detected);
        let frame_file = self.save_frame(frame, &detection);
        let timestamp = match self.last_event_time {
            Some(prev) if prev > t => prev,
            _ => t,
        };
        self.last_event_time = Some(timestamp);

        let event = DetectionEvent {
            timestamp,
            kind,
            scores: detection.scores(),
            frame_file,
        };
        if let Err(e) = self.store.append_detection_log(&event.log_line()) {
            warn!("Failed to append detection log: {}", e);
        }
        metrics::counter!("presence_transitions_total").increment(1);
        info!("Presence transition: {:?} at {}", kind, timestamp);

        if self.recent.len() >= self.config.recent_events.max(1) {
            self.recent.pop_front();
        }
        self.recent.push_back(event.clone());
        FeedOutcome::Transition(event)
    }

    /// Persist the frame with boxes drawn. Failures are logged, not fatal.
    fn save_frame(&self, frame: &VideoFrame, detection: &Detection) -> Option<String> {
        let quality = self.config.jpeg_quality;
        let result = annotate(frame, &detection.boxes).and_then(|image| {
            encode_jpeg(image.as_raw(), image.width(), image.height(), quality)
                .map_err(|e| DetectionError::ImageProcessing(e.to_string()))
        });
        let jpeg = match result {
            Ok(jpeg) => jpeg,
            Err(e) => {
                warn!("Failed to encode detection frame: {}", e);
                return None;
            }
        };
        match self.store.save(MediaKind::Detection, frame.captured_at, &jpeg) {
            Ok(filename) => Some(filename),
            Err(e) => {
                warn!("Failed to save detection frame: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundingBox;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use storage::StorageConfig;

    fn store_in(dir: &std::path::Path) -> Arc<MediaStore> {
        Arc::new(
            MediaStore::open(&StorageConfig {
                root: dir.to_path_buf(),
                ..Default::default()
            })
            .unwrap(),
        )
    }

    fn base() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 17, 9, 0, 0).unwrap()
    }

    fn frame_at(at: DateTime<Local>, seq: u64) -> VideoFrame {
        VideoFrame::from_rgb(vec![90; 32 * 24 * 3], 32, 24, at, seq).unwrap()
    }

    fn person() -> Detection {
        Detection::from_boxes(vec![BoundingBox {
            x: 4.0,
            y: 4.0,
            width: 10.0,
            height: 12.0,
            confidence: 0.87,
        }])
    }

    /// Replays scripted results and counts calls
    fn scripted(results: Vec<bool>, calls: Arc<AtomicUsize>) -> Box<dyn Detector> {
        let mut script = results.into_iter();
        Box::new(move |_: &VideoFrame| -> Result<Detection, DetectionError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(if script.next().unwrap_or(false) {
                person()
            } else {
                Detection::none()
            })
        })
    }

    #[test]
    fn test_appeared_then_still_present() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut coordinator = DetectionCoordinator::new(
            scripted(vec![false, false, false, true, true], calls.clone()),
            store.clone(),
            DetectionConfig::default(),
        );

        // Three absent invocations, one per window
        for i in 0..3 {
            let at = base() + Duration::seconds(5 * i);
            assert_eq!(coordinator.feed(&frame_at(at, i as u64)), FeedOutcome::Absent);
        }

        // Two present frames inside one window: only the first invokes
        let t = base() + Duration::seconds(15);
        let event = match coordinator.feed(&frame_at(t, 3)) {
            FeedOutcome::Transition(event) => event,
            other => panic!("expected transition, got {:?}", other),
        };
        assert_eq!(coordinator.feed(&frame_at(t + Duration::seconds(1), 4)), FeedOutcome::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        assert_eq!(event.kind, TransitionKind::Appeared);
        assert_eq!(event.scores, vec![0.87]);
        let saved = event.frame_file.clone().unwrap();
        assert!(dir.path().join("detections").join(&saved).exists());

        let log = store.detection_log().unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].contains("Person detected"));

        // Next window: still present, new frame but no new log line
        let outcome = coordinator.feed(&frame_at(t + Duration::seconds(5), 5));
        assert!(matches!(outcome, FeedOutcome::StillPresent { frame_file: Some(_) }));
        assert_eq!(store.detection_log().unwrap().len(), 1);
        assert_eq!(store.list(MediaKind::Detection).unwrap().len(), 2);
        assert!(coordinator.presence().person_detected);
        assert_eq!(coordinator.presence().last_detection_time, Some(t + Duration::seconds(5)));
    }

    #[test]
    fn test_left_transition_logged() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let detector = scripted(vec![true, false], calls);
        let mut coordinator =
            DetectionCoordinator::new(detector, store.clone(), DetectionConfig::default());

        coordinator.feed(&frame_at(base(), 0));
        let outcome = coordinator.feed(&frame_at(base() + Duration::seconds(5), 1));
        let FeedOutcome::Transition(event) = outcome else {
            panic!("expected transition");
        };
        assert_eq!(event.kind, TransitionKind::Left);
        assert!(!coordinator.presence().person_detected);

        let log = store.detection_log().unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[1].contains("Person left"));
        assert_eq!(coordinator.recent_events().count(), 2);
    }

    #[test]
    fn test_detector_error_counts_as_absent_and_advances_timer() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let failing = Box::new(move |_: &VideoFrame| -> Result<Detection, DetectionError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(DetectionError::Inference("boom".into()))
        });
        let mut coordinator =
            DetectionCoordinator::new(failing, store_in(dir.path()), DetectionConfig::default());

        assert_eq!(coordinator.feed(&frame_at(base(), 0)), FeedOutcome::Absent);
        let within_cooldown = frame_at(base() + Duration::seconds(1), 1);
        assert_eq!(coordinator.feed(&within_cooldown), FeedOutcome::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clock_step_back_invokes_and_clamps_log_time() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut coordinator = DetectionCoordinator::new(
            scripted(vec![true, false], calls.clone()),
            store_in(dir.path()),
            DetectionConfig::default(),
        );

        let first = match coordinator.feed(&frame_at(base(), 0)) {
            FeedOutcome::Transition(event) => event,
            other => panic!("expected transition, got {:?}", other),
        };
        let second = match coordinator.feed(&frame_at(base() - Duration::seconds(30), 1)) {
            FeedOutcome::Transition(event) => event,
            other => panic!("expected transition, got {:?}", other),
        };
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(second.timestamp >= first.timestamp);
    }

    proptest! {
        #[test]
        fn prop_at_most_one_invocation_per_cooldown(
            gaps_ms in proptest::collection::vec(0i64..3000, 1..200),
            cooldown in 1u64..10,
        ) {
            let dir = tempfile::tempdir().unwrap();
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = calls.clone();
            let times = Arc::new(std::sync::Mutex::new(Vec::new()));
            let seen = times.clone();
            let detector = Box::new(move |f: &VideoFrame| -> Result<Detection, DetectionError> {
                counter.fetch_add(1, Ordering::SeqCst);
                seen.lock().unwrap().push(f.captured_at);
                Ok(Detection::none())
            });
            let config = DetectionConfig { cooldown_seconds: cooldown, ..Default::default() };
            let mut coordinator = DetectionCoordinator::new(detector, store_in(dir.path()), config);

            let mut t = base();
            for (seq, gap) in gaps_ms.iter().enumerate() {
                t += Duration::milliseconds(*gap);
                coordinator.feed(&frame_at(t, seq as u64));
            }

            let times = times.lock().unwrap();
            prop_assert_eq!(times.len(), calls.load(Ordering::SeqCst));
            for pair in times.windows(2) {
                prop_assert!(pair[1] - pair[0] >= Duration::seconds(cooldown as i64));
            }
            // The first frame always invokes
            prop_assert!(!times.is_empty());
        }
    }
}
