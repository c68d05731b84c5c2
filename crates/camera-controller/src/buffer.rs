//! Shared frame buffer
//!
//! A single mutex guards the whole status snapshot. Critical sections are
//! plain assignments and clones; frames are shared by `Arc`, so no pixel
//! copy or encoding ever happens under the lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camera_capture::VideoFrame;
use chrono::{DateTime, Local};
use presence::PresenceSnapshot;
use serde::Serialize;

/// Snapshot of everything other threads may observe
#[derive(Debug, Clone, Default, Serialize)]
pub struct CameraStatus {
    #[serde(skip)]
    pub frame: Option<Arc<VideoFrame>>,
    pub is_recording: bool,
    pub recording_file: Option<String>,
    pub person_detected: bool,
    pub last_detection_time: Option<DateTime<Local>>,
    pub frames_captured: u64,
}

impl CameraStatus {
    /// Capture time of the latest frame
    pub fn frame_time(&self) -> Option<DateTime<Local>> {
        self.frame.as_ref().map(|f| f.captured_at)
    }
}

/// Latest frame plus recording and presence status
#[derive(Debug, Default)]
pub struct SharedFrameBuffer {
    inner: Mutex<CameraStatus>,
}

impl SharedFrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CameraStatus> {
        // Every writer leaves the snapshot whole, so a poisoned guard is still valid
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the current frame
    pub fn write(&self, frame: Arc<VideoFrame>) {
        let mut status = self.lock();
        status.frame = Some(frame);
        status.frames_captured += 1;
    }

    /// Replace the frame and presence fields in one critical section
    pub fn publish(&self, frame: Arc<VideoFrame>, presence: Option<PresenceSnapshot>) {
        let mut status = self.lock();
        status.frame = Some(frame);
        status.frames_captured += 1;
        if let Some(presence) = presence {
            status.person_detected = presence.person_detected;
            status.last_detection_time = presence.last_detection_time;
        }
    }

    /// Most recent frame, or `None` before the first capture
    pub fn read_frame(&self) -> Option<Arc<VideoFrame>> {
        self.lock().frame.clone()
    }

    /// Mutate status fields atomically. `f` must not block.
    pub fn update_status<F>(&self, f: F)
    where
        F: FnOnce(&mut CameraStatus),
    {
        f(&mut *self.lock());
    }

    pub fn read_status(&self) -> CameraStatus {
        self.lock().clone()
    }
}
