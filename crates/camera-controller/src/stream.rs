//! Live MJPEG stream consumer
//!
//! A per-connection, consumer-paced sequence of JPEG payloads pulled from the
//! controller. While no frame exists yet the consumer waits `idle_wait` and
//! polls again.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::StreamConfig;
use crate::controller::CameraController;

/// Response content type for a stream of [`multipart_chunk`] parts
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Frame one JPEG as a `multipart/x-mixed-replace` part
pub fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    const HEAD: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    const TAIL: &[u8] = b"\r\n\r\n";

    let mut chunk = Vec::with_capacity(HEAD.len() + jpeg.len() + TAIL.len());
    chunk.extend_from_slice(HEAD);
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(TAIL);
    chunk
}

/// Infinite stream of the controller's latest frame
pub struct MjpegStream {
    controller: Arc<CameraController>,
    idle_wait: Duration,
    quality: Option<u8>,
}

impl MjpegStream {
    pub fn new(controller: Arc<CameraController>, config: &StreamConfig) -> Self {
        Self {
            controller,
            idle_wait: config.idle_wait(),
            quality: config.jpeg_quality,
        }
    }

    fn poll(&self) -> Option<Vec<u8>> {
        match self.quality {
            Some(quality) => self.controller.current_jpeg_with_quality(quality),
            None => self.controller.current_jpeg(),
        }
    }

    /// Next JPEG payload, waiting without blocking the runtime
    pub async fn next_frame(&mut self) -> Vec<u8> {
        loop {
            if let Some(jpeg) = self.poll() {
                return jpeg;
            }
            tokio::time::sleep(self.idle_wait).await;
        }
    }

    /// Next payload already framed as a multipart part
    pub async fn next_chunk(&mut self) -> Vec<u8> {
        multipart_chunk(&self.next_frame().await)
    }
}

/// Blocking pull for thread-per-connection consumers
impl Iterator for MjpegStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            if let Some(jpeg) = self.poll() {
                return Some(jpeg);
            }
            thread::sleep(self.idle_wait);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipart_framing() {
        let chunk = multipart_chunk(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let mut expected = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        expected.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xD9]);
        expected.extend_from_slice(b"\r\n\r\n");
        assert_eq!(chunk, expected);
    }

    #[test]
    fn test_content_type_names_boundary() {
        assert!(MULTIPART_CONTENT_TYPE.ends_with("boundary=frame"));
    }
}
