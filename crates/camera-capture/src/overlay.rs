//! Timestamp overlay burned into captured frames

use std::fs;
use std::path::PathBuf;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::frame::VideoFrame;
use crate::CameraError;

/// Format used for the burned-in timestamp
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Monospace font shipped by most Debian-based images
pub const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf";

/// Overlay font, placement and style
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// TrueType or OpenType font file
    pub font_path: PathBuf,
    /// Left edge of the text (pixels)
    pub x: i32,
    /// Top edge of the text (pixels)
    pub y: i32,
    /// Text height (pixels)
    pub scale: f32,
    pub color: [u8; 3],
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            font_path: PathBuf::from(DEFAULT_FONT_PATH),
            x: 10,
            y: 10,
            scale: 20.0,
            color: [0, 255, 0],
        }
    }
}

/// Text renderer for the capture timestamp
pub struct TimestampOverlay {
    font: FontVec,
    x: i32,
    y: i32,
    scale: PxScale,
    color: Rgb<u8>,
}

impl TimestampOverlay {
    /// Read the configured font from disk
    pub fn load(config: &OverlayConfig) -> Result<Self, CameraError> {
        let path = &config.font_path;
        let bytes = fs::read(path)
            .map_err(|e| CameraError::Font(format!("{}: {}", path.display(), e)))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| CameraError::Font(format!("{}: {}", path.display(), e)))?;

        info!("Overlay font loaded from {}", path.display());
        Ok(Self {
            font,
            x: config.x,
            y: config.y,
            scale: PxScale::from(config.scale.max(1.0)),
            color: Rgb(config.color),
        })
    }

    /// Draw `text` at the configured position, clipped to the image
    pub fn draw(&self, image: &mut RgbImage, text: &str) {
        draw_text_mut(image, self.color, self.x, self.y, self.scale, &self.font, text);
    }

    /// Width and height in pixels `text` occupies
    pub fn text_size(&self, text: &str) -> (u32, u32) {
        text_size(self.scale, &self.font, text)
    }

    /// Burn the frame's capture time into its pixels
    pub fn stamp(&self, frame: &mut VideoFrame) {
        let text = frame.captured_at.format(TIMESTAMP_FORMAT).to_string();
        let Some(mut image) = frame.to_image() else {
            return;
        };
        self.draw(&mut image, &text);
        frame.data = image.into_raw();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use std::path::Path;

    fn black_frame(width: u32, height: u32) -> VideoFrame {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        VideoFrame::from_rgb(vec![0; (width * height * 3) as usize], width, height, at, 1).unwrap()
    }

    /// Default overlay, or `None` on hosts without the system font
    fn default_overlay() -> Option<TimestampOverlay> {
        let config = OverlayConfig::default();
        if !Path::new(&config.font_path).exists() {
            eprintln!("font {} not installed, skipping", config.font_path.display());
            return None;
        }
        Some(TimestampOverlay::load(&config).unwrap())
    }

    #[test]
    fn test_stamp_draws_inside_text_band() {
        let Some(overlay) = default_overlay() else {
            return;
        };
        let mut frame = black_frame(320, 60);
        overlay.stamp(&mut frame);

        let config = OverlayConfig::default();
        let (width, _) = overlay.text_size("2024-03-09 14:05:07");
        let top = config.y as u32;
        let bottom = top + (config.scale * 1.25).ceil() as u32;

        let mut lit = 0;
        for y in 0..frame.height {
            for x in 0..frame.width {
                let [r, g, b] = frame.get_pixel(x, y).unwrap();
                if g > 0 {
                    lit += 1;
                    assert_eq!((r, b), (0, 0), "overlay colour leaked at ({}, {})", x, y);
                    assert!(y >= top && y < bottom, "row {} outside text band", y);
                    assert!(x >= config.x as u32 && x <= config.x as u32 + width + 1);
                }
            }
        }
        assert!(lit > 0);
    }

    #[test]
    fn test_stamp_clips_on_tiny_frame() {
        let Some(overlay) = default_overlay() else {
            return;
        };
        let mut frame = black_frame(8, 8);
        overlay.stamp(&mut frame);
        assert_eq!(frame.data.len(), 8 * 8 * 3);
    }

    #[test]
    fn test_longer_text_is_wider() {
        let Some(overlay) = default_overlay() else {
            return;
        };
        let (short, _) = overlay.text_size("14:05");
        let (long, _) = overlay.text_size("2024-03-09 14:05:07");
        assert!(long > short);
    }

    #[test]
    fn test_missing_font_is_reported() {
        let config = OverlayConfig {
            font_path: PathBuf::from("/nonexistent/font.ttf"),
            ..Default::default()
        };
        assert!(matches!(
            TimestampOverlay::load(&config),
            Err(CameraError::Font(msg)) if msg.contains("/nonexistent/font.ttf")
        ));
    }

    #[test]
    fn test_garbage_font_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ttf");
        fs::write(&path, b"not a font").unwrap();
        let config = OverlayConfig {
            font_path: path,
            ..Default::default()
        };
        assert!(matches!(TimestampOverlay::load(&config), Err(CameraError::Font(_))));
    }
}
