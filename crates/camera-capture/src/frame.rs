//! Video frame types and processing

use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};

use crate::CameraError;

/// Pixel format delivered by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    Mjpeg,
    Yuyv,
}

impl PixelFormat {
    /// V4L2 fourcc code for this format
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            PixelFormat::Rgb24 => *b"RGB3",
            PixelFormat::Mjpeg => *b"MJPG",
            PixelFormat::Yuyv => *b"YUYV",
        }
    }
}

/// Decoded RGB video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Wall-clock capture time
    pub captured_at: DateTime<Local>,
    /// Frame sequence number
    pub sequence: u64,
}

impl VideoFrame {
    /// Create a frame from raw RGB data, rejecting buffers of the wrong size
    pub fn from_rgb(
        data: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: DateTime<Local>,
        sequence: u64,
    ) -> Result<Self, CameraError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(CameraError::Decode(format!(
                "expected {} RGB bytes for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at,
            sequence,
        })
    }

    /// Create a frame from an owned RGB image
    pub fn from_image(image: RgbImage, captured_at: DateTime<Local>, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            captured_at,
            sequence,
        }
    }

    /// Frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    /// Copy the pixels into an owned image for drawing or resizing
    pub fn to_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Encode as baseline JPEG at the given quality (1-100)
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, CameraError> {
        encode_jpeg(&self.data, self.width, self.height, quality)
    }
}

/// Encode packed RGB pixels as JPEG
pub fn encode_jpeg(
    rgb: &[u8],
    width: u32,
    height: u32,
    quality: u8,
) -> Result<Vec<u8>, CameraError> {
    let mut out = Vec::with_capacity(rgb.len() / 8);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder
        .encode(rgb, width, height, ExtendedColorType::Rgb8)
        .map_err(|e| CameraError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decode MJPEG frame to RGB
pub fn decode_mjpeg(
    mjpeg_data: &[u8],
    captured_at: DateTime<Local>,
    sequence: u64,
) -> Result<VideoFrame, CameraError> {
    let img = image::load_from_memory_with_format(mjpeg_data, ImageFormat::Jpeg)
        .map_err(|e| CameraError::Decode(e.to_string()))?;
    Ok(VideoFrame::from_image(img.to_rgb8(), captured_at, sequence))
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 coefficients
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CameraError> {
    let pixels = width as usize * height as usize;
    if yuyv.len() < pixels * 2 {
        return Err(CameraError::Decode(format!(
            "short YUYV buffer: {} bytes for {}x{}",
            yuyv.len(),
            width,
            height
        )));
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in yuyv[..pixels * 2].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push((y + 1.402 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344_136 * u - 0.714_136 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).round().clamp(0.0, 255.0) as u8);
        }
    }
    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> VideoFrame {
        let data = rgb.iter().copied().cycle().take((width * height * 3) as usize).collect();
        VideoFrame::from_rgb(data, width, height, Local::now(), 0).unwrap()
    }

    #[test]
    fn test_rejects_partial_buffer() {
        let result = VideoFrame::from_rgb(vec![0; 10], 4, 4, Local::now(), 0);
        assert!(matches!(result, Err(CameraError::Decode(_))));
    }

    #[test]
    fn test_get_pixel_bounds() {
        let frame = solid(4, 2, [10, 20, 30]);
        assert_eq!(frame.get_pixel(3, 1), Some([10, 20, 30]));
        assert_eq!(frame.get_pixel(4, 0), None);
    }

    #[test]
    fn test_jpeg_encode_is_deterministic() {
        let frame = solid(32, 24, [200, 40, 90]);
        let a = frame.encode_jpeg(70).unwrap();
        let b = frame.encode_jpeg(70).unwrap();
        assert_eq!(a, b);
        assert_eq!(&a[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_mjpeg_decode_restores_dimensions() {
        let frame = solid(16, 8, [0, 128, 255]);
        let jpeg = frame.encode_jpeg(90).unwrap();
        let decoded = decode_mjpeg(&jpeg, frame.captured_at, 7).unwrap();
        assert_eq!(decoded.dimensions(), (16, 8));
        assert_eq!(decoded.sequence, 7);
        assert_eq!(decoded.data.len(), 16 * 8 * 3);
    }

    #[test]
    fn test_yuyv_grey() {
        // Neutral chroma: RGB equals luma
        let yuyv = [100, 128, 200, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_yuyv_short_buffer() {
        assert!(yuyv_to_rgb(&[0; 6], 2, 2).is_err());
    }

    proptest! {
        #[test]
        fn prop_yuyv_yields_full_frame(half_width in 1u32..32, height in 1u32..16, seed: u8) {
            let width = half_width * 2;
            let yuyv: Vec<u8> = (0..width * height * 2)
                .map(|i| (i as u8).wrapping_mul(seed))
                .collect();
            let rgb = yuyv_to_rgb(&yuyv, width, height).unwrap();
            prop_assert!(VideoFrame::from_rgb(rgb, width, height, Local::now(), 0).is_ok());
        }
    }
}
