//! Bounding box annotation of detection frames

use camera_capture::VideoFrame;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::{BoundingBox, DetectionError};

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: i32 = 2;

/// Copy of the frame with each box outlined
pub fn annotate(frame: &VideoFrame, boxes: &[BoundingBox]) -> Result<RgbImage, DetectionError> {
    let mut image = frame
        .to_image()
        .ok_or_else(|| DetectionError::ImageProcessing("frame buffer size mismatch".into()))?;
    for bbox in boxes {
        draw_box(&mut image, bbox);
    }
    Ok(image)
}

fn draw_box(image: &mut RgbImage, bbox: &BoundingBox) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let x0 = bbox.x.clamp(0.0, w - 1.0);
    let y0 = bbox.y.clamp(0.0, h - 1.0);
    let x1 = (bbox.x + bbox.width).clamp(0.0, w - 1.0);
    let y1 = (bbox.y + bbox.height).clamp(0.0, h - 1.0);

    for inset in 0..BOX_THICKNESS {
        let width = (x1 - x0) as i32 - 2 * inset;
        let height = (y1 - y0) as i32 - 2 * inset;
        if width < 1 || height < 1 {
            break;
        }
        let rect = Rect::at(x0 as i32 + inset, y0 as i32 + inset)
            .of_size(width as u32, height as u32);
        draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }
}
