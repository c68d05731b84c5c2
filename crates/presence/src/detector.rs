//! ONNX person detector
//!
//! Runs a YOLO-style model (class 0 = person) through tract. The model sees
//! the frame resized to a square input; boxes are mapped back to frame pixels.

use camera_capture::VideoFrame;
use image::imageops::{self, FilterType};
use tracing::{debug, info, warn};
use tract_onnx::prelude::*;

use crate::{BoundingBox, Detection, DetectionConfig, DetectionError, Detector};

/// Attributes per candidate before the class scores: cx, cy, w, h
const BOX_ATTRS: usize = 4;
const PERSON_CLASS: usize = 0;

type OnnxPlan = TypedRunnableModel<TypedModel>;

/// Person detector backed by an ONNX model
pub struct OnnxPersonDetector {
    model: OnnxPlan,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl OnnxPersonDetector {
    /// Load the configured model. Returns `Ok(None)` when no model path is set.
    pub fn from_config(config: &DetectionConfig) -> Result<Option<Self>, DetectionError> {
        match &config.model_path {
            Some(path) => Self::load(path, config).map(Some),
            None => {
                warn!("No person model path configured. Presence detection disabled.");
                Ok(None)
            }
        }
    }

    pub fn load(path: &str, config: &DetectionConfig) -> Result<Self, DetectionError> {
        info!("Loading person detection model from {}", path);
        let side = config.input_size.max(32) as usize;

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|m| m.with_input_fact(0, f32::fact([1, 3, side, side]).into()))
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(|e| DetectionError::ModelLoad(format!("{}: {}", path, e)))?;

        Ok(Self {
            model,
            input_size: side as u32,
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
        })
    }

    fn preprocess(&self, frame: &VideoFrame) -> Result<Tensor, DetectionError> {
        let image = frame
            .to_image()
            .ok_or_else(|| DetectionError::ImageProcessing("frame buffer size mismatch".into()))?;
        let side = self.input_size;
        let resized = imageops::resize(&image, side, side, FilterType::Triangle);

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, side as usize, side as usize),
            |(_, c, y, x)| resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0,
        );
        Ok(input.into())
    }
}

impl Detector for OnnxPersonDetector {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Detection, DetectionError> {
        let input = self.preprocess(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        let output = outputs
            .first()
            .ok_or_else(|| DetectionError::OutputShape("model produced no outputs".into()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| DetectionError::OutputShape(e.to_string()))?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .map_err(|e| DetectionError::OutputShape(e.to_string()))?;

        // [1, attrs, candidates]; some exports are transposed
        let predictions = view.index_axis(tract_ndarray::Axis(0), 0);
        let predictions = if predictions.shape()[0] > predictions.shape()[1] {
            predictions.reversed_axes()
        } else {
            predictions
        };

        let scale_x = frame.width as f32 / self.input_size as f32;
        let scale_y = frame.height as f32 / self.input_size as f32;
        let candidates =
            decode_person_boxes(predictions, scale_x, scale_y, self.confidence_threshold)?;
        let boxes = non_max_suppression(candidates, self.iou_threshold);
        debug!("Person detector: {} boxes", boxes.len());

        Ok(Detection::from_boxes(boxes))
    }
}

/// Decode `[attrs, candidates]` YOLO predictions into person boxes above `threshold`.
pub fn decode_person_boxes(
    predictions: tract_ndarray::ArrayView2<f32>,
    scale_x: f32,
    scale_y: f32,
    threshold: f32,
) -> Result<Vec<BoundingBox>, DetectionError> {
    let attrs = predictions.shape()[0];
    if attrs <= BOX_ATTRS + PERSON_CLASS {
        return Err(DetectionError::OutputShape(format!(
            "expected at least {} attributes per candidate, got {}",
            BOX_ATTRS + PERSON_CLASS + 1,
            attrs
        )));
    }

    let mut boxes = Vec::new();
    for candidate in predictions.columns() {
        let score = candidate[BOX_ATTRS + PERSON_CLASS];
        if score < threshold {
            continue;
        }
        let (cx, cy, w, h) = (candidate[0], candidate[1], candidate[2], candidate[3]);
        boxes.push(BoundingBox {
            x: (cx - w / 2.0) * scale_x,
            y: (cy - h / 2.0) * scale_y,
            width: w * scale_x,
            height: h * scale_y,
            confidence: score,
        });
    }
    Ok(boxes)
}

/// Greedy NMS, highest confidence first
pub fn non_max_suppression(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
