//! SCRFD face locator via ONNX Runtime.
//!
//! Letterboxes the grayscale frame into the 640×640 model input, decodes the
//! score and box heads of the three anchor strides, and keeps the survivors
//! of non-maximum suppression, best first.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("face model not found: {0}")]
    ModelNotFound(String),
    #[error("face detection failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when fitting a frame into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    new_w: u32,
    new_h: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        Self {
            scale,
            pad_x: (INPUT_SIZE - new_w) as f32 / 2.0,
            pad_y: (INPUT_SIZE - new_h) as f32 / 2.0,
            new_w,
            new_h,
        }
    }

    /// Map a point in model input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score, bbox).
type Head = (usize, usize);

pub struct FaceDetector {
    session: Session,
    heads: [Head; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                names.len()
            )));
        }

        let heads = locate_heads(&names);
        tracing::info!(path = %model_path.display(), outputs = ?names, ?heads, "loaded face detector");

        Ok(Self { session, heads })
    }

    /// Locate faces in a grayscale frame, highest confidence first.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = preprocess(frame, width, height)?;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx)) in STRIDES.iter().zip(self.heads.iter()) {
            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, boxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("boxes stride {stride}: {e}"))
            })?;
            candidates.extend(decode_stride(scores, boxes, stride, &letterbox, SCORE_THRESHOLD));
        }

        Ok(nms(candidates, NMS_IOU_THRESHOLD))
    }
}

/// Letterbox a grayscale frame into a normalized 1×3×640×640 tensor.
fn preprocess(frame: &[u8], width: u32, height: u32) -> Result<(Array4<f32>, Letterbox), DetectorError> {
    let pixels = (width as usize) * (height as usize);
    if pixels == 0 || frame.len() < pixels {
        return Err(DetectorError::InferenceFailed(format!(
            "frame buffer too short: {width}x{height} needs {pixels} bytes, got {}",
            frame.len()
        )));
    }
    let gray = GrayImage::from_raw(width, height, frame[..pixels].to_vec()).ok_or_else(|| {
        DetectorError::InferenceFailed("frame buffer does not match dimensions".into())
    })?;

    let letterbox = Letterbox::fit(width, height);
    let resized = imageops::resize(&gray, letterbox.new_w, letterbox.new_h, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    // Padding normalizes to 0.0.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let x0 = letterbox.pad_x.floor() as usize;
    let y0 = letterbox.pad_y.floor() as usize;

    for (x, y, px) in resized.enumerate_pixels() {
        let v = (px.0[0] as f32 - PIXEL_MEAN) / PIXEL_STD;
        let (tx, ty) = (x0 + x as usize, y0 + y as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = v;
        }
    }

    Ok((tensor, letterbox))
}

/// Map each stride to its (score, bbox) output tensors.
///
/// Uses `score_<stride>` / `bbox_<stride>` names when the export has them,
/// otherwise the usual positional layout: scores at 0–2, boxes at 3–5.
fn locate_heads(names: &[String]) -> [Head; 3] {
    let find = |prefix: &str, stride: usize| {
        let want = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == want)
    };

    let named: Option<Vec<Head>> = STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?)))
        .collect();

    match named {
        Some(h) => [h[0], h[1], h[2]],
        None => [(0, 3), (1, 4), (2, 5)],
    }
}

/// Decode one stride's anchor grid into frame-space boxes above `threshold`.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid_w = INPUT_SIZE as usize / stride;
    let grid_h = INPUT_SIZE as usize / stride;
    let anchors = grid_w * grid_h * ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= threshold {
                return None;
            }
            let off = boxes.get(idx * 4..idx * 4 + 4)?;

            let cell = idx / ANCHORS_PER_CELL;
            let cx = (cell % grid_w) as f32 * s;
            let cy = (cell / grid_w) as f32 * s;

            let (x1, y1) = letterbox.unmap(cx - off[0] * s, cy - off[1] * s);
            let (x2, y2) = letterbox.unmap(cx + off[2] * s, cy + off[3] * s);
            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; result is sorted by confidence.
fn nms(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = w * h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
