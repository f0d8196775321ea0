//! Dominant-emotion classification of a grayscale frame.
//!
//! [`FaceEmotionClassifier`] locates the most confident face with the SCRFD
//! detector, crops it to 48×48 and runs the 7-class expression model on it.

use crate::detector::{DetectorError, FaceDetector};
use crate::types::{BoundingBox, DetectionResult, Emotion, Region};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

const FACE_SIZE: u32 = 48;
const NUM_CLASSES: usize = Emotion::ALL.len();

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("expression model not found: {0}")]
    ModelNotFound(String),
    #[error("expression inference failed: {0}")]
    InferenceFailed(String),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Classifies one frame into a dominant emotion and face region.
pub trait EmotionClassifier {
    fn classify(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<DetectionResult, ClassifierError>;
}

/// Tensor layout expected by the expression model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputLayout {
    /// 1×48×48×1, as exported from Keras.
    #[default]
    Nhwc,
    /// 1×1×48×48.
    Nchw,
}

impl FromStr for InputLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nhwc" => Ok(Self::Nhwc),
            "nchw" => Ok(Self::Nchw),
            other => Err(format!("unknown input layout {other:?} (expected nhwc or nchw)")),
        }
    }
}

/// What to report when the detector finds no face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NoFacePolicy {
    /// Report the `none` label over the full frame.
    #[default]
    #[serde(rename = "none")]
    ReportNone,
    /// Classify the whole frame as if it were the face.
    #[serde(rename = "whole-frame")]
    WholeFrame,
}

impl FromStr for NoFacePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::ReportNone),
            "whole-frame" | "whole_frame" => Ok(Self::WholeFrame),
            other => Err(format!(
                "unknown no-face policy {other:?} (expected none or whole-frame)"
            )),
        }
    }
}

/// 7-class facial expression model (48×48 grayscale input).
pub struct ExpressionModel {
    session: Session,
    layout: InputLayout,
}

impl ExpressionModel {
    pub fn load(model_path: &Path, layout: InputLayout) -> Result<Self, ClassifierError> {
        if !model_path.exists() {
            return Err(ClassifierError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            ?layout,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded expression model"
        );

        Ok(Self { session, layout })
    }

    /// Score a normalized 48×48 face patch.
    pub fn predict(&mut self, patch: &[f32]) -> Result<(Emotion, f32), ClassifierError> {
        let side = FACE_SIZE as usize;
        let shape = match self.layout {
            InputLayout::Nhwc => (1, side, side, 1),
            InputLayout::Nchw => (1, 1, side, side),
        };
        let input = Array4::from_shape_vec(shape, patch.to_vec())
            .map_err(|e| ClassifierError::InferenceFailed(format!("input shape: {e}")))?;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("scores: {e}")))?;

        if scores.len() < NUM_CLASSES {
            return Err(ClassifierError::InferenceFailed(format!(
                "expected {NUM_CLASSES} class scores, got {}",
                scores.len()
            )));
        }
        dominant(&scores[..NUM_CLASSES])
            .ok_or_else(|| ClassifierError::InferenceFailed("no finite class score".into()))
    }
}

/// Face detector and expression model combined.
pub struct FaceEmotionClassifier {
    detector: FaceDetector,
    model: ExpressionModel,
    policy: NoFacePolicy,
}

impl FaceEmotionClassifier {
    pub fn new(detector: FaceDetector, model: ExpressionModel, policy: NoFacePolicy) -> Self {
        Self {
            detector,
            model,
            policy,
        }
    }

    pub fn load(
        detector_path: &Path,
        model_path: &Path,
        layout: InputLayout,
        policy: NoFacePolicy,
    ) -> Result<Self, ClassifierError> {
        let detector = FaceDetector::load(detector_path)?;
        let model = ExpressionModel::load(model_path, layout)?;
        Ok(Self::new(detector, model, policy))
    }
}

impl EmotionClassifier for FaceEmotionClassifier {
    fn classify(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<DetectionResult, ClassifierError> {
        let faces = self.detector.detect(frame, width, height)?;

        let Some((region, face_found)) = pick_region(&faces, width, height, self.policy) else {
            tracing::debug!("no face in frame");
            return Ok(DetectionResult::no_face(width, height));
        };

        let patch = face_patch(frame, width, height, region).ok_or_else(|| {
            ClassifierError::InferenceFailed(format!("cannot crop {region:?} from {width}x{height} frame"))
        })?;
        let (emotion, confidence) = self.model.predict(&patch)?;

        tracing::debug!(%emotion, confidence, ?region, face_found, "classified frame");
        Ok(DetectionResult {
            emotion: Some(emotion),
            confidence,
            region,
            face_found,
        })
    }
}

/// Region to classify: the first (best) face, or the whole frame under
/// [`NoFacePolicy::WholeFrame`]. The flag tells whether a face was found.
pub fn pick_region(
    faces: &[BoundingBox],
    width: u32,
    height: u32,
    policy: NoFacePolicy,
) -> Option<(Region, bool)> {
    if let Some(region) = faces.first().and_then(|f| Region::from_bbox(f, width, height)) {
        return Some((region, true));
    }
    match policy {
        NoFacePolicy::ReportNone => None,
        NoFacePolicy::WholeFrame if width > 0 && height > 0 => {
            Some((Region::full(width, height), false))
        }
        NoFacePolicy::WholeFrame => None,
    }
}

/// Crop `region`, resize to 48×48 and scale pixels to `[0, 1]`.
pub fn face_patch(frame: &[u8], width: u32, height: u32, region: Region) -> Option<Vec<f32>> {
    let pixels = (width as usize) * (height as usize);
    if region.width == 0
        || region.height == 0
        || region.x + region.width > width
        || region.y + region.height > height
    {
        return None;
    }
    let gray = GrayImage::from_raw(width, height, frame.get(..pixels)?.to_vec())?;
    let crop = imageops::crop_imm(&gray, region.x, region.y, region.width, region.height).to_image();
    let face = imageops::resize(&crop, FACE_SIZE, FACE_SIZE, FilterType::Triangle);
    Some(face.pixels().map(|p| p.0[0] as f32 / 255.0).collect())
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.iter().map(|&e| e / sum).collect()
}

/// Highest-scoring class and its probability.
///
/// Scores that already form a probability distribution are used as-is;
/// anything else is treated as logits.
pub fn dominant(scores: &[f32]) -> Option<(Emotion, f32)> {
    if scores.is_empty() || scores.iter().any(|s| !s.is_finite()) {
        return None;
    }
    let sum: f32 = scores.iter().sum();
    let probs = if scores.iter().all(|&s| s >= 0.0) && (sum - 1.0).abs() < 1e-3 {
        scores.to_vec()
    } else {
        softmax(scores)
    };

    let (idx, p) = probs
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))?;
    Some((Emotion::from_index(idx)?, *p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, size: f32, confidence: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: size,
            height: size,
            confidence,
        }
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }

    #[test]
    fn test_dominant_from_probabilities() {
        let scores = [0.01, 0.01, 0.02, 0.80, 0.10, 0.03, 0.03];
        let (emotion, p) = dominant(&scores).unwrap();
        assert_eq!(emotion, Emotion::Happy);
        assert!((p - 0.80).abs() < 1e-6);
    }

    #[test]
    fn test_dominant_from_logits() {
        let scores = [-1.0, 0.0, 0.5, 1.0, 4.0, 0.0, 2.0];
        let (emotion, p) = dominant(&scores).unwrap();
        assert_eq!(emotion, Emotion::Sad);
        assert!(p > 0.5 && p < 1.0);
    }

    #[test]
    fn test_dominant_rejects_nan_and_empty() {
        assert!(dominant(&[]).is_none());
        assert!(dominant(&[0.5, f32::NAN, 0.5]).is_none());
    }

    #[test]
    fn test_pick_region_prefers_first_face() {
        let faces = [face(10.0, 10.0, 20.0, 0.9), face(50.0, 50.0, 20.0, 0.6)];
        let (region, found) = pick_region(&faces, 100, 100, NoFacePolicy::ReportNone).unwrap();
        assert!(found);
        assert_eq!(region, Region { x: 10, y: 10, width: 20, height: 20 });
    }

    #[test]
    fn test_pick_region_no_face_policies() {
        assert!(pick_region(&[], 64, 48, NoFacePolicy::ReportNone).is_none());
        assert_eq!(
            pick_region(&[], 64, 48, NoFacePolicy::WholeFrame),
            Some((Region::full(64, 48), false))
        );
        // A box entirely outside the frame counts as no face.
        let outside = [face(500.0, 500.0, 10.0, 0.9)];
        assert!(pick_region(&outside, 64, 48, NoFacePolicy::ReportNone).is_none());
    }

    #[test]
    fn test_face_patch_shape_and_range() {
        let (w, h) = (80u32, 60u32);
        let frame: Vec<u8> = (0..w * h).map(|i| (i % 256) as u8).collect();
        let patch = face_patch(&frame, w, h, Region { x: 10, y: 5, width: 40, height: 40 }).unwrap();
        assert_eq!(patch.len(), 48 * 48);
        assert!(patch.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_face_patch_uniform_crop() {
        let frame = vec![51u8; 32 * 32];
        let patch = face_patch(&frame, 32, 32, Region::full(32, 32)).unwrap();
        assert!(patch.iter().all(|&v| (v - 0.2).abs() < 1e-3));
    }

    #[test]
    fn test_face_patch_rejects_bad_region() {
        let frame = vec![0u8; 32 * 32];
        assert!(face_patch(&frame, 32, 32, Region { x: 20, y: 0, width: 20, height: 10 }).is_none());
        assert!(face_patch(&frame, 32, 32, Region { x: 0, y: 0, width: 0, height: 10 }).is_none());
        assert!(face_patch(&frame[..100], 32, 32, Region::full(32, 32)).is_none());
    }

    #[test]
    fn test_policy_and_layout_parse() {
        assert_eq!("whole-frame".parse::<NoFacePolicy>(), Ok(NoFacePolicy::WholeFrame));
        assert_eq!("none".parse::<NoFacePolicy>(), Ok(NoFacePolicy::ReportNone));
        assert!("maybe".parse::<NoFacePolicy>().is_err());
        assert_eq!("NCHW".parse::<InputLayout>(), Ok(InputLayout::Nchw));
        assert!("hwc".parse::<InputLayout>().is_err());
    }
}
