use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Label reported for a frame in which no face was located.
pub const NO_EMOTION: &str = "none";

/// Expression classes, in the order the expression model emits its scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl Emotion {
    /// All classes in model output order.
    pub const ALL: [Emotion; 7] = [
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Surprise,
        Emotion::Neutral,
    ];

    /// Map a model output index to its class.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown emotion label: {0:?}")]
pub struct UnknownLabel(pub String);

impl FromStr for Emotion {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownLabel(s.to_string()))
    }
}

/// Face bounding box from the detector, in frame pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Integer face region, always inside the frame it was computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// The whole frame.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Clamp a detector box to the frame bounds.
    ///
    /// Returns `None` when nothing of the box remains inside the frame.
    pub fn from_bbox(bbox: &BoundingBox, frame_width: u32, frame_height: u32) -> Option<Self> {
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let x1 = bbox.x.clamp(0.0, fw);
        let y1 = bbox.y.clamp(0.0, fh);
        let x2 = (bbox.x + bbox.width).clamp(0.0, fw);
        let y2 = (bbox.y + bbox.height).clamp(0.0, fh);

        let x = x1.floor() as u32;
        let y = y1.floor() as u32;
        let width = (x2.ceil() as u32).saturating_sub(x);
        let height = (y2.ceil() as u32).saturating_sub(y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            x,
            y,
            width,
            height,
        })
    }
}

/// Per-frame classifier output.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    /// Dominant emotion, or `None` when no face was classified.
    pub emotion: Option<Emotion>,
    /// Probability of the dominant emotion (0.0–1.0).
    pub confidence: f32,
    pub region: Region,
    /// Whether `region` came from the face detector rather than a fallback.
    pub face_found: bool,
}

impl DetectionResult {
    /// Deterministic result for a frame with no locatable face.
    pub fn no_face(width: u32, height: u32) -> Self {
        Self {
            emotion: None,
            confidence: 0.0,
            region: Region::full(width, height),
            face_found: false,
        }
    }

    /// Label string as compared against the target sequence.
    pub fn label(&self) -> &'static str {
        self.emotion.map_or(NO_EMOTION, Emotion::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_emotion_parse_and_display() {
        assert_eq!("happy".parse::<Emotion>(), Ok(Emotion::Happy));
        assert_eq!(" Sad ".parse::<Emotion>(), Ok(Emotion::Sad));
        assert_eq!(Emotion::Surprise.to_string(), "surprise");
        assert!("none".parse::<Emotion>().is_err());
        assert!("".parse::<Emotion>().is_err());
    }

    #[test]
    fn test_emotion_index_order() {
        assert_eq!(Emotion::from_index(0), Some(Emotion::Angry));
        assert_eq!(Emotion::from_index(3), Some(Emotion::Happy));
        assert_eq!(Emotion::from_index(4), Some(Emotion::Sad));
        assert_eq!(Emotion::from_index(6), Some(Emotion::Neutral));
        assert_eq!(Emotion::from_index(7), None);
    }

    #[test]
    fn test_region_inside_frame() {
        let r = Region::from_bbox(&bbox(10.2, 20.7, 30.0, 40.0), 640, 480).unwrap();
        assert_eq!(r, Region { x: 10, y: 20, width: 31, height: 41 });
    }

    #[test]
    fn test_region_clamped_to_frame() {
        let r = Region::from_bbox(&bbox(-15.0, -5.0, 50.0, 50.0), 40, 30).unwrap();
        assert_eq!(r, Region { x: 0, y: 0, width: 35, height: 30 });
    }

    #[test]
    fn test_region_outside_frame() {
        assert!(Region::from_bbox(&bbox(700.0, 10.0, 20.0, 20.0), 640, 480).is_none());
        assert!(Region::from_bbox(&bbox(10.0, 10.0, 0.0, 20.0), 640, 480).is_none());
    }

    #[test]
    fn test_no_face_label() {
        let d = DetectionResult::no_face(64, 48);
        assert_eq!(d.label(), NO_EMOTION);
        assert_eq!(d.region, Region::full(64, 48));
        assert!(!d.face_found);
    }
}
