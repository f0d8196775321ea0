//! emotrig-core: emotion classification and target-sequence tracking.
//!
//! Uses SCRFD to locate a face and a 7-class expression model to label it,
//! both via ONNX Runtime. The sequence tracker and signal map turn those
//! labels into single-byte signals for a microcontroller.

pub mod classifier;
pub mod detector;
pub mod session;
pub mod signal;
pub mod tracker;
pub mod types;

pub use classifier::{
    ClassifierError, EmotionClassifier, FaceEmotionClassifier, InputLayout, NoFacePolicy,
};
pub use session::Session;
pub use signal::{SignalEmitter, SignalError, SignalMap};
pub use tracker::{Advance, SequenceError, SequenceTracker, TargetSequence};
pub use types::{BoundingBox, DetectionResult, Emotion, Region, UnknownLabel, NO_EMOTION};
