use emotrig_core::{InputLayout, NoFacePolicy, SequenceError, SignalError, SignalMap, TargetSequence};
use emotrig_hw::serial::baud_constant;
use emotrig_hw::Camera;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Env {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid targets: {0}")]
    Targets(#[from] SequenceError),
    #[error("invalid signals: {0}")]
    Signals(#[from] SignalError),
    #[error("{0}")]
    Invalid(String),
}

/// Runtime configuration.
///
/// Built-in defaults, overridden by an optional TOML file, overridden by
/// `EMOTRIG_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// System camera index (`/dev/video<N>`).
    pub camera_index: u32,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Frames discarded after opening the camera (auto exposure settling).
    pub warmup_frames: usize,
    pub serial_port: String,
    pub baud_rate: u32,
    /// Emotions to observe, in order.
    pub targets: Vec<String>,
    pub model_dir: PathBuf,
    /// SCRFD face detector file, relative to `model_dir`.
    pub detector_model: String,
    /// 7-class expression model file, relative to `model_dir`.
    pub emotion_model: String,
    pub emotion_input_layout: InputLayout,
    pub no_face_policy: NoFacePolicy,
    pub quit_key: char,
    /// Annotated PNG preview written during the run, if set.
    pub preview_path: Option<PathBuf>,
    pub preview_every: u64,
    /// Label → single ASCII character sent when that target is matched.
    pub signals: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_index: 0,
            camera_width: 640,
            camera_height: 480,
            warmup_frames: 4,
            serial_port: "/dev/ttyACM0".to_string(),
            baud_rate: 9600,
            targets: vec!["happy".to_string(), "sad".to_string()],
            model_dir: PathBuf::from("models"),
            detector_model: "det_10g.onnx".to_string(),
            emotion_model: "emotion.onnx".to_string(),
            emotion_input_layout: InputLayout::default(),
            no_face_policy: NoFacePolicy::default(),
            quit_key: 'q',
            preview_path: None,
            preview_every: 15,
            signals: BTreeMap::from([
                ("happy".to_string(), "H".to_string()),
                ("sad".to_string(), "S".to_string()),
            ]),
        }
    }
}

impl Config {
    /// Load defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|source| ConfigError::Read {
                    path: p.display().to_string(),
                    source,
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `EMOTRIG_*` overrides read through `get`.
    pub fn apply_env<F>(&mut self, get: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parsed(&get, "EMOTRIG_CAMERA_INDEX")? {
            self.camera_index = v;
        }
        if let Some(v) = parsed(&get, "EMOTRIG_CAMERA_WIDTH")? {
            self.camera_width = v;
        }
        if let Some(v) = parsed(&get, "EMOTRIG_CAMERA_HEIGHT")? {
            self.camera_height = v;
        }
        if let Some(v) = parsed(&get, "EMOTRIG_WARMUP_FRAMES")? {
            self.warmup_frames = v;
        }
        if let Some(v) = get("EMOTRIG_SERIAL_PORT") {
            self.serial_port = v;
        }
        if let Some(v) = parsed(&get, "EMOTRIG_BAUD_RATE")? {
            self.baud_rate = v;
        }
        if let Some(v) = get("EMOTRIG_TARGETS") {
            self.targets = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = get("EMOTRIG_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = parsed(&get, "EMOTRIG_EMOTION_LAYOUT")? {
            self.emotion_input_layout = v;
        }
        if let Some(v) = parsed(&get, "EMOTRIG_NO_FACE_POLICY")? {
            self.no_face_policy = v;
        }
        if let Some(v) = parsed(&get, "EMOTRIG_QUIT_KEY")? {
            self.quit_key = v;
        }
        if let Some(v) = get("EMOTRIG_PREVIEW_PATH") {
            self.preview_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = parsed(&get, "EMOTRIG_PREVIEW_EVERY")? {
            self.preview_every = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.target_sequence()?;
        self.signal_map()?;
        if baud_constant(self.baud_rate).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unsupported baud rate {}",
                self.baud_rate
            )));
        }
        if !self.quit_key.is_ascii() {
            return Err(ConfigError::Invalid(format!(
                "quit key must be an ASCII character, got {:?}",
                self.quit_key
            )));
        }
        if self.camera_width == 0 || self.camera_height == 0 {
            return Err(ConfigError::Invalid("camera resolution must be non-zero".into()));
        }
        if self.preview_every == 0 {
            return Err(ConfigError::Invalid("preview_every must be at least 1".into()));
        }
        Ok(())
    }

    pub fn target_sequence(&self) -> Result<TargetSequence, ConfigError> {
        Ok(TargetSequence::parse(&self.targets)?)
    }

    pub fn signal_map(&self) -> Result<SignalMap, ConfigError> {
        Ok(SignalMap::from_pairs(&self.signals)?)
    }

    pub fn camera_device(&self) -> String {
        Camera::path_for_index(self.camera_index)
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn emotion_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.emotion_model)
    }

    /// Quit key as the byte read from the terminal.
    pub fn quit_byte(&self) -> u8 {
        self.quit_key as u8
    }
}

fn parsed<T, F>(get: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = get(key) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::Env {
            key,
            value,
            reason: e.to_string(),
        })
}
