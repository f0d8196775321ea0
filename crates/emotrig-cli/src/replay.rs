//! Frame source over a directory of still images, in file-name order.

use crate::pipeline::{FrameSource, SourceError};
use emotrig_hw::Frame;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

const EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

pub struct ImageDirSource {
    pending: VecDeque<PathBuf>,
    sequence: u32,
}

impl ImageDirSource {
    pub fn open(dir: &Path) -> std::io::Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image(p))
            .collect();
        paths.sort();

        tracing::info!(dir = %dir.display(), images = paths.len(), "replay source opened");
        Ok(Self {
            pending: paths.into(),
            sequence: 0,
        })
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        let image = image::open(&path).map_err(|source| SourceError::Image {
            path: path.display().to_string(),
            source,
        })?;

        self.sequence += 1;
        tracing::debug!(path = %path.display(), seq = self.sequence, "replay frame");
        Ok(Some(Frame::from_luma(image.to_luma8(), self.sequence)))
    }
}
