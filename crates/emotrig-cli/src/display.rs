//! Terminal display: a status line per frame, an optional annotated PNG
//! preview, and the quit key.

use crate::pipeline::{DisplayControl, DisplayError, DisplaySink, Progress};
use ab_glyph::{FontRef, InvalidFont, PxScale};
use emotrig_core::{DetectionResult, Region};
use emotrig_hw::{Frame, RawTerminal};
use image::{GrayImage, ImageFormat, Luma};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

const FONT_DATA: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

const KEY_POLL: Duration = Duration::from_millis(1);
const OVERLAY_VALUE: u8 = 255;
/// Face box thickness, in pixels.
const OUTLINE: u32 = 2;
const LABEL_SCALE: f32 = 16.0;
/// Gap between the bottom of the label and the top of the face box.
const LABEL_GAP: i32 = 10;

pub struct TerminalDisplay<O: Write> {
    terminal: Option<RawTerminal>,
    out: O,
    font: FontRef<'static>,
    quit_key: u8,
    preview_path: Option<PathBuf>,
    preview_every: u64,
    shown: u64,
}

fn overlay_font() -> Result<FontRef<'static>, InvalidFont> {
    FontRef::try_from_slice(FONT_DATA)
}

impl TerminalDisplay<std::io::Stdout> {
    /// Display on stdout, reading the quit key from stdin.
    pub fn stdout(
        quit_key: u8,
        preview_path: Option<PathBuf>,
        preview_every: u64,
    ) -> Result<Self, DisplayError> {
        Ok(Self {
            terminal: Some(RawTerminal::stdin()?),
            out: std::io::stdout(),
            font: overlay_font()?,
            quit_key,
            preview_path,
            preview_every: preview_every.max(1),
            shown: 0,
        })
    }
}

impl<O: Write> TerminalDisplay<O> {
    /// Always PNG, whatever the path's extension.
    fn write_preview(&self, frame: &Frame, detection: &DetectionResult) -> Result<(), DisplayError> {
        let Some(path) = &self.preview_path else {
            return Ok(());
        };
        let mut image = frame.to_image()?;
        annotate(&mut image, detection, &self.font);
        image
            .save_with_format(path, ImageFormat::Png)
            .map_err(|source| DisplayError::Preview {
                path: path.display().to_string(),
                source,
            })
    }
}

/// One status line for a processed frame.
pub fn status_line(sequence: u32, detection: &DetectionResult, progress: &Progress) -> String {
    let r = detection.region;
    let awaiting = progress.awaiting.map_or("-", |e| e.as_str());
    let mark = if progress.advanced { "  matched" } else { "" };
    format!(
        "frame {sequence:>6}  {label:<8} {pct:>5.1}%  face {x},{y} {w}x{h}  [{matched}/{total}] next: {awaiting}{mark}",
        label = detection.label(),
        pct = detection.confidence * 100.0,
        x = r.x,
        y = r.y,
        w = r.width,
        h = r.height,
        matched = progress.matched,
        total = progress.total,
    )
}

/// Draw the face box with the detected label above it. Frames without a
/// face are left as captured.
pub fn annotate(image: &mut GrayImage, detection: &DetectionResult, font: &FontRef<'_>) {
    let r = detection.region;
    if !detection.face_found || r.width == 0 || r.height == 0 {
        return;
    }
    let value = Luma([OVERLAY_VALUE]);

    for inset in 0..OUTLINE {
        let width = r.width.saturating_sub(2 * inset);
        let height = r.height.saturating_sub(2 * inset);
        if width == 0 || height == 0 {
            break;
        }
        let rect = Rect::at((r.x + inset) as i32, (r.y + inset) as i32).of_size(width, height);
        draw_hollow_rect_mut(image, rect, value);
    }

    let (x, y) = label_origin(r, image.dimensions());
    draw_text_mut(
        image,
        value,
        x,
        y,
        PxScale::from(LABEL_SCALE),
        font,
        detection.label(),
    );
}

/// Top-left corner of the label: above the box, kept inside the image.
fn label_origin(region: Region, (width, height): (u32, u32)) -> (i32, i32) {
    let x = region.x.min(width.saturating_sub(1)) as i32;
    let top = region.y as i32 - LABEL_GAP - LABEL_SCALE as i32;
    let max_top = (height as i32 - LABEL_SCALE as i32).max(0);
    (x, top.clamp(0, max_top))
}

impl<O: Write> DisplaySink for TerminalDisplay<O> {
    fn show(
        &mut self,
        frame: &Frame,
        detection: &DetectionResult,
        progress: &Progress,
    ) -> Result<DisplayControl, DisplayError> {
        writeln!(self.out, "{}", status_line(frame.sequence, detection, progress))?;

        if self.shown % self.preview_every == 0 {
            self.write_preview(frame, detection)?;
        }
        self.shown += 1;

        let Some(terminal) = &self.terminal else {
            return Ok(DisplayControl::Continue);
        };
        match terminal.poll_key(KEY_POLL)? {
            Some(key) if key == self.quit_key => {
                tracing::info!(key = %char::from(key), "quit key pressed");
                Ok(DisplayControl::Quit)
            }
            _ => Ok(DisplayControl::Continue),
        }
    }
}
