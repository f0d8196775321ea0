//! Frame → classify → track/signal → display loop.
//!
//! Runs on the calling thread and owns every resource handed to it; all of
//! them are dropped exactly once before [`run`] returns, whatever the exit
//! path.

use emotrig_core::{ClassifierError, DetectionResult, Emotion, EmotionClassifier, Session, SignalError};
use emotrig_hw::{Camera, CameraError, Frame, FrameError};
use std::io::Write;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("failed to read image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("terminal: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("overlay font: {0}")]
    Font(#[from] ab_glyph::InvalidFont),
    #[error("failed to write preview {path}: {source}")]
    Preview {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("classifier: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("signal: {0}")]
    Signal(#[from] SignalError),
    #[error("display: {0}")]
    Display(#[from] DisplayError),
}

/// Produces frames until end of stream (`Ok(None)`).
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        Ok(Some(self.capture_frame()?))
    }
}

/// Cursor state shown alongside each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub matched: usize,
    pub total: usize,
    pub awaiting: Option<Emotion>,
    pub advanced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayControl {
    Continue,
    Quit,
}

/// Renders an annotated frame and reports whether the user asked to quit.
pub trait DisplaySink {
    fn show(
        &mut self,
        frame: &Frame,
        detection: &DetectionResult,
        progress: &Progress,
    ) -> Result<DisplayControl, DisplayError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The frame source ran dry or failed.
    EndOfStream,
    /// The quit key was pressed.
    QuitKey,
    /// Every target was observed.
    SequenceComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub reason: ExitReason,
    pub frames: u64,
    pub signals: usize,
    pub matched: usize,
    pub total: usize,
}

/// Run the loop to completion, then release display, classifier, source and
/// signal sink in that order.
pub fn run<S, C, D, W>(
    mut source: S,
    mut classifier: C,
    mut session: Session<W>,
    mut display: D,
) -> Result<RunSummary, PipelineError>
where
    S: FrameSource,
    C: EmotionClassifier,
    D: DisplaySink,
    W: Write,
{
    let result = run_loop(&mut source, &mut classifier, &mut session, &mut display);

    drop(display);
    drop(classifier);
    drop(source);
    drop(session);

    match &result {
        Ok(summary) => tracing::info!(
            reason = ?summary.reason,
            frames = summary.frames,
            signals = summary.signals,
            "run finished; resources released"
        ),
        Err(e) => tracing::error!(error = %e, "run failed; resources released"),
    }
    result
}

fn run_loop<S, C, D, W>(
    source: &mut S,
    classifier: &mut C,
    session: &mut Session<W>,
    display: &mut D,
) -> Result<RunSummary, PipelineError>
where
    S: FrameSource,
    C: EmotionClassifier,
    D: DisplaySink,
    W: Write,
{
    let mut frames = 0u64;

    let reason = loop {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break ExitReason::EndOfStream,
            Err(e) => {
                tracing::warn!(error = %e, "frame acquisition failed; ending stream");
                break ExitReason::EndOfStream;
            }
        };
        frames += 1;

        let detection = classifier.classify(&frame.data, frame.width, frame.height)?;
        let advance = session.observe(detection.label())?;
        tracing::debug!(
            seq = frame.sequence,
            label = detection.label(),
            confidence = detection.confidence,
            advanced = advance.advanced,
            "frame processed"
        );
        if advance.done {
            break ExitReason::SequenceComplete;
        }

        let tracker = session.tracker();
        let progress = Progress {
            matched: tracker.cursor(),
            total: tracker.targets().len(),
            awaiting: tracker.awaiting(),
            advanced: advance.advanced,
        };
        if display.show(&frame, &detection, &progress)? == DisplayControl::Quit {
            break ExitReason::QuitKey;
        }
    };

    Ok(RunSummary {
        reason,
        frames,
        signals: session.emitter().sent(),
        matched: session.tracker().cursor(),
        total: session.tracker().targets().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use emotrig_core::{Region, SequenceTracker, SignalEmitter, SignalMap, TargetSequence};
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::time::Instant;

    /// Counts drops of whatever it is embedded in.
    #[derive(Clone, Default)]
    struct DropCounter(Rc<Cell<usize>>);

    impl DropCounter {
        fn count(&self) -> usize {
            self.0.get()
        }
    }

    struct Tracked(DropCounter);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0 .0.set(self.0 .0.get() + 1);
        }
    }

    /// Yields one tiny frame per scripted label, then either ends or fails.
    struct ScriptedSource {
        remaining: usize,
        fail_at_end: bool,
        seq: u32,
        _guard: Tracked,
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
            if self.remaining == 0 {
                return if self.fail_at_end {
                    Err(CameraError::CaptureFailed("unplugged".into()).into())
                } else {
                    Ok(None)
                };
            }
            self.remaining -= 1;
            self.seq += 1;
            Ok(Some(Frame {
                data: vec![0; 4],
                width: 2,
                height: 2,
                timestamp: Instant::now(),
                sequence: self.seq,
            }))
        }
    }

    /// Returns the scripted labels in order; "none" becomes a no-face result.
    struct ScriptedClassifier {
        labels: VecDeque<&'static str>,
    }

    impl EmotionClassifier for ScriptedClassifier {
        fn classify(
            &mut self,
            _frame: &[u8],
            width: u32,
            height: u32,
        ) -> Result<DetectionResult, ClassifierError> {
            let label = self.labels.pop_front().unwrap_or("none");
            Ok(match label.parse::<Emotion>() {
                Ok(emotion) => DetectionResult {
                    emotion: Some(emotion),
                    confidence: 0.9,
                    region: Region::full(width, height),
                    face_found: true,
                },
                Err(_) => DetectionResult::no_face(width, height),
            })
        }
    }

    /// Continues until `quit_after` frames have been shown.
    struct RecordingDisplay {
        shown: Rc<RefCell<Vec<Progress>>>,
        quit_after: Option<usize>,
    }

    impl DisplaySink for RecordingDisplay {
        fn show(
            &mut self,
            _frame: &Frame,
            _detection: &DetectionResult,
            progress: &Progress,
        ) -> Result<DisplayControl, DisplayError> {
            let mut shown = self.shown.borrow_mut();
            shown.push(*progress);
            Ok(match self.quit_after {
                Some(n) if shown.len() >= n => DisplayControl::Quit,
                _ => DisplayControl::Continue,
            })
        }
    }

    /// In-memory serial line that can be told to fail, with a drop counter.
    struct FakeSerial {
        written: Rc<RefCell<Vec<u8>>>,
        broken: bool,
        _guard: Tracked,
    }

    impl Write for FakeSerial {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.broken {
                return Err(std::io::ErrorKind::BrokenPipe.into());
            }
            self.written.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct Harness {
        camera_drops: DropCounter,
        serial_drops: DropCounter,
        written: Rc<RefCell<Vec<u8>>>,
        shown: Rc<RefCell<Vec<Progress>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                camera_drops: DropCounter::default(),
                serial_drops: DropCounter::default(),
                written: Rc::default(),
                shown: Rc::default(),
            }
        }

        fn run(
            &self,
            labels: &[&'static str],
            fail_at_end: bool,
            broken_serial: bool,
            quit_after: Option<usize>,
        ) -> Result<RunSummary, PipelineError> {
            let source = ScriptedSource {
                remaining: labels.len(),
                fail_at_end,
                seq: 0,
                _guard: Tracked(self.camera_drops.clone()),
            };
            let classifier = ScriptedClassifier {
                labels: labels.iter().copied().collect(),
            };
            let serial = FakeSerial {
                written: self.written.clone(),
                broken: broken_serial,
                _guard: Tracked(self.serial_drops.clone()),
            };
            let session = Session::new(
                SequenceTracker::new(TargetSequence::default()),
                SignalEmitter::new(SignalMap::default(), serial),
            );
            let display = RecordingDisplay {
                shown: self.shown.clone(),
                quit_after,
            };
            run(source, classifier, session, display)
        }

        fn written(&self) -> Vec<u8> {
            self.written.borrow().clone()
        }

        fn assert_released_once(&self) {
            assert_eq!(self.camera_drops.count(), 1, "camera drops");
            assert_eq!(self.serial_drops.count(), 1, "serial drops");
        }
    }

    #[test]
    fn test_completes_after_second_signal() {
        let h = Harness::new();
        let summary = h
            .run(&["neutral", "happy", "neutral", "sad", "happy"], false, false, None)
            .unwrap();

        assert_eq!(summary.reason, ExitReason::SequenceComplete);
        assert_eq!(summary.frames, 4);
        assert_eq!(summary.signals, 2);
        assert_eq!(h.written(), b"HS".to_vec());
        // The completing frame is not displayed.
        assert_eq!(h.shown.borrow().len(), 3);
        h.assert_released_once();
    }

    #[test]
    fn test_end_of_stream_without_sad() {
        let h = Harness::new();
        let summary = h
            .run(&["happy", "happy", "none", "angry"], false, false, None)
            .unwrap();

        assert_eq!(summary.reason, ExitReason::EndOfStream);
        assert_eq!(summary.frames, 4);
        assert_eq!(summary.matched, 1);
        assert_eq!(h.written(), b"H".to_vec());
        h.assert_released_once();
    }

    #[test]
    fn test_no_face_frames_never_signal() {
        let h = Harness::new();
        let summary = h.run(&["none", "none", "none"], false, false, None).unwrap();

        assert_eq!(summary.reason, ExitReason::EndOfStream);
        assert_eq!(summary.signals, 0);
        assert!(h.written().is_empty());
        assert!(h.shown.borrow().iter().all(|p| p.matched == 0 && !p.advanced));
    }

    #[test]
    fn test_quit_key_releases_resources_once() {
        let h = Harness::new();
        let summary = h
            .run(&["happy", "neutral", "neutral", "sad"], false, false, Some(2))
            .unwrap();

        assert_eq!(summary.reason, ExitReason::QuitKey);
        assert_eq!(summary.frames, 2);
        assert_eq!(h.written(), b"H".to_vec());
        h.assert_released_once();
    }

    #[test]
    fn test_source_failure_ends_stream() {
        let h = Harness::new();
        let summary = h.run(&["happy"], true, false, None).unwrap();

        assert_eq!(summary.reason, ExitReason::EndOfStream);
        assert_eq!(summary.frames, 1);
        h.assert_released_once();
    }

    #[test]
    fn test_serial_failure_is_fatal_and_releases() {
        let h = Harness::new();
        let err = h
            .run(&["neutral", "happy", "sad"], false, true, None)
            .unwrap_err();

        assert!(matches!(err, PipelineError::Signal(SignalError::Write(_))));
        assert!(h.written().is_empty());
        // Only the frame before the failed write reached the display.
        assert_eq!(h.shown.borrow().len(), 1);
        h.assert_released_once();
    }

    #[test]
    fn test_progress_reports_awaited_target() {
        let h = Harness::new();
        h.run(&["neutral", "happy", "neutral"], false, false, None).unwrap();

        let shown = h.shown.borrow();
        assert_eq!(shown[0].awaiting, Some(Emotion::Happy));
        assert!(shown[1].advanced);
        assert_eq!(shown[1].awaiting, Some(Emotion::Sad));
        assert_eq!((shown[2].matched, shown[2].total), (1, 2));
        assert!(!shown[2].advanced);
    }
}
