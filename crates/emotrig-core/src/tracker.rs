//! Linear tracker over an ordered list of target emotions.
//!
//! The cursor only moves forward, one step per matching label, and never
//! revisits a target it has passed.

use crate::types::{Emotion, UnknownLabel};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    #[error("target sequence is empty")]
    Empty,
    #[error(transparent)]
    UnknownLabel(#[from] UnknownLabel),
}

/// Ordered, non-empty list of emotions to observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSequence(Vec<Emotion>);

impl TargetSequence {
    pub fn new(targets: Vec<Emotion>) -> Result<Self, SequenceError> {
        if targets.is_empty() {
            return Err(SequenceError::Empty);
        }
        Ok(Self(targets))
    }

    /// Build a sequence from label strings, rejecting anything that is not
    /// a known emotion.
    pub fn parse<S: AsRef<str>>(labels: &[S]) -> Result<Self, SequenceError> {
        let targets = labels
            .iter()
            .map(|l| l.as_ref().parse::<Emotion>())
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(targets)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Emotion> {
        self.0.get(index).copied()
    }

    pub fn as_slice(&self) -> &[Emotion] {
        &self.0
    }
}

impl Default for TargetSequence {
    fn default() -> Self {
        Self(vec![Emotion::Happy, Emotion::Sad])
    }
}

/// Outcome of offering one label to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Advance {
    /// The label matched the awaited target and the cursor moved.
    pub advanced: bool,
    /// Every target has been observed.
    pub done: bool,
}

/// Cursor into a [`TargetSequence`].
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    targets: TargetSequence,
    cursor: usize,
}

impl SequenceTracker {
    pub fn new(targets: TargetSequence) -> Self {
        Self { targets, cursor: 0 }
    }

    pub fn targets(&self) -> &TargetSequence {
        &self.targets
    }

    /// Index of the next awaited target; equals the sequence length when done.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_done(&self) -> bool {
        self.cursor >= self.targets.len()
    }

    /// The emotion the tracker is waiting for, if any remain.
    pub fn awaiting(&self) -> Option<Emotion> {
        self.targets.get(self.cursor)
    }

    /// Whether `label` is exactly the awaited target.
    pub fn matches(&self, label: &str) -> bool {
        self.awaiting().is_some_and(|e| e.as_str() == label)
    }

    /// Move the cursor forward by one if `label` is the awaited target.
    ///
    /// Labels are compared exactly; empty, unknown and `none` labels never
    /// match. Once done, every call reports `done` without advancing.
    pub fn advance_if_match(&mut self, label: &str) -> Advance {
        if !self.matches(label) {
            return Advance {
                advanced: false,
                done: self.is_done(),
            };
        }
        self.cursor += 1;
        Advance {
            advanced: true,
            done: self.is_done(),
        }
    }
}
