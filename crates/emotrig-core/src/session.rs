//! Tracker + emitter pair: advances on a matching label and sends its byte.

use crate::signal::{SignalEmitter, SignalError};
use crate::tracker::{Advance, SequenceTracker};
use std::io::Write;

/// Owns the cursor and the signal sink for one run.
pub struct Session<W: Write> {
    tracker: SequenceTracker,
    emitter: SignalEmitter<W>,
}

impl<W: Write> Session<W> {
    pub fn new(tracker: SequenceTracker, emitter: SignalEmitter<W>) -> Self {
        Self { tracker, emitter }
    }

    /// Offer one detected label.
    ///
    /// On a match the mapped byte is written before the cursor moves, so a
    /// failed write leaves the cursor on the same target.
    pub fn observe(&mut self, label: &str) -> Result<Advance, SignalError> {
        if !self.tracker.matches(label) {
            return Ok(self.tracker.advance_if_match(label));
        }

        self.emitter.emit(label)?;
        let advance = self.tracker.advance_if_match(label);
        tracing::info!(
            label,
            cursor = self.tracker.cursor(),
            total = self.tracker.targets().len(),
            done = advance.done,
            "target matched"
        );
        Ok(advance)
    }

    pub fn tracker(&self) -> &SequenceTracker {
        &self.tracker
    }

    pub fn emitter(&self) -> &SignalEmitter<W> {
        &self.emitter
    }

    pub fn into_parts(self) -> (SequenceTracker, SignalEmitter<W>) {
        (self.tracker, self.emitter)
    }
}
