//! Emotion → single-byte signal mapping and the emitter that writes it.

use crate::types::{Emotion, UnknownLabel};
use std::collections::BTreeMap;
use std::io::Write;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("signal for {label} must be a single ASCII character, got {value:?}")]
    InvalidByte { label: String, value: String },
    #[error(transparent)]
    UnknownLabel(#[from] UnknownLabel),
    #[error("serial write failed: {0}")]
    Write(#[source] std::io::Error),
}

/// Fixed lookup table from emotion to the byte sent for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMap {
    table: BTreeMap<Emotion, u8>,
}

impl Default for SignalMap {
    fn default() -> Self {
        Self {
            table: BTreeMap::from([(Emotion::Happy, b'H'), (Emotion::Sad, b'S')]),
        }
    }
}

impl SignalMap {
    /// Build a table from `(label, value)` string pairs.
    ///
    /// Every label must be a known emotion and every value exactly one
    /// ASCII character.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, SignalError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut table = BTreeMap::new();
        for (label, value) in pairs {
            let emotion = label.as_ref().parse::<Emotion>()?;
            let byte = match value.as_ref().as_bytes() {
                [b] if b.is_ascii() => *b,
                _ => {
                    return Err(SignalError::InvalidByte {
                        label: label.as_ref().to_string(),
                        value: value.as_ref().to_string(),
                    })
                }
            };
            table.insert(emotion, byte);
        }
        Ok(Self { table })
    }

    /// Byte for a label; `None` for anything outside the table.
    pub fn byte_for(&self, label: &str) -> Option<u8> {
        let emotion = label.parse::<Emotion>().ok()?;
        if emotion.as_str() != label {
            return None;
        }
        self.table.get(&emotion).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Emotion, u8)> + '_ {
        self.table.iter().map(|(e, b)| (*e, *b))
    }
}

/// Writes mapped bytes to a byte sink (normally the serial port).
pub struct SignalEmitter<W: Write> {
    map: SignalMap,
    sink: W,
    sent: usize,
}

impl<W: Write> SignalEmitter<W> {
    pub fn new(map: SignalMap, sink: W) -> Self {
        Self { map, sink, sent: 0 }
    }

    /// Send the byte mapped to `label`.
    ///
    /// Labels outside the table are a silent no-op and return `Ok(None)`.
    /// Writes exactly one byte otherwise; there is no retry.
    pub fn emit(&mut self, label: &str) -> Result<Option<u8>, SignalError> {
        let Some(byte) = self.map.byte_for(label) else {
            tracing::debug!(label, "no signal mapped for label");
            return Ok(None);
        };

        self.sink.write_all(&[byte]).map_err(SignalError::Write)?;
        self.sink.flush().map_err(SignalError::Write)?;
        self.sent += 1;

        tracing::info!(label, byte = %char::from(byte), "signal sent");
        Ok(Some(byte))
    }

    /// Number of bytes written so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    pub fn map(&self) -> &SignalMap {
        &self.map
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    pub fn into_sink(self) -> W {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_map() {
        let map = SignalMap::default();
        assert_eq!(map.byte_for("happy"), Some(b'H'));
        assert_eq!(map.byte_for("sad"), Some(b'S'));
        assert_eq!(map.byte_for("neutral"), None);
        assert_eq!(map.byte_for("none"), None);
        assert_eq!(map.byte_for(""), None);
        assert_eq!(map.byte_for("Happy"), None);
    }

    #[test]
    fn test_from_pairs() {
        let map = SignalMap::from_pairs([("happy", "1"), ("angry", "A")]).unwrap();
        assert_eq!(map.byte_for("happy"), Some(b'1'));
        assert_eq!(map.byte_for("angry"), Some(b'A'));
        assert_eq!(map.byte_for("sad"), None);
    }

    #[test]
    fn test_iter_in_label_order() {
        let emitter = SignalEmitter::new(
            SignalMap::from_pairs([("sad", "S"), ("angry", "A")]).unwrap(),
            Vec::new(),
        );
        let pairs: Vec<_> = emitter.map().iter().collect();
        assert_eq!(pairs, vec![(Emotion::Angry, b'A'), (Emotion::Sad, b'S')]);
    }

    #[test]
    fn test_from_pairs_rejects_bad_values() {
        assert!(matches!(
            SignalMap::from_pairs([("happy", "HS")]),
            Err(SignalError::InvalidByte { .. })
        ));
        assert!(matches!(
            SignalMap::from_pairs([("happy", "")]),
            Err(SignalError::InvalidByte { .. })
        ));
        assert!(matches!(
            SignalMap::from_pairs([("happy", "é")]),
            Err(SignalError::InvalidByte { .. })
        ));
        assert!(matches!(
            SignalMap::from_pairs([("joy", "J")]),
            Err(SignalError::UnknownLabel(_))
        ));
    }

    #[test]
    fn test_emit_writes_one_byte() {
        let mut emitter = SignalEmitter::new(SignalMap::default(), Vec::new());
        assert_eq!(emitter.emit("happy").unwrap(), Some(b'H'));
        assert_eq!(emitter.emit("sad").unwrap(), Some(b'S'));
        assert_eq!(emitter.sink(), &b"HS".to_vec());
        assert_eq!(emitter.sent(), 2);
    }

    #[test]
    fn test_emit_unmapped_is_noop() {
        let mut emitter = SignalEmitter::new(SignalMap::default(), Vec::new());
        assert_eq!(emitter.emit("neutral").unwrap(), None);
        assert_eq!(emitter.emit("").unwrap(), None);
        assert!(emitter.into_sink().is_empty());
    }

    #[test]
    fn test_emit_write_failure_is_error() {
        let mut emitter = SignalEmitter::new(SignalMap::default(), BrokenPipe);
        assert!(matches!(emitter.emit("happy"), Err(SignalError::Write(_))));
        assert_eq!(emitter.sent(), 0);
        // Unmapped labels never touch the sink.
        assert!(emitter.emit("fear").unwrap().is_none());
    }
}
