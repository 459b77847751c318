//! Buffering of remote output between pattern-waits

mod ansi;

pub use ansi::AnsiStripper;

use bytes::{Bytes, BytesMut};

/// Ratio for buffer compaction strategy.
/// When the buffer overflows, the oldest 1/3 of capacity is discarded.
const DISCARD_RATIO: usize = 3;

/// Pending output that has not been consumed by a match yet.
///
/// Matching consumes the buffer front-to-back: everything up to the end of a
/// match is taken out, so the next wait only sees output that arrived after
/// the previous match.
///
/// With ANSI stripping on, the unstripped bytes behind `pending` are kept
/// too, so output can be shown to a terminal exactly as it arrived.
pub struct StreamBuffer {
    pending: BytesMut,
    max_size: usize,
    stripper: Option<AnsiStripper>,
    raw: BytesMut,
    /// Stripper state at the front of `raw`
    raw_cursor: AnsiStripper,
}

impl StreamBuffer {
    /// Create a new buffer
    pub fn new(max_size: usize, strip_ansi: bool) -> Self {
        Self {
            pending: BytesMut::with_capacity(max_size.min(64 * 1024)),
            max_size: max_size.max(DISCARD_RATIO),
            stripper: strip_ansi.then(AnsiStripper::default),
            raw: BytesMut::new(),
            raw_cursor: AnsiStripper::default(),
        }
    }

    /// Append a chunk read from the remote. Returns the number of old bytes
    /// discarded to stay within `max_size`.
    pub fn append(&mut self, chunk: &[u8]) -> usize {
        match self.stripper.as_mut() {
            Some(stripper) => {
                let clean = stripper.strip(chunk);
                self.pending.extend_from_slice(&clean);
                self.raw.extend_from_slice(chunk);
            }
            None => self.pending.extend_from_slice(chunk),
        }

        let mut discarded = 0;
        while self.pending.len() > self.max_size {
            let drop = (self.max_size / DISCARD_RATIO).min(self.pending.len());
            let _ = self.pending.split_to(drop);
            self.advance_raw(drop);
            discarded += drop;
        }
        // nothing printable is pending, so the raw bytes are all escapes
        if self.pending.is_empty() && self.raw.len() > self.max_size {
            let excess = self.raw.len() - self.max_size;
            for &byte in &self.raw[..excess] {
                self.raw_cursor.step(byte);
            }
            let _ = self.raw.split_to(excess);
        }
        discarded
    }

    /// Output not consumed by any match yet
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Remove and return the first `end` bytes.
    pub fn consume(&mut self, end: usize) -> Bytes {
        let end = end.min(self.pending.len());
        self.advance_raw(end);
        self.pending.split_to(end).freeze()
    }

    /// Remove and return everything pending.
    pub fn take_all(&mut self) -> Bytes {
        self.clear_raw();
        self.pending.split().freeze()
    }

    /// Remove everything pending and return it as it arrived, escape
    /// sequences included. Same as [`take_all`](Self::take_all) when
    /// stripping is off.
    pub fn take_all_raw(&mut self) -> Bytes {
        if self.stripper.is_none() {
            return self.take_all();
        }
        self.pending.clear();
        self.raw_cursor = self.stripper.clone().unwrap_or_default();
        self.raw.split().freeze()
    }

    fn clear_raw(&mut self) {
        if let Some(stripper) = &self.stripper {
            self.raw.clear();
            self.raw_cursor = stripper.clone();
        }
    }

    /// Drop the raw bytes behind the first `stripped` pending bytes.
    /// Escape sequences after the last of them stay.
    fn advance_raw(&mut self, stripped: usize) {
        if self.stripper.is_none() || stripped == 0 {
            return;
        }
        let mut seen = 0;
        let mut taken = 0;
        for &byte in self.raw.iter() {
            taken += 1;
            if self.raw_cursor.step(byte).is_some() {
                seen += 1;
                if seen == stripped {
                    break;
                }
            }
        }
        let _ = self.raw.split_to(taken);
    }

    /// Pending length in bytes
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// `true` when nothing is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_pending() {
        let mut buffer = StreamBuffer::new(1024, false);
        buffer.append(b"Hello ");
        buffer.append(b"World");
        assert_eq!(buffer.pending(), b"Hello World");
        assert_eq!(buffer.len(), 11);
    }

    #[test]
    fn test_consume_splits_front() {
        let mut buffer = StreamBuffer::new(1024, false);
        buffer.append(b"before$ after");

        let head = buffer.consume(8);
        assert_eq!(&head[..], b"before$ ");
        assert_eq!(buffer.pending(), b"after");
    }

    #[test]
    fn test_consume_past_end_is_clamped() {
        let mut buffer = StreamBuffer::new(1024, false);
        buffer.append(b"abc");
        assert_eq!(&buffer.consume(100)[..], b"abc");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_take_all() {
        let mut buffer = StreamBuffer::new(1024, false);
        buffer.append(b"leftover");
        assert_eq!(&buffer.take_all()[..], b"leftover");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflow_discards_oldest() {
        let mut buffer = StreamBuffer::new(90, false);
        buffer.append(&b"0123456789".repeat(5));
        let discarded = buffer.append(&b"ABCDEFGHIJ".repeat(5));

        assert_eq!(discarded, 30);
        assert_eq!(buffer.len(), 70);
        assert!(buffer.pending().ends_with(b"ABCDEFGHIJ"));
    }

    #[test]
    fn test_strip_ansi_enabled() {
        let mut buffer = StreamBuffer::new(1024, true);
        buffer.append(b"Hello \x1b[31mRed\x1b[0m World");
        assert_eq!(buffer.pending(), b"Hello Red World");
    }

    #[test]
    fn test_strip_ansi_disabled() {
        let mut buffer = StreamBuffer::new(1024, false);
        let data = b"Hello \x1b[31mRed\x1b[0m World";
        buffer.append(data);
        assert_eq!(buffer.pending(), data);
    }

    #[test]
    fn test_raw_follows_consumption() {
        let mut buffer = StreamBuffer::new(1024, true);
        buffer.append(b"$ ls\r\n\x1b[1;34mdata\x1b[0m  notes");
        buffer.append(b".txt\r\n");

        let head = buffer.consume(6);
        assert_eq!(&head[..], b"$ ls\r\n");
        assert_eq!(buffer.pending(), b"data  notes.txt\r\n");

        let raw = buffer.take_all_raw();
        assert_eq!(&raw[..], b"\x1b[1;34mdata\x1b[0m  notes.txt\r\n");
        assert!(buffer.is_empty());
        assert!(buffer.take_all_raw().is_empty());
    }

    #[test]
    fn test_raw_keeps_trailing_escape_after_match() {
        let mut buffer = StreamBuffer::new(1024, true);
        buffer.append(b"prompt$ \x1b[?2004h");
        buffer.consume(8);

        assert!(buffer.is_empty());
        assert_eq!(&buffer.take_all_raw()[..], b"\x1b[?2004h");
    }

    #[test]
    fn test_raw_with_sequence_split_across_appends() {
        let mut buffer = StreamBuffer::new(1024, true);
        buffer.append(b"ok \x1b[3");
        buffer.append(b"1mred");
        buffer.consume(3);
        assert_eq!(&buffer.take_all_raw()[..], b"\x1b[31mred");

        buffer.append(b"\x1b[0mplain");
        assert_eq!(buffer.pending(), b"plain");
        assert_eq!(&buffer.take_all_raw()[..], b"\x1b[0mplain");
    }

    #[test]
    fn test_raw_escapes_alone_stay_bounded() {
        let mut buffer = StreamBuffer::new(64, true);
        for _ in 0..100 {
            buffer.append(b"\x1b[?25l\x1b[?25h");
        }
        assert!(buffer.is_empty());
        assert!(buffer.take_all_raw().len() <= 64);
    }

    #[test]
    fn test_raw_without_stripping_is_pending() {
        let mut buffer = StreamBuffer::new(1024, false);
        buffer.append(b"\x1b[31mred");
        assert_eq!(&buffer.take_all_raw()[..], b"\x1b[31mred");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_invalid_utf8_kept() {
        let mut buffer = StreamBuffer::new(1024, false);
        buffer.append(&[0xFF, 0xFE, 0xFD]);
        assert_eq!(buffer.pending(), &[0xFF, 0xFE, 0xFD]);
    }
}
