//! Output relay between a session and the local terminal
//!
//! Most raw remote output is suppressed while the workflow runs. An
//! [`OutputRelay`] decides, one chunk at a time, what reaches the user:
//!
//! - [`OutputRelay::relay`] forwards a chunk only when it *starts* with the
//!   marker (for example `srun` diagnostics during allocation);
//! - [`OutputRelay::exit_on_find`] watches for the marker *anywhere* in a
//!   chunk and tells the interactive hand-off loop to stop.
//!
//! Both are stateless per call. A marker that arrives split across two reads
//! is not seen.

use std::io::{self, Write};

/// Verdict of [`OutputRelay::exit_on_find`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayVerdict<'a> {
    /// Marker absent; the chunk should be shown unchanged.
    PassThrough(&'a [u8]),
    /// Marker present; the hand-off should end.
    Found,
}

/// Prefix-gated writer and marker detector.
#[derive(Debug)]
pub struct OutputRelay<W> {
    sink: W,
    marker: Vec<u8>,
}

impl OutputRelay<io::Sink> {
    /// A relay that only detects its marker and forwards nothing.
    pub fn watcher(marker: impl Into<Vec<u8>>) -> Self {
        Self::new(io::sink(), marker)
    }
}

impl<W> OutputRelay<W> {
    /// Relay to `sink`, gated on `marker`.
    pub fn new(sink: W, marker: impl Into<Vec<u8>>) -> Self {
        Self {
            sink,
            marker: marker.into(),
        }
    }

    /// The configured marker
    pub fn marker(&self) -> &[u8] {
        &self.marker
    }

    /// Scan `chunk` for the marker anywhere.
    pub fn exit_on_find<'a>(&self, chunk: &'a [u8]) -> RelayVerdict<'a> {
        if contains(chunk, &self.marker) {
            RelayVerdict::Found
        } else {
            RelayVerdict::PassThrough(chunk)
        }
    }

    /// Unwrap the sink
    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: Write> OutputRelay<W> {
    /// Forward `chunk` whole if it starts with the marker. Returns whether
    /// it was forwarded.
    pub fn relay(&mut self, chunk: &[u8]) -> io::Result<bool> {
        if !chunk.starts_with(&self.marker) {
            return Ok(false);
        }
        self.sink.write_all(chunk)?;
        Ok(true)
    }
}

impl<W: Write> Write for OutputRelay<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.relay(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}
