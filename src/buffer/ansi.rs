//! ANSI escape sequence stripping

/// Where the stripper is inside an escape sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Text,
    /// Saw ESC
    Escape,
    /// Inside `ESC [ ...` until a final byte
    Csi,
    /// Inside `ESC ] ...` until BEL or `ESC \`
    Osc,
    /// Saw ESC inside an OSC, expecting `\`
    OscEscape,
    /// `ESC (` / `ESC )`: one designator byte follows
    Charset,
}

/// Removes ANSI escape sequences from a stream of chunks.
///
/// State carries over between calls, so a sequence split across two reads
/// is still removed completely.
#[derive(Debug, Default, Clone)]
pub struct AnsiStripper {
    state: State,
}

impl AnsiStripper {
    /// Strip one chunk, returning the printable remainder.
    pub fn strip(&mut self, data: &[u8]) -> Vec<u8> {
        data.iter().filter_map(|&byte| self.step(byte)).collect()
    }

    /// Feed one byte; returns it back when it is printable text.
    pub fn step(&mut self, byte: u8) -> Option<u8> {
        let mut kept = None;
        self.state = match (self.state, byte) {
            (State::Text, 0x1b) => State::Escape,
            (State::Text, b) => {
                kept = Some(b);
                State::Text
            }
            (State::Escape, b'[') => State::Csi,
            (State::Escape, b']') => State::Osc,
            (State::Escape, b'(' | b')') => State::Charset,
            (State::Escape, _) => State::Text,
            (State::Csi, b) if (0x40..=0x7e).contains(&b) => State::Text,
            (State::Csi, _) => State::Csi,
            (State::Osc, 0x07) => State::Text,
            (State::Osc, 0x1b) => State::OscEscape,
            (State::Osc, _) => State::Osc,
            (State::OscEscape, b'\\') => State::Text,
            (State::OscEscape, _) => State::Osc,
            (State::Charset, _) => State::Text,
        };
        kept
    }
}
