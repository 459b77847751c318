//! Pattern matcher implementations

use crate::result::PatternError;
use regex::bytes::Regex;

/// Result of a pattern match
#[derive(Debug, Clone)]
pub struct Match {
    /// Start position of the match
    pub start: usize,
    /// End position of the match
    pub end: usize,
    /// Captured groups (for regex)
    pub captures: Vec<String>,
}

/// Trait for pattern matching
pub trait Matcher: Send + Sync {
    /// Find the first match in the buffer
    fn find(&self, buffer: &[u8]) -> Option<Match>;
}

/// Exact byte-string matcher (Boyer-Moore-Horspool)
pub struct ExactMatcher {
    needle: Vec<u8>,
    shift: [usize; 256],
}

impl ExactMatcher {
    /// Create a new exact matcher
    pub fn new(needle: impl Into<Vec<u8>>) -> Result<Self, PatternError> {
        let needle = needle.into();
        let Some(last) = needle.len().checked_sub(1) else {
            return Err(PatternError::EmptyPattern);
        };

        let mut shift = [needle.len(); 256];
        for (i, &byte) in needle[..last].iter().enumerate() {
            shift[byte as usize] = last - i;
        }

        Ok(Self { needle, shift })
    }
}

impl Matcher for ExactMatcher {
    fn find(&self, buffer: &[u8]) -> Option<Match> {
        let n = self.needle.len();
        let mut pos = 0;
        while pos + n <= buffer.len() {
            let window = &buffer[pos..pos + n];
            if window == self.needle.as_slice() {
                return Some(Match {
                    start: pos,
                    end: pos + n,
                    captures: vec![],
                });
            }
            pos += self.shift[window[n - 1] as usize];
        }
        None
    }
}

/// Regex matcher over raw bytes
pub struct RegexMatcher {
    regex: Regex,
}

impl RegexMatcher {
    /// Wrap a compiled regex
    pub fn new(regex: Regex) -> Self {
        Self { regex }
    }
}

impl Matcher for RegexMatcher {
    fn find(&self, buffer: &[u8]) -> Option<Match> {
        let caps = self.regex.captures(buffer)?;
        let full = caps.get(0)?;

        let captures = caps
            .iter()
            .map(|group| {
                group
                    .map(|g| String::from_utf8_lossy(g.as_bytes()).into_owned())
                    .unwrap_or_default()
            })
            .collect();

        Some(Match {
            start: full.start(),
            end: full.end(),
            captures,
        })
    }
}
