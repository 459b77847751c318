//! Pattern matching for session output

mod matcher;

pub use matcher::{Match, Matcher};

use crate::result::PatternError;
use regex::bytes::Regex;

/// Patterns a pattern-wait can block on.
///
/// Matching runs over raw bytes: remote output is an unbuffered stream and a
/// chunk boundary can fall inside a multi-byte character, so nothing here
/// requires the pending output to be valid UTF-8.
///
/// # Examples
///
/// ```
/// use jupyter_tunnel::Pattern;
///
/// let prompt = Pattern::exact("$ ");
/// let password = Pattern::regex(r"[\w-]+@[\w-]+'s password: ").unwrap();
/// let give_up = Pattern::Timeout;
/// ```
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Exact byte-string match.
    Exact(String),

    /// Regular expression match with capture groups.
    Regex(Regex),

    /// Matches when the remote side closes its output.
    Eof,

    /// Matches when the wait's deadline passes.
    Timeout,
}

impl Pattern {
    /// Create an exact string pattern.
    pub fn exact(s: impl Into<String>) -> Self {
        Pattern::Exact(s.into())
    }

    /// Create a regex pattern.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError::InvalidRegex`] if the expression does not compile.
    pub fn regex(pattern: &str) -> Result<Self, PatternError> {
        Ok(Pattern::Regex(Regex::new(pattern)?))
    }

    /// Regex pattern matching `literal` verbatim followed by `suffix_regex`.
    pub fn literal_then(literal: &str, suffix_regex: &str) -> Result<Self, PatternError> {
        Self::regex(&format!("{}{}", regex::escape(literal), suffix_regex))
    }

    /// Convert pattern to a matcher implementation
    pub fn to_matcher(&self) -> Result<Box<dyn Matcher>, PatternError> {
        use matcher::{ExactMatcher, RegexMatcher};

        match self {
            Pattern::Exact(s) => Ok(Box::new(ExactMatcher::new(s.as_bytes())?)),
            Pattern::Regex(r) => Ok(Box::new(RegexMatcher::new(r.clone()))),
            Pattern::Eof | Pattern::Timeout => Err(PatternError::Special),
        }
    }

    /// Check if this is a special pattern (EOF, Timeout)
    pub fn is_special(&self) -> bool {
        matches!(self, Pattern::Eof | Pattern::Timeout)
    }

    /// Human-readable form for logs.
    pub fn describe(&self) -> String {
        match self {
            Pattern::Exact(s) => format!("{:?}", s),
            Pattern::Regex(r) => format!("/{}/", r.as_str()),
            Pattern::Eof => "<eof>".to_string(),
            Pattern::Timeout => "<timeout>".to_string(),
        }
    }
}

/// Find the match that starts earliest in `buffer` across `matchers`.
///
/// Ties go to the matcher listed first. This resolves races such as a
/// password prompt and a shell prompt arriving in the same read: whichever
/// the remote printed first wins, independent of list order.
pub fn earliest_match(
    matchers: &[(usize, Box<dyn Matcher>)],
    buffer: &[u8],
) -> Option<(usize, Match)> {
    let mut best: Option<(usize, Match)> = None;
    for (idx, matcher) in matchers {
        if let Some(m) = matcher.find(buffer) {
            let better = match &best {
                Some((_, current)) => m.start < current.start,
                None => true,
            };
            if better {
                best = Some((*idx, m));
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(patterns: &[Pattern]) -> Vec<(usize, Box<dyn Matcher>)> {
        patterns
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_special())
            .map(|(i, p)| (i, p.to_matcher().unwrap()))
            .collect()
    }

    #[test]
    fn test_earliest_match_prefers_position_over_order() {
        let matchers = compile(&[
            Pattern::exact("$ "),
            Pattern::regex(r"[\w-]+@[\w-]+'s password: ").unwrap(),
        ]);
        let buffer = b"alice@login01's password: later $ ";

        let (idx, m) = earliest_match(&matchers, buffer).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(m.start, 0);
    }

    #[test]
    fn test_earliest_match_tie_goes_to_first() {
        let matchers = compile(&[Pattern::exact("ab"), Pattern::exact("abc")]);
        let (idx, _) = earliest_match(&matchers, b"xxabc").unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn test_special_patterns_have_no_matcher() {
        assert!(Pattern::Eof.to_matcher().is_err());
        assert!(Pattern::Timeout.is_special());
        assert!(!Pattern::exact("x").is_special());
    }

    #[test]
    fn test_literal_then_escapes_marker() {
        let pattern = Pattern::literal_then("[jt-1a2b]", r"[$#] ").unwrap();
        let matcher = pattern.to_matcher().unwrap();
        assert!(matcher.find(b"out\r\n[jt-1a2b]$ ").is_some());
        assert!(matcher.find(b"PS1='[jt-1a2b]\\$ '").is_none());
    }

    #[test]
    fn test_invalid_regex() {
        assert!(matches!(
            Pattern::regex("(unclosed"),
            Err(PatternError::InvalidRegex(_))
        ));
    }
}
