//! Result types for pattern waits

mod error;

pub use error::{PatternError, SessionError};

/// Result of a successful pattern match.
///
/// Holds the matched region, the output that arrived since the previous
/// match, and regex captures. Both halves are kept so callers can pick the
/// match mode they need: the banner scan reads `matched`, command round
/// trips read `before`.
///
/// # Examples
///
/// ```no_run
/// use jupyter_tunnel::{Pattern, Session, WaitOutcome};
///
/// # async fn example(session: &mut Session) -> Result<(), Box<dyn std::error::Error>> {
/// session.send_line("hostname").await?;
/// if let WaitOutcome::Matched(result) = session.prompt(None).await? {
///     println!("Output: {}", result.before);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Index of the pattern that matched (for `expect_any`).
    ///
    /// For single-pattern waits this is always 0.
    pub pattern_index: usize,

    /// The matched text.
    pub matched: String,

    /// Text that appeared after the previous match and before this one.
    pub before: String,

    /// Captured groups (for regex patterns).
    ///
    /// Index 0 is the full match, 1+ are the groups. Groups that did not
    /// participate in the match are empty strings so indices stay stable.
    /// For exact patterns this vector is empty.
    pub captures: Vec<String>,
}

impl MatchResult {
    /// Capture group `index`, if the pattern had one.
    pub fn capture(&self, index: usize) -> Option<&str> {
        self.captures.get(index).map(String::as_str)
    }
}

/// Outcome of a pattern-wait that tolerates timeouts.
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    /// The pattern appeared before the deadline.
    Matched(MatchResult),
    /// The deadline passed first. `before` holds the unmatched output seen
    /// so far; it stays in the session buffer.
    Timeout {
        /// Pending output at the moment the wait gave up
        before: String,
    },
}

impl WaitOutcome {
    /// `true` when the wait matched.
    pub fn is_match(&self) -> bool {
        matches!(self, WaitOutcome::Matched(_))
    }

    /// The match, if any.
    pub fn into_match(self) -> Option<MatchResult> {
        match self {
            WaitOutcome::Matched(m) => Some(m),
            WaitOutcome::Timeout { .. } => None,
        }
    }
}
