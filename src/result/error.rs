//! Error types for remote sessions and patterns

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while driving a remote session.
///
/// A pattern-wait that runs out of time is *not* an error when the caller
/// uses [`Session::await_pattern`](crate::Session::await_pattern) or lists
/// [`Pattern::Timeout`](crate::Pattern::Timeout); only the strict
/// [`Session::expect`](crate::Session::expect) family reports
/// [`SessionError::Timeout`].
///
/// # Examples
///
/// ```no_run
/// use jupyter_tunnel::{Credential, Session, SessionError};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let secret = Credential::from_string("hunter2".to_string());
/// let mut session = Session::builder().build()?;
///
/// match session.login("login.example.org", "alice", &secret).await {
///     Ok(()) => println!("logged in"),
///     Err(SessionError::Authentication { reason, .. }) => {
///         eprintln!("login refused: {}", reason);
///     }
///     Err(e) => return Err(e.into()),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Error, Debug)]
pub enum SessionError {
    /// Timeout waiting for pattern.
    #[error("Timeout waiting for pattern (after {duration:?})")]
    Timeout {
        /// Duration that was waited before timeout
        duration: Duration,
    },

    /// The remote side closed its output before the pattern matched.
    #[error("EOF reached before pattern matched")]
    Eof,

    /// Invalid pattern.
    #[error("Invalid pattern: {0}")]
    PatternError(#[from] PatternError),

    /// I/O error while reading from or writing to the connection.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// PTY creation or manipulation failed.
    #[error("PTY error: {0}")]
    PtyError(String),

    /// The `ssh` client could not be started.
    #[error("Failed to spawn process: {0}")]
    SpawnError(String),

    /// The remote host rejected the credential.
    ///
    /// Authentication is never retried: a wrong password is a user-facing
    /// condition, not a transient one.
    #[error("Authentication to {host} failed: {reason}")]
    Authentication {
        /// Host the login was attempted against
        host: String,
        /// What the remote side said
        reason: String,
    },

    /// The connection could not be established (refused, unreachable, ...).
    #[error("Connection to {host} failed: {reason}")]
    Connection {
        /// Host the connection was attempted against
        host: String,
        /// Diagnostic reported by the `ssh` client
        reason: String,
    },

    /// The session has no live connection yet.
    #[error("Session is not connected")]
    NotConnected,

    /// `login` was called on a session that already has a connection.
    #[error("Session is already connected")]
    AlreadyConnected,

    /// The session was closed; it cannot be reused.
    #[error("Session is closed")]
    Closed,
}

/// Errors related to pattern creation.
#[derive(Error, Debug)]
pub enum PatternError {
    /// Invalid regex pattern.
    #[error("Invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    /// Empty pattern.
    #[error("Pattern cannot be empty")]
    EmptyPattern,

    /// `Eof` and `Timeout` are conditions, not byte matchers.
    #[error("Special patterns don't have matchers")]
    Special,
}
