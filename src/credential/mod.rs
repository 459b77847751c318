//! Credential handling: the in-memory secret and the prompt that obtains it
//!
//! # Memory erasure
//!
//! [`Credential`] keeps the secret in a single fixed-size heap allocation
//! that is never grown or moved, and [`Credential::zero`] overwrites that
//! allocation in place. This guarantees that the buffer the credential
//! exposes no longer holds the secret. It does not guarantee that no copy
//! exists anywhere else: the terminal driver, the pinentry process, or a
//! kernel pipe buffer may have seen it before it reached us.

mod console;
mod pinentry;

pub use console::ConsolePrompt;
pub use pinentry::{AssuanChannel, Pinentry};

use std::fmt;
use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

/// Errors from the credential prompt.
#[derive(Error, Debug)]
pub enum PromptError {
    /// Neither the pinentry agent nor a permitted console fallback exists.
    #[error("no password prompt available (pinentry not found and no terminal attached)")]
    Unavailable,

    /// `ask` was called after `close`.
    #[error("password prompt already closed")]
    Closed,

    /// The user dismissed the prompt.
    #[error("password entry cancelled: {0}")]
    Cancelled(String),

    /// The pinentry agent spoke something other than Assuan.
    #[error("pinentry protocol error: {0}")]
    Protocol(String),

    /// Reading from the prompt failed.
    #[error("prompt I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A secret held in a fixed, non-relocating buffer.
///
/// The buffer is overwritten with zeros by [`zero`](Self::zero) and again on
/// drop. `Debug` never prints the contents.
pub struct Credential {
    bytes: Box<[u8]>,
    zeroed: bool,
}

impl Credential {
    /// Copy `secret` into an exactly-sized buffer and erase the source.
    pub fn new(mut secret: Vec<u8>) -> Self {
        let bytes: Box<[u8]> = secret.as_slice().into();
        secret.zeroize();
        Self {
            bytes,
            zeroed: false,
        }
    }

    /// Take ownership of a `String` secret, erasing the `String` afterwards.
    pub fn from_string(mut secret: String) -> Self {
        let bytes: Box<[u8]> = secret.as_bytes().into();
        secret.zeroize();
        Self {
            bytes,
            zeroed: false,
        }
    }

    /// The secret bytes. After [`zero`](Self::zero) these are all zero.
    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }

    /// The secret followed by a newline, in a buffer erased on drop.
    pub fn line(&self) -> Zeroizing<Vec<u8>> {
        let mut line = Zeroizing::new(Vec::with_capacity(self.bytes.len() + 1));
        line.extend_from_slice(&self.bytes);
        line.push(b'\n');
        line
    }

    /// Length of the secret in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` for an empty secret
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Overwrite the secret in place. Idempotent.
    pub fn zero(&mut self) {
        self.bytes[..].zeroize();
        self.zeroed = true;
    }

    /// `true` once [`zero`](Self::zero) has run
    pub fn is_zeroed(&self) -> bool {
        self.zeroed
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.zero();
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("secret", &"[REDACTED]")
            .field("zeroed", &self.zeroed)
            .finish()
    }
}

/// One round of a prompt dialog.
#[derive(Debug, Clone, Copy)]
pub struct PromptRequest<'a> {
    /// Short prompt text, e.g. `Enter your passphrase: `
    pub prompt: &'a str,
    /// Longer description shown above the prompt
    pub description: Option<&'a str>,
    /// Set when the previous candidate was rejected
    pub error: Option<&'a str>,
}

/// A source of secrets.
///
/// `close` may run on another thread while `read_secret` is blocked, and
/// must make that read return.
pub trait PromptBackend: Send + Sync {
    /// Read one candidate secret.
    fn read_secret(&self, request: &PromptRequest<'_>) -> Result<Credential, PromptError>;

    /// Release the backend. Called at most once.
    fn close(&self) -> Result<(), PromptError>;
}

/// Obtains the user's secret through pinentry or the console.
///
/// Clones share the backend, so one clone can close the agent while another
/// is blocked in [`ask`](Self::ask).
#[derive(Clone)]
pub struct SecureCredentialPrompt {
    backend: Arc<dyn PromptBackend>,
    closed: Arc<AtomicBool>,
}

impl SecureCredentialPrompt {
    /// Open the pinentry agent at `pinentry_path`, or fall back to hidden
    /// console input when `allow_console_fallback` is set and stdout is a
    /// terminal.
    ///
    /// # Errors
    ///
    /// [`PromptError::Unavailable`] when neither source is usable.
    pub fn open(pinentry_path: &str, allow_console_fallback: bool) -> Result<Self, PromptError> {
        match which::which(pinentry_path) {
            Ok(path) => match Pinentry::spawn(&path) {
                Ok(agent) => {
                    tracing::debug!(path = %path.display(), "using pinentry agent");
                    return Ok(Self::with_backend(Arc::new(agent)));
                }
                Err(e) => tracing::warn!(error = %e, "pinentry failed to start"),
            },
            Err(_) => tracing::debug!(pinentry = pinentry_path, "pinentry not found"),
        }

        if allow_console_fallback && std::io::stdout().is_terminal() {
            tracing::debug!("falling back to console password input");
            return Ok(Self::with_backend(Arc::new(ConsolePrompt::new())));
        }

        Err(PromptError::Unavailable)
    }

    /// Use an explicit backend.
    pub fn with_backend(backend: Arc<dyn PromptBackend>) -> Self {
        Self {
            backend,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ask until `validator` accepts a candidate.
    ///
    /// Rejected candidates are dropped (and therefore erased) before the
    /// next round; `error_message` is shown on every retry.
    pub fn ask(
        &self,
        prompt: &str,
        description: Option<&str>,
        error_message: &str,
        validator: impl Fn(&Credential) -> bool,
    ) -> Result<Credential, PromptError> {
        let mut error = None;
        loop {
            if self.is_closed() {
                return Err(PromptError::Closed);
            }
            let candidate = self.backend.read_secret(&PromptRequest {
                prompt,
                description,
                error,
            })?;
            if validator(&candidate) {
                return Ok(candidate);
            }
            error = Some(error_message);
        }
    }

    /// Release the prompt agent, from any clone. Repeated calls are no-ops.
    pub fn close(&self) -> Result<(), PromptError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.backend.close()
    }

    /// `true` after [`close`](Self::close)
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// The default validator: any non-empty secret.
pub fn non_empty(candidate: &Credential) -> bool {
    !candidate.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted {
        answers: Mutex<VecDeque<&'static str>>,
        errors_seen: Arc<Mutex<Vec<Option<String>>>>,
        closes: Arc<Mutex<usize>>,
    }

    impl PromptBackend for Scripted {
        fn read_secret(&self, request: &PromptRequest<'_>) -> Result<Credential, PromptError> {
            self.errors_seen
                .lock()
                .unwrap()
                .push(request.error.map(str::to_string));
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .map(|a| Credential::from_string(a.to_string()))
                .ok_or_else(|| PromptError::Cancelled("script exhausted".into()))
        }

        fn close(&self) -> Result<(), PromptError> {
            *self.closes.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn scripted(
        answers: &[&'static str],
    ) -> (
        SecureCredentialPrompt,
        Arc<Mutex<Vec<Option<String>>>>,
        Arc<Mutex<usize>>,
    ) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let closes = Arc::new(Mutex::new(0));
        let backend = Scripted {
            answers: Mutex::new(answers.iter().copied().collect()),
            errors_seen: errors.clone(),
            closes: closes.clone(),
        };
        (
            SecureCredentialPrompt::with_backend(Arc::new(backend)),
            errors,
            closes,
        )
    }

    #[test]
    fn test_ask_retries_until_valid() {
        let (prompt, errors, _) = scripted(&["", "", "hunter2"]);
        let secret = prompt
            .ask("Password: ", None, "No password entered", non_empty)
            .unwrap();

        assert_eq!(secret.expose(), b"hunter2");
        let errors = errors.lock().unwrap();
        assert_eq!(errors[0], None);
        assert_eq!(errors[1].as_deref(), Some("No password entered"));
        assert_eq!(errors[2].as_deref(), Some("No password entered"));
    }

    #[test]
    fn test_ask_after_close_fails() {
        let (prompt, _, closes) = scripted(&["x"]);
        let other = prompt.clone();
        prompt.close().unwrap();
        other.close().unwrap();
        assert_eq!(*closes.lock().unwrap(), 1);
        assert!(other.is_closed());
        assert!(matches!(
            prompt.ask("p", None, "e", non_empty),
            Err(PromptError::Closed)
        ));
    }

    #[test]
    fn test_backend_error_propagates() {
        let (prompt, _, _) = scripted(&[]);
        assert!(matches!(
            prompt.ask("p", None, "e", non_empty),
            Err(PromptError::Cancelled(_))
        ));
    }

    #[test]
    fn test_zero_is_idempotent_and_erases() {
        let original = b"correct horse".to_vec();
        let mut secret = Credential::new(original.clone());
        secret.zero();
        let first: Vec<u8> = secret.expose().to_vec();
        secret.zero();

        assert!(secret.is_zeroed());
        assert_eq!(secret.expose(), first.as_slice());
        assert_eq!(secret.len(), original.len());
        for (read_back, orig) in secret.expose().iter().zip(&original) {
            assert_ne!(read_back, orig);
        }
    }

    #[test]
    fn test_line_appends_newline() {
        let secret = Credential::from_string("pw".into());
        assert_eq!(secret.line().as_slice(), b"pw\n");
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = Credential::from_string("hunter2".into());
        let shown = format!("{:?}", secret);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("REDACTED"));
    }
}
