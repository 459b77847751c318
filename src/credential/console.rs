//! Hidden console input fallback

use super::{Credential, PromptBackend, PromptError, PromptRequest};
use std::sync::atomic::{AtomicBool, Ordering};

/// Reads the secret from the controlling terminal with echo disabled.
///
/// A read cannot be interrupted, but closing during one puts the terminal
/// modes back the way they were before echo was turned off.
#[derive(Default)]
pub struct ConsolePrompt {
    shown_description: AtomicBool,
    reading: AtomicBool,
    #[cfg(unix)]
    saved: std::sync::Mutex<Option<nix::sys::termios::Termios>>,
}

impl ConsolePrompt {
    /// Create a console prompt
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(unix)]
    fn remember_terminal(&self) {
        use std::os::fd::AsFd;

        let modes = nix::sys::termios::tcgetattr(std::io::stdin().as_fd()).ok();
        if let Ok(mut saved) = self.saved.lock() {
            *saved = modes;
        }
    }

    #[cfg(unix)]
    fn restore_terminal(&self) {
        use nix::sys::termios::{tcsetattr, SetArg};
        use std::os::fd::AsFd;

        let Ok(saved) = self.saved.lock() else {
            return;
        };
        if let Some(modes) = saved.as_ref() {
            if let Err(e) = tcsetattr(std::io::stdin().as_fd(), SetArg::TCSANOW, modes) {
                tracing::warn!(error = %e, "could not restore terminal echo");
            }
        }
    }

    #[cfg(not(unix))]
    fn remember_terminal(&self) {}

    #[cfg(not(unix))]
    fn restore_terminal(&self) {}
}

impl PromptBackend for ConsolePrompt {
    fn read_secret(&self, request: &PromptRequest<'_>) -> Result<Credential, PromptError> {
        if let Some(description) = request
            .description
            .filter(|_| !self.shown_description.swap(true, Ordering::Relaxed))
        {
            eprintln!("{}", description);
        }
        if let Some(error) = request.error {
            eprintln!("{}", error);
        }

        self.remember_terminal();
        self.reading.store(true, Ordering::Release);
        let secret = rpassword::prompt_password(request.prompt);
        self.reading.store(false, Ordering::Release);
        Ok(Credential::from_string(secret?))
    }

    fn close(&self) -> Result<(), PromptError> {
        if self.reading.load(Ordering::Acquire) {
            self.restore_terminal();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_while_idle_leaves_terminal_alone() {
        let prompt = ConsolePrompt::new();
        prompt.close().unwrap();
        prompt.close().unwrap();
        assert!(!prompt.reading.load(Ordering::Acquire));
    }
}
