//! Exactly-once cleanup and termination signals

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One-shot "cleanup has started" flag shared by every exit path.
#[derive(Debug, Clone, Default)]
pub struct ShutdownGuard {
    started: Arc<AtomicBool>,
}

impl ShutdownGuard {
    /// A guard that has not fired yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the cleanup. Only the first caller gets `true`.
    pub fn try_begin(&self) -> bool {
        self.started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `true` once some caller has claimed the cleanup
    pub fn has_begun(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

/// A termination signal the workflow reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT, or Ctrl-C on platforms without Unix signals
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGHUP
    Hangup,
    /// SIGQUIT
    Quit,
}

impl Signal {
    /// Conventional signal number
    pub fn number(self) -> i32 {
        match self {
            Signal::Hangup => 1,
            Signal::Interrupt => 2,
            Signal::Quit => 3,
            Signal::Terminate => 15,
        }
    }

    /// Exit code of a process terminated by this signal (`128 + signo`).
    pub fn exit_code(self) -> i32 {
        128 + self.number()
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Hangup => "SIGHUP",
            Signal::Quit => "SIGQUIT",
        };
        f.write_str(name)
    }
}

/// Registered signal handlers. Must be created inside a tokio runtime.
#[cfg(unix)]
pub struct SignalListener {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    /// Install handlers for SIGINT, SIGTERM, SIGHUP and SIGQUIT.
    pub fn register() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    /// Wait for the next signal.
    pub async fn recv(&mut self) -> Signal {
        tokio::select! {
            _ = self.interrupt.recv() => Signal::Interrupt,
            _ = self.terminate.recv() => Signal::Terminate,
            _ = self.hangup.recv() => Signal::Hangup,
            _ = self.quit.recv() => Signal::Quit,
        }
    }
}

/// Registered signal handlers. Must be created inside a tokio runtime.
#[cfg(not(unix))]
pub struct SignalListener {
    _private: (),
}

#[cfg(not(unix))]
impl SignalListener {
    /// Nothing to install up front; Ctrl-C is awaited directly.
    pub fn register() -> io::Result<Self> {
        Ok(Self { _private: () })
    }

    /// Wait for Ctrl-C.
    pub async fn recv(&mut self) -> Signal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler failed");
            std::future::pending::<()>().await;
        }
        Signal::Interrupt
    }
}
