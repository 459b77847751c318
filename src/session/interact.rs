//! Handing the remote shell over to the local terminal

use super::{Session, SessionState};
use crate::relay::{OutputRelay, RelayVerdict};
use crate::result::SessionError;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, IsTerminal, Read, Write};
use tokio::sync::mpsc;

/// Why an interactive hand-off ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffExit {
    /// The exit marker showed up in the remote output.
    MarkerFound,
    /// The remote closed its output.
    RemoteClosed,
}

/// Restores cooked mode on drop, including when the hand-off future is
/// dropped mid-flight by a signal.
struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    fn new() -> Self {
        if !io::stdin().is_terminal() {
            return Self { enabled: false };
        }
        match enable_raw_mode() {
            Ok(()) => Self { enabled: true },
            Err(e) => {
                tracing::warn!(error = %e, "could not enable raw mode");
                Self { enabled: false }
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.enabled {
            if let Err(e) = disable_raw_mode() {
                tracing::error!(error = %e, "failed to restore terminal mode");
                let _ = writeln!(io::stderr(), "\r\nWarning: failed to restore terminal mode");
            }
        }
    }
}

enum Event {
    Output(Option<Vec<u8>>),
    Input(Option<Vec<u8>>),
}

fn spawn_stdin_reader() -> io::Result<mpsc::UnboundedReceiver<Vec<u8>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            let mut stdin = io::stdin();
            let mut buf = [0u8; 1024];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        })?;
    Ok(rx)
}

impl Session {
    /// Give the local terminal to the remote shell until `exit_marker`
    /// appears in a single chunk of output or the remote closes.
    ///
    /// Keystrokes are forwarded in raw mode; output is copied to stdout.
    /// The chunk carrying the marker is not shown.
    pub async fn interact(&mut self, exit_marker: &str) -> Result<HandoffExit, SessionError> {
        let input = spawn_stdin_reader()?;
        let _raw = RawModeGuard::new();
        let mut stdout = io::stdout();
        let watcher = OutputRelay::watcher(exit_marker);

        let exit = self.interact_with(input, &mut stdout, &watcher).await;
        tracing::debug!(session = %self.name, ?exit, "hand-off ended");
        exit
    }

    /// Hand-off loop over explicit streams.
    ///
    /// `input` carries keystrokes to forward; remote output goes to `out`
    /// unless `watcher` finds its marker. Output already buffered by earlier
    /// waits is shown first, byte for byte as the remote sent it.
    pub async fn interact_with<W: Write>(
        &mut self,
        mut input: mpsc::UnboundedReceiver<Vec<u8>>,
        out: &mut W,
        watcher: &OutputRelay<io::Sink>,
    ) -> Result<HandoffExit, SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }

        let pending = self.buffer.take_all_raw();
        if !pending.is_empty() && show(watcher, &pending, out)? {
            return Ok(HandoffExit::MarkerFound);
        }

        let mut input_open = true;
        loop {
            let event = {
                let connection = self.connection.as_mut().ok_or(SessionError::NotConnected)?;
                tokio::select! {
                    chunk = connection.output.recv() => Event::Output(chunk),
                    keys = input.recv(), if input_open => Event::Input(keys),
                }
            };

            match event {
                Event::Output(Some(chunk)) => {
                    if show(watcher, &chunk, out)? {
                        return Ok(HandoffExit::MarkerFound);
                    }
                }
                Event::Output(None) => {
                    self.eof_reached = true;
                    return Ok(HandoffExit::RemoteClosed);
                }
                Event::Input(Some(keys)) => self.send(&keys).await?,
                Event::Input(None) => input_open = false,
            }
        }
    }
}

/// Write `chunk` unless it carries the marker. Returns `true` on the marker.
fn show<W: Write>(
    watcher: &OutputRelay<io::Sink>,
    chunk: &[u8],
    out: &mut W,
) -> Result<bool, SessionError> {
    match watcher.exit_on_find(chunk) {
        RelayVerdict::Found => Ok(true),
        RelayVerdict::PassThrough(bytes) => {
            out.write_all(bytes)?;
            out.flush()?;
            Ok(false)
        }
    }
}
