//! pinentry agent over the Assuan line protocol

use super::{Credential, PromptBackend, PromptError, PromptRequest};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Mutex;
use zeroize::Zeroizing;

/// Assuan client half: writes commands, reads `OK`/`ERR`/`D` replies.
pub struct AssuanChannel<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> AssuanChannel<R, W> {
    /// Wrap a reply stream and a command stream.
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Consume the server greeting.
    pub fn greet(&mut self) -> Result<(), PromptError> {
        self.expect_ok()
    }

    /// Send one command and wait for its `OK`.
    pub fn command(&mut self, line: &str) -> Result<(), PromptError> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.expect_ok()
    }

    /// `GETPIN`: returns the decoded `D` payload.
    pub fn get_pin(&mut self) -> Result<Credential, PromptError> {
        self.writer.write_all(b"GETPIN\n")?;
        self.writer.flush()?;

        let mut pin = Zeroizing::new(Vec::new());
        loop {
            let line = self.read_line()?;
            if let Some(data) = line.strip_prefix(b"D ") {
                percent_decode_into(data, &mut pin);
            } else if line.starts_with(b"OK") {
                return Ok(Credential::new(std::mem::take(&mut *pin)));
            } else if line.starts_with(b"ERR") {
                return Err(PromptError::Cancelled(lossy(&line)));
            }
            // comments (`#`) and status lines (`S`) are ignored
        }
    }

    fn expect_ok(&mut self) -> Result<(), PromptError> {
        loop {
            let line = self.read_line()?;
            if line.starts_with(b"OK") {
                return Ok(());
            }
            if line.starts_with(b"ERR") {
                return Err(PromptError::Protocol(lossy(&line)));
            }
            if !(line.starts_with(b"#") || line.starts_with(b"S ")) {
                return Err(PromptError::Protocol(format!(
                    "unexpected reply: {}",
                    lossy(&line)
                )));
            }
        }
    }

    fn read_line(&mut self) -> Result<Zeroizing<Vec<u8>>, PromptError> {
        let mut line = Zeroizing::new(Vec::new());
        if self.reader.read_until(b'\n', &mut line)? == 0 {
            return Err(PromptError::Protocol("pinentry closed the connection".into()));
        }
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        Ok(line)
    }
}

/// Terminal settings announced to the agent before the first prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TerminalOptions {
    lc_ctype: String,
    ttyname: Option<String>,
    ttytype: Option<String>,
}

impl TerminalOptions {
    /// Settings for this process: locale and terminal type from the
    /// environment, the tty from `TTY` or else from stdout.
    fn current() -> Self {
        Self::resolve(
            |key| std::env::var(key).ok().filter(|v| !v.is_empty()),
            stdout_tty_name,
        )
    }

    fn resolve(
        env: impl Fn(&str) -> Option<String>,
        stdout_tty: impl FnOnce() -> Option<String>,
    ) -> Self {
        Self {
            lc_ctype: env("LC_CTYPE")
                .or_else(|| env("LC_ALL"))
                .unwrap_or_else(|| "en_US.UTF-8".to_string()),
            ttyname: env("TTY").or_else(stdout_tty),
            ttytype: env("TERM"),
        }
    }
}

/// Path of the terminal on stdout, if stdout is one.
#[cfg(unix)]
fn stdout_tty_name() -> Option<String> {
    use std::io::IsTerminal;
    use std::os::fd::AsFd;

    let stdout = std::io::stdout();
    if !stdout.is_terminal() {
        return None;
    }
    match nix::unistd::ttyname(stdout.as_fd()) {
        Ok(path) => Some(path.to_string_lossy().into_owned()),
        Err(e) => {
            tracing::debug!(error = %e, "no tty name for stdout");
            None
        }
    }
}

#[cfg(not(unix))]
fn stdout_tty_name() -> Option<String> {
    None
}

/// Send the `OPTION` commands for `options`.
pub(crate) fn configure_over<R: BufRead, W: Write>(
    channel: &mut AssuanChannel<R, W>,
    options: &TerminalOptions,
) -> Result<(), PromptError> {
    channel.command(&format!("OPTION lc-ctype={}", options.lc_ctype))?;

    // Not every pinentry understands every option.
    if let Some(tty) = &options.ttyname {
        if let Err(e) = channel.command(&format!("OPTION ttyname={}", tty)) {
            tracing::debug!(error = %e, "pinentry refused ttyname");
        }
    }
    if let Some(term) = &options.ttytype {
        if let Err(e) = channel.command(&format!("OPTION ttytype={}", term)) {
            tracing::debug!(error = %e, "pinentry refused ttytype");
        }
    }
    Ok(())
}

type AgentChannel = AssuanChannel<BufReader<ChildStdout>, ChildStdin>;

/// A running `pinentry` process.
///
/// The dialog and the process sit behind separate locks: killing the
/// process from [`close`](PromptBackend::close) ends a `GETPIN` that another
/// thread is blocked in.
pub struct Pinentry {
    child: Mutex<Child>,
    channel: Mutex<AgentChannel>,
}

impl Pinentry {
    /// Start the agent and configure it for the current terminal.
    pub fn spawn(path: &Path) -> Result<Self, PromptError> {
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(PromptError::Protocol("pinentry pipes unavailable".into()));
        };

        let mut channel = AssuanChannel::new(BufReader::new(stdout), stdin);
        let configured = channel
            .greet()
            .and_then(|()| configure_over(&mut channel, &TerminalOptions::current()));
        if let Err(e) = configured {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }

        Ok(Self {
            child: Mutex::new(child),
            channel: Mutex::new(channel),
        })
    }
}

impl PromptBackend for Pinentry {
    fn read_secret(&self, request: &PromptRequest<'_>) -> Result<Credential, PromptError> {
        let mut channel = self
            .channel
            .lock()
            .map_err(|_| PromptError::Protocol("pinentry dialog poisoned".into()))?;
        ask_over(&mut *channel, request)
    }

    fn close(&self) -> Result<(), PromptError> {
        let mut child = self
            .child
            .lock()
            .map_err(|_| PromptError::Protocol("pinentry process poisoned".into()))?;
        child.kill()?;
        let _ = child.wait();
        Ok(())
    }
}

/// Run one prompt round over an Assuan channel.
pub(crate) fn ask_over<R: BufRead, W: Write>(
    channel: &mut AssuanChannel<R, W>,
    request: &PromptRequest<'_>,
) -> Result<Credential, PromptError> {
    if !request.prompt.is_empty() {
        channel.command(&format!("SETPROMPT {}", escape(request.prompt)))?;
    }
    if let Some(description) = request.description {
        channel.command(&format!("SETDESC {}", escape(description)))?;
    }
    if let Some(error) = request.error {
        channel.command(&format!("SETERROR {}", escape(error)))?;
    }
    channel.get_pin()
}

/// Percent-escape text for an Assuan command argument.
pub(crate) fn escape(text: &str) -> String {
    text.replace('%', "%25")
        .replace('\n', "%0A")
        .replace('\r', "%0D")
}

fn percent_decode_into(data: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < data.len() {
        if data[i] == b'%' && i + 2 < data.len() {
            let hex = std::str::from_utf8(&data[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(data[i]);
        i += 1;
    }
}

fn lossy(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}
