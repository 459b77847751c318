//! Connections: spawning the `ssh` client in a PTY and pumping its output

use crate::result::SessionError;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Size of a single read from the remote side
const READ_BUFFER_SIZE: usize = 4096;

/// A fully assembled client command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshCommand {
    /// Program to run (normally `ssh`)
    pub program: String,
    /// Arguments, in order
    pub args: Vec<String>,
}

impl fmt::Display for SshCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// A live byte stream to a remote shell.
///
/// Output is read on a dedicated thread and delivered in chunks over a
/// channel, so a pattern-wait that times out never loses data: whatever the
/// thread reads afterwards is still there for the next wait.
pub struct Connection {
    pub(crate) output: mpsc::UnboundedReceiver<Vec<u8>>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    child: Option<Box<dyn Child + Send + Sync>>,
    _master: Option<Box<dyn MasterPty + Send>>,
}

impl Connection {
    /// Build a connection from a raw reader/writer pair (no child process).
    ///
    /// Used for scripted remotes in tests and for transports that are not
    /// local processes.
    pub fn from_streams(
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
    ) -> Result<Self, SessionError> {
        Ok(Self {
            output: spawn_reader(reader)?,
            writer: Arc::new(Mutex::new(writer)),
            child: None,
            _master: None,
        })
    }

    /// Write `data` and flush.
    pub(crate) async fn write(&self, data: Vec<u8>) -> Result<(), SessionError> {
        let writer = self.writer.clone();
        let data = zeroize::Zeroizing::new(data);

        tokio::task::spawn_blocking(move || {
            let mut writer = writer.blocking_lock();
            writer.write_all(&data)?;
            writer.flush()
        })
        .await
        .map_err(|e| SessionError::IoError(std::io::Error::other(e)))??;

        Ok(())
    }

    /// `true` while the child process (if any) has not exited.
    pub(crate) fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => true,
        }
    }

    /// Stop the child. With `force` it is killed; otherwise it is sent an
    /// end-of-transmission and left to exit on its own.
    pub(crate) fn terminate(&mut self, force: bool) {
        if !force {
            if let Ok(mut writer) = self.writer.try_lock() {
                let _ = writer.write_all(&[0x04]);
                let _ = writer.flush();
            }
            return;
        }
        if let Some(child) = self.child.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                if let Err(e) = child.kill() {
                    tracing::debug!(error = %e, "kill failed");
                }
            }
        }
        self.output.close();
    }
}

fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, SessionError> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::Builder::new()
        .name("session-reader".to_string())
        .spawn(move || {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // Linux reports EIO once the other side of the PTY hangs up
                        tracing::trace!(error = %e, "reader stopped");
                        break;
                    }
                }
            }
        })
        .map_err(|e| SessionError::SpawnError(e.to_string()))?;

    Ok(rx)
}

/// Opens connections for sessions.
pub trait Connector: Send + Sync {
    /// Start `command` and return the connection to it.
    fn connect(&self, command: &SshCommand, size: PtySize) -> Result<Connection, SessionError>;
}

/// Runs the command in a native pseudo-terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct PtyConnector;

impl Connector for PtyConnector {
    fn connect(&self, command: &SshCommand, size: PtySize) -> Result<Connection, SessionError> {
        let pty_system = native_pty_system();

        let pty_pair = pty_system
            .openpty(size)
            .map_err(|e| SessionError::PtyError(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&command.program);
        cmd.args(&command.args);

        let child = pty_pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnError(e.to_string()))?;
        // the child holds its own copy; ours would keep the PTY open after it exits
        drop(pty_pair.slave);

        let reader = pty_pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::PtyError(e.to_string()))?;
        let writer = pty_pair
            .master
            .take_writer()
            .map_err(|e| SessionError::PtyError(e.to_string()))?;

        Ok(Connection {
            output: spawn_reader(reader)?,
            writer: Arc::new(Mutex::new(writer)),
            child: Some(child),
            _master: Some(pty_pair.master),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_display_quotes_spaced_args() {
        let command = SshCommand {
            program: "ssh".to_string(),
            args: vec![
                "-o".to_string(),
                "LocalForward=8887 127.0.0.1:8887".to_string(),
                "login01".to_string(),
            ],
        };
        assert_eq!(
            command.to_string(),
            "ssh -o 'LocalForward=8887 127.0.0.1:8887' login01"
        );
    }

    #[tokio::test]
    async fn test_stream_connection_delivers_chunks() {
        let reader: Box<dyn Read + Send> = Box::new(std::io::Cursor::new(b"hello".to_vec()));
        let mut connection = Connection::from_streams(reader, Box::new(std::io::sink())).unwrap();

        let mut received = Vec::new();
        while let Some(chunk) = connection.output.recv().await {
            received.extend(chunk);
        }
        assert_eq!(received, b"hello");
    }
}
