//! Scripted remotes standing in for `ssh`

#![allow(dead_code)]

use jupyter_tunnel::{Connection, Connector, SessionError, SshCommand};
use portable_pty::PtySize;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// How long a scripted remote waits for the session to write something.
const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// One step of a scripted remote.
#[derive(Debug, Clone)]
pub enum Step {
    /// Print text.
    Emit(String),
    /// Wait until the session has written text containing this.
    ExpectWrite(String),
    /// Wait for a `PS1='...\$ '` command and answer with that prompt.
    AdoptPrompt,
    /// Print the adopted prompt again.
    Prompt,
    /// Hang up without waiting for the session.
    Close,
}

pub fn emit(text: &str) -> Step {
    Step::Emit(text.to_string())
}

pub fn expect_write(text: &str) -> Step {
    Step::ExpectWrite(text.to_string())
}

struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

struct ChannelWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Remote {
    input: Receiver<Vec<u8>>,
    output: Sender<Vec<u8>>,
    unread: Vec<u8>,
    transcript: Vec<u8>,
    prompt: String,
}

impl Remote {
    fn emit(&self, text: &str) {
        let _ = self.output.send(text.as_bytes().to_vec());
    }

    /// Block until `needle` has been written. Returns what came before it
    /// and consumes through it.
    fn take_until(&mut self, needle: &str) -> Option<Vec<u8>> {
        loop {
            if let Some(pos) = find(&self.unread, needle.as_bytes()) {
                let before = self.unread[..pos].to_vec();
                self.unread.drain(..pos + needle.len());
                return Some(before);
            }
            match self.input.recv_timeout(STEP_TIMEOUT) {
                Ok(data) => {
                    self.transcript.extend_from_slice(&data);
                    self.unread.extend_from_slice(&data);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
    }

    fn adopt_prompt(&mut self) -> bool {
        if self.take_until("PS1='").is_none() {
            return false;
        }
        let Some(marker) = self.take_until("\\$ '") else {
            return false;
        };
        self.prompt = format!("{}$ ", String::from_utf8_lossy(&marker));
        self.emit(&self.prompt.clone());
        true
    }

    fn run(mut self, steps: Vec<Step>) -> Vec<u8> {
        for step in steps {
            let ok = match step {
                Step::Emit(text) => {
                    self.emit(&text);
                    true
                }
                Step::ExpectWrite(text) => self.take_until(&text).is_some(),
                Step::AdoptPrompt => self.adopt_prompt(),
                Step::Prompt => {
                    self.emit(&self.prompt.clone());
                    true
                }
                Step::Close => return self.transcript,
            };
            if !ok {
                return self.transcript;
            }
        }

        // stay connected until the session goes away
        while let Ok(data) = self.input.recv() {
            self.transcript.extend_from_slice(&data);
        }
        self.transcript
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// A connection to a remote that plays `steps`. The handle yields
/// everything the session wrote.
pub fn scripted(steps: Vec<Step>) -> (Connection, JoinHandle<Vec<u8>>) {
    let (output_tx, output_rx) = mpsc::channel();
    let (input_tx, input_rx) = mpsc::channel();

    let remote = Remote {
        input: input_rx,
        output: output_tx,
        unread: Vec::new(),
        transcript: Vec::new(),
        prompt: String::new(),
    };
    let handle = std::thread::spawn(move || remote.run(steps));

    let connection = Connection::from_streams(
        Box::new(ChannelReader {
            rx: output_rx,
            pending: Vec::new(),
        }),
        Box::new(ChannelWriter { tx: input_tx }),
    )
    .unwrap();
    (connection, handle)
}

/// Hands out prepared connections in order and records every command.
#[derive(Default)]
pub struct ScriptedConnector {
    connections: Mutex<VecDeque<Connection>>,
    commands: Mutex<Vec<SshCommand>>,
}

impl ScriptedConnector {
    pub fn new(connections: Vec<Connection>) -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(connections.into()),
            commands: Mutex::new(Vec::new()),
        })
    }

    pub fn commands(&self) -> Vec<SshCommand> {
        self.commands.lock().unwrap().clone()
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, command: &SshCommand, _size: PtySize) -> Result<Connection, SessionError> {
        self.commands.lock().unwrap().push(command.clone());
        self.connections
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SessionError::SpawnError("no scripted remote left".to_string()))
    }
}

/// A writer whose contents can be inspected after being moved away.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The usual password login: prompt, secret, shell prompt.
pub fn password_login(secret: &str) -> Vec<Step> {
    vec![
        emit("ab123@login01's password: "),
        expect_write(&format!("{}\n", secret)),
        emit("Last login: Mon Oct 12 09:14:02 2026\r\n[ab123@login01 ~]$ "),
    ]
}
