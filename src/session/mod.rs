//! Expect-style driver for one remote shell reached over `ssh`

mod builder;
mod interact;
mod spawn;

pub use builder::SessionBuilder;
pub use interact::HandoffExit;
pub use spawn::{Connection, Connector, PtyConnector, SshCommand};

use crate::buffer::StreamBuffer;
use crate::credential::Credential;
use crate::pattern::{earliest_match, Matcher, Pattern};
use crate::result::{MatchResult, PatternError, SessionError, WaitOutcome};
use portable_pty::PtySize;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Host-key confirmation asked by `ssh` on first contact
const HOST_KEY_PROMPT: &str = r"(?i)are you sure you want to continue connecting";

/// Password (or key passphrase) request
const PASSWORD_PROMPT: &str = r"(?i)(?:password|passphrase for key[^:\r\n]*):\s*";

const PERMISSION_DENIED: &str = r"(?i)permission denied[^\r\n]*";

const CONNECTION_FAILURE: &str = r"(?i)(?:could not resolve hostname|connection refused|connection timed out|no route to host|connection closed by|host key verification failed)[^\r\n]*";

/// A generic shell prompt at the very end of the output seen so far
pub const SHELL_PROMPT: &str = r"[#$%>]\s?\z";

/// Progress of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Built, not yet connected
    Disconnected,
    /// `ssh` is running and the login dialog is in progress
    Authenticating,
    /// Logged in; the shell accepts commands
    Ready,
    /// Closed for good
    Closed,
}

/// A synthetic prompt string unlikely to appear in ordinary output.
///
/// Once installed as `PS1` it lets a pattern-wait tell command completion
/// apart from whatever the command printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMarker(String);

impl PromptMarker {
    /// A fresh marker of the form `[jt-1a2b3c4d]`.
    pub fn generate() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("[jt-{}]", &id[..8]))
    }

    /// Use `marker` verbatim. It must not contain a single quote.
    pub fn new(marker: impl Into<String>) -> Self {
        Self(marker.into())
    }

    /// The marker text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shell command that installs the marker as the prompt.
    ///
    /// The `\$` keeps the echoed command from matching [`pattern`](Self::pattern).
    pub fn set_command(&self) -> String {
        format!("unset PROMPT_COMMAND; PS1='{}\\$ '", self.0)
    }

    /// Pattern matching the rendered prompt for both users and root.
    pub fn pattern(&self) -> Result<Pattern, PatternError> {
        Pattern::literal_then(&self.0, r"[$#] ")
    }

    /// The prompt as an unprivileged shell prints it.
    pub fn rendered(&self) -> String {
        format!("{}$ ", self.0)
    }
}

impl fmt::Display for PromptMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

enum Waited {
    Matched(MatchResult),
    TimedOut { before: String },
    Eof { before: String },
}

/// One interactive connection to a remote shell.
///
/// A session spawns `ssh` through its [`Connector`], logs in, and then
/// cycles through "send, then wait for a pattern" steps. Every wait scans
/// only the output that arrived after the previous match.
///
/// # Examples
///
/// ```no_run
/// use jupyter_tunnel::{Credential, Session, WaitOutcome};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let secret = Credential::from_string("hunter2".to_string());
/// let mut session = Session::builder()
///     .timeout(Duration::from_secs(60))
///     .option("PubkeyAuthentication", "no")
///     .build()?;
///
/// session.login("login.example.org", "alice", &secret).await?;
/// session.send_line("echo $HOSTNAME").await?;
/// if let WaitOutcome::Matched(reply) = session.prompt(None).await? {
///     println!("{}", reply.before);
/// }
/// session.close(true);
/// # Ok(())
/// # }
/// ```
pub struct Session {
    name: String,
    program: String,
    options: Vec<(String, String)>,
    extra_args: Vec<String>,
    connector: Arc<dyn Connector>,
    connection: Option<Connection>,
    state: SessionState,
    buffer: StreamBuffer,
    prompt: Pattern,
    marker: PromptMarker,
    timeout: Option<Duration>,
    auto_prompt_reset: bool,
    pty_size: PtySize,
    output_hook: Option<Box<dyn Write + Send>>,
    eof_reached: bool,
}

impl Session {
    /// Create a new session builder.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Name used in log records
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// `true` once [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// The marker this session installs with [`set_unique_prompt`](Self::set_unique_prompt)
    pub fn marker(&self) -> &PromptMarker {
        &self.marker
    }

    /// Default timeout for waits
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Change the default timeout for waits.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Pattern that [`prompt`](Self::prompt) waits for
    pub fn expected_prompt(&self) -> &Pattern {
        &self.prompt
    }

    /// Replace the pattern that [`prompt`](Self::prompt) waits for.
    pub fn set_prompt(&mut self, pattern: Pattern) {
        tracing::trace!(session = %self.name, prompt = %pattern.describe(), "expected prompt changed");
        self.prompt = pattern;
    }

    /// Install (or with `None`, remove) a writer that receives every raw
    /// chunk read during waits. The previous hook is returned.
    pub fn set_output_hook(
        &mut self,
        hook: Option<Box<dyn Write + Send>>,
    ) -> Option<Box<dyn Write + Send>> {
        std::mem::replace(&mut self.output_hook, hook)
    }

    /// The client command line for `user@host` with this session's options.
    ///
    /// `-q` keeps banners quiet; options become `-o Key=Value` pairs.
    pub fn ssh_command(&self, host: &str, user: &str) -> SshCommand {
        let mut args = vec!["-q".to_string()];
        for (key, value) in &self.options {
            args.push("-o".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.extend(self.extra_args.iter().cloned());
        args.extend(["-l".to_string(), user.to_string(), host.to_string()]);

        SshCommand {
            program: self.program.clone(),
            args,
        }
    }

    /// Connect to `host` as `user` and authenticate with `secret`.
    ///
    /// The host-key question is answered with `yes` and the secret is sent
    /// once, at the first password prompt. A second password prompt,
    /// `Permission denied`, or the connection closing after the password
    /// was sent is an [`SessionError::Authentication`]; nothing is retried.
    /// If the remote stays quiet after the password the login counts as
    /// successful. With automatic prompt reset the shell prompt is then
    /// replaced by the session's marker.
    ///
    /// On failure the session is closed.
    pub async fn login(
        &mut self,
        host: &str,
        user: &str,
        secret: &Credential,
    ) -> Result<(), SessionError> {
        match self.state {
            SessionState::Disconnected => {}
            SessionState::Closed => return Err(SessionError::Closed),
            SessionState::Authenticating | SessionState::Ready => {
                return Err(SessionError::AlreadyConnected)
            }
        }

        let command = self.ssh_command(host, user);
        tracing::info!(session = %self.name, %command, "connecting");

        let result = self.authenticate(&command, host, secret).await;
        if let Err(e) = &result {
            tracing::warn!(session = %self.name, error = %e, "login failed");
            self.close(true);
        }
        result
    }

    async fn authenticate(
        &mut self,
        command: &SshCommand,
        host: &str,
        secret: &Credential,
    ) -> Result<(), SessionError> {
        self.connection = Some(self.connector.connect(command, self.pty_size)?);
        self.eof_reached = false;
        self.state = SessionState::Authenticating;

        let patterns = [
            Pattern::regex(HOST_KEY_PROMPT)?,
            Pattern::regex(PASSWORD_PROMPT)?,
            Pattern::regex(PERMISSION_DENIED)?,
            Pattern::regex(CONNECTION_FAILURE)?,
            Pattern::regex(SHELL_PROMPT)?,
            Pattern::Eof,
            Pattern::Timeout,
        ];

        let mut password_sent = false;
        loop {
            let step = self.expect_any(&patterns).await?;
            match step.pattern_index {
                0 => {
                    tracing::debug!(session = %self.name, "accepting host key");
                    self.send_line("yes").await?;
                }
                1 if password_sent => {
                    return Err(SessionError::Authentication {
                        host: host.to_string(),
                        reason: "password rejected".to_string(),
                    });
                }
                1 => {
                    tracing::debug!(session = %self.name, "sending password");
                    self.send_secret(secret).await?;
                    password_sent = true;
                }
                2 => {
                    return Err(SessionError::Authentication {
                        host: host.to_string(),
                        reason: step.matched.trim().to_string(),
                    });
                }
                3 => {
                    return Err(SessionError::Connection {
                        host: host.to_string(),
                        reason: step.matched.trim().to_string(),
                    });
                }
                4 => break,
                5 if password_sent => {
                    return Err(SessionError::Authentication {
                        host: host.to_string(),
                        reason: "connection closed after password".to_string(),
                    });
                }
                5 => {
                    return Err(SessionError::Connection {
                        host: host.to_string(),
                        reason: last_line(&step.before)
                            .unwrap_or("connection closed")
                            .to_string(),
                    });
                }
                _ if password_sent => {
                    // no prompt recognised, but nothing refused us either
                    tracing::debug!(session = %self.name, "quiet after password, assuming logged in");
                    break;
                }
                _ => {
                    return Err(SessionError::Connection {
                        host: host.to_string(),
                        reason: "no login prompt before timeout".to_string(),
                    });
                }
            }
        }

        self.state = SessionState::Ready;
        tracing::info!(session = %self.name, host, "logged in");

        if self.auto_prompt_reset {
            self.set_unique_prompt().await?;
        }
        Ok(())
    }

    /// Install the session marker as `PS1` and make it the expected prompt.
    ///
    /// # Errors
    ///
    /// [`SessionError::Timeout`] if the new prompt never shows up.
    pub async fn set_unique_prompt(&mut self) -> Result<(), SessionError> {
        let pattern = self.marker.pattern()?;
        let command = self.marker.set_command();
        self.send_line(&command).await?;

        match self.await_pattern(&pattern, None).await? {
            WaitOutcome::Matched(_) => {
                self.set_prompt(pattern);
                Ok(())
            }
            WaitOutcome::Timeout { .. } => Err(SessionError::Timeout {
                duration: self.timeout.unwrap_or_default(),
            }),
        }
    }

    /// Send raw bytes.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), SessionError> {
        self.live_connection()?.write(data.to_vec()).await
    }

    /// Send `line` followed by a newline.
    pub async fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.live_connection()?.write(data).await
    }

    /// Send a secret followed by a newline. The secret never reaches the
    /// output hook or the log.
    pub async fn send_secret(&mut self, secret: &Credential) -> Result<(), SessionError> {
        let line = secret.line();
        self.live_connection()?.write(line.to_vec()).await
    }

    fn live_connection(&self) -> Result<&Connection, SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }
        self.connection.as_ref().ok_or(SessionError::NotConnected)
    }

    /// Wait for a single pattern with the session timeout.
    ///
    /// # Errors
    ///
    /// [`SessionError::Timeout`] or [`SessionError::Eof`] unless the pattern
    /// itself is [`Pattern::Timeout`] or [`Pattern::Eof`].
    pub async fn expect(&mut self, pattern: Pattern) -> Result<MatchResult, SessionError> {
        self.expect_any(std::slice::from_ref(&pattern)).await
    }

    /// Wait for whichever pattern appears first in the output.
    ///
    /// When several match, the one starting earliest wins; ties go to the
    /// pattern listed first. [`Pattern::Eof`] and [`Pattern::Timeout`] turn
    /// those conditions into a match with an empty `matched`.
    pub async fn expect_any(&mut self, patterns: &[Pattern]) -> Result<MatchResult, SessionError> {
        let timeout = self.timeout;
        let special = |wanted: fn(&Pattern) -> bool| patterns.iter().position(wanted);

        match self.wait_for(patterns, timeout).await? {
            Waited::Matched(result) => Ok(result),
            Waited::TimedOut { before } => match special(|p| matches!(p, Pattern::Timeout)) {
                Some(pattern_index) => Ok(condition_match(pattern_index, before)),
                None => Err(SessionError::Timeout {
                    duration: timeout.unwrap_or_default(),
                }),
            },
            Waited::Eof { before } => match special(|p| matches!(p, Pattern::Eof)) {
                Some(pattern_index) => Ok(condition_match(pattern_index, before)),
                None => Err(SessionError::Eof),
            },
        }
    }

    /// Wait for `pattern`; running out of time is an outcome, not an error.
    ///
    /// `timeout` overrides the session default for this wait only. On
    /// timeout nothing is consumed, so the next wait sees the same output.
    ///
    /// # Errors
    ///
    /// [`SessionError::Eof`] when the remote closes before the pattern shows up.
    pub async fn await_pattern(
        &mut self,
        pattern: &Pattern,
        timeout: Option<Duration>,
    ) -> Result<WaitOutcome, SessionError> {
        let timeout = timeout.or(self.timeout);
        match self.wait_for(std::slice::from_ref(pattern), timeout).await? {
            Waited::Matched(result) => Ok(WaitOutcome::Matched(result)),
            Waited::TimedOut { before } => {
                tracing::debug!(
                    session = %self.name,
                    pattern = %pattern.describe(),
                    ?timeout,
                    "wait timed out"
                );
                Ok(WaitOutcome::Timeout { before })
            }
            Waited::Eof { before } if matches!(pattern, Pattern::Eof) => {
                Ok(WaitOutcome::Matched(condition_match(0, before)))
            }
            Waited::Eof { .. } => Err(SessionError::Eof),
        }
    }

    /// Wait for the expected prompt (see [`set_prompt`](Self::set_prompt)).
    pub async fn prompt(&mut self, timeout: Option<Duration>) -> Result<WaitOutcome, SessionError> {
        let pattern = self.prompt.clone();
        self.await_pattern(&pattern, timeout).await
    }

    /// Consume prompts until one wait of `timeout` passes without any.
    /// Returns how many were drained.
    pub async fn digest_pending_prompts(&mut self, timeout: Duration) -> Result<usize, SessionError> {
        let mut drained = 0;
        while self.prompt(Some(timeout)).await?.is_match() {
            drained += 1;
        }
        tracing::trace!(session = %self.name, drained, "prompts digested");
        Ok(drained)
    }

    async fn wait_for(
        &mut self,
        patterns: &[Pattern],
        timeout: Option<Duration>,
    ) -> Result<Waited, SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }

        let mut matchers: Vec<(usize, Box<dyn Matcher>)> = Vec::new();
        for (idx, pattern) in patterns.iter().enumerate() {
            if !pattern.is_special() {
                matchers.push((idx, pattern.to_matcher()?));
            }
        }
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if let Some((pattern_index, m)) = earliest_match(&matchers, self.buffer.pending()) {
                let consumed = self.buffer.consume(m.end);
                return Ok(Waited::Matched(MatchResult {
                    pattern_index,
                    matched: lossy(&consumed[m.start..m.end]),
                    before: lossy(&consumed[..m.start]),
                    captures: m.captures,
                }));
            }

            if self.eof_reached {
                return Ok(Waited::Eof {
                    before: lossy(&self.buffer.take_all()),
                });
            }

            let chunk = {
                let connection = self.connection.as_mut().ok_or(SessionError::NotConnected)?;
                match deadline {
                    Some(deadline) => {
                        match tokio::time::timeout_at(deadline, connection.output.recv()).await {
                            Ok(chunk) => chunk,
                            Err(_) => {
                                return Ok(Waited::TimedOut {
                                    before: lossy(self.buffer.pending()),
                                })
                            }
                        }
                    }
                    None => connection.output.recv().await,
                }
            };

            match chunk {
                Some(chunk) => self.ingest(&chunk),
                None => {
                    tracing::debug!(session = %self.name, "remote closed its output");
                    self.eof_reached = true;
                }
            }
        }
    }

    fn ingest(&mut self, chunk: &[u8]) {
        if let Some(hook) = self.output_hook.as_mut() {
            if let Err(e) = hook.write_all(chunk).and_then(|()| hook.flush()) {
                tracing::debug!(session = %self.name, error = %e, "output hook failed");
            }
        }
        let discarded = self.buffer.append(chunk);
        if discarded > 0 {
            tracing::trace!(session = %self.name, discarded, "buffer compacted");
        }
    }

    /// `true` while connected and the remote has not closed its output.
    pub fn is_alive(&mut self) -> bool {
        if self.state == SessionState::Closed || self.eof_reached {
            return false;
        }
        self.connection.as_mut().is_some_and(Connection::is_alive)
    }

    /// Close the connection. With `force` the `ssh` process is killed.
    ///
    /// Repeated calls are no-ops and nothing here can fail.
    pub fn close(&mut self, force: bool) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Some(mut connection) = self.connection.take() {
            tracing::debug!(session = %self.name, force, "closing connection");
            connection.terminate(force);
        }
        self.output_hook = None;
        self.state = SessionState::Closed;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close(true);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("prompt", &self.prompt.describe())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn condition_match(pattern_index: usize, before: String) -> MatchResult {
    MatchResult {
        pattern_index,
        matched: String::new(),
        before,
        captures: vec![],
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}
