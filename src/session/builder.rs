//! Session builder for configuration

use crate::buffer::StreamBuffer;
use crate::pattern::Pattern;
use crate::result::SessionError;
use crate::session::{
    Connector, PromptMarker, PtyConnector, Session, SessionState, SHELL_PROMPT,
};
use portable_pty::PtySize;
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for pattern waits (in seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default maximum buffer size (in bytes)
const DEFAULT_MAX_BUFFER_SIZE: usize = 8192;

/// Default PTY rows
const DEFAULT_PTY_ROWS: u16 = 24;

/// Default PTY columns
const DEFAULT_PTY_COLS: u16 = 80;

/// Builder for configuring sessions before they connect.
///
/// # Defaults
///
/// - Program: `ssh`
/// - Timeout: 30 seconds
/// - Max buffer size: 8192 bytes
/// - ANSI stripping: enabled
/// - PTY size: 24 rows × 80 columns
/// - Automatic prompt reset after login: enabled
/// - Connector: [`PtyConnector`]
///
/// # Examples
///
/// ```no_run
/// use jupyter_tunnel::Session;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let session = Session::builder()
///     .name("login")
///     .timeout(Duration::from_secs(60))
///     .option("ForwardX11", "yes")
///     .option("PubkeyAuthentication", "no")
///     .pty_size(40, 120)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SessionBuilder {
    name: String,
    program: String,
    options: Vec<(String, String)>,
    extra_args: Vec<String>,
    connector: Arc<dyn Connector>,
    timeout: Option<Duration>,
    max_buffer_size: usize,
    strip_ansi: bool,
    pty_size: PtySize,
    auto_prompt_reset: bool,
    marker: Option<PromptMarker>,
    prompt: Option<Pattern>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    /// Create a new session builder with default configuration.
    ///
    /// See the [`SessionBuilder`] documentation for default values.
    pub fn new() -> Self {
        Self {
            name: "session".to_string(),
            program: "ssh".to_string(),
            options: Vec::new(),
            extra_args: Vec::new(),
            connector: Arc::new(PtyConnector),
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            strip_ansi: true,
            pty_size: PtySize {
                rows: DEFAULT_PTY_ROWS,
                cols: DEFAULT_PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            },
            auto_prompt_reset: true,
            marker: None,
            prompt: None,
        }
    }

    /// Name used in log records.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Client program to run instead of `ssh`.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Add an `-o key=value` client option.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }

    /// Add a raw client argument, placed after the options.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Open connections through `connector` instead of a local PTY.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Set the timeout for pattern waits.
    ///
    /// If a pattern is not matched within this duration, `expect()` returns a
    /// timeout error unless `Pattern::Timeout` is in the pattern list, and
    /// `await_pattern()` returns a timeout outcome.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Disable timeout (wait indefinitely).
    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Set maximum buffer size in bytes.
    ///
    /// When the buffer grows past this size, old data is discarded a third
    /// of the capacity at a time.
    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    /// Enable or disable ANSI escape sequence stripping before matching.
    ///
    /// The output hook always sees the raw bytes.
    pub fn strip_ansi(mut self, strip: bool) -> Self {
        self.strip_ansi = strip;
        self
    }

    /// Set PTY (terminal) size.
    pub fn pty_size(mut self, rows: u16, cols: u16) -> Self {
        self.pty_size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        self
    }

    /// Replace the shell prompt with the session marker right after login.
    pub fn auto_prompt_reset(mut self, enabled: bool) -> Self {
        self.auto_prompt_reset = enabled;
        self
    }

    /// Use `marker` instead of a freshly generated one.
    pub fn prompt_marker(mut self, marker: PromptMarker) -> Self {
        self.marker = Some(marker);
        self
    }

    /// Initial expected prompt. Defaults to a generic shell prompt.
    pub fn prompt(mut self, pattern: Pattern) -> Self {
        self.prompt = Some(pattern);
        self
    }

    /// Create the session. No connection is opened until
    /// [`Session::login`].
    ///
    /// # Errors
    ///
    /// Returns an error if the default prompt pattern fails to compile.
    pub fn build(self) -> Result<Session, SessionError> {
        let prompt = match self.prompt {
            Some(prompt) => prompt,
            None => Pattern::regex(SHELL_PROMPT)?,
        };

        Ok(Session {
            name: self.name,
            program: self.program,
            options: self.options,
            extra_args: self.extra_args,
            connector: self.connector,
            connection: None,
            state: SessionState::Disconnected,
            buffer: StreamBuffer::new(self.max_buffer_size, self.strip_ansi),
            prompt,
            marker: self.marker.unwrap_or_else(PromptMarker::generate),
            timeout: self.timeout,
            auto_prompt_reset: self.auto_prompt_reset,
            pty_size: self.pty_size,
            output_hook: None,
            eof_reached: false,
        })
    }
}
