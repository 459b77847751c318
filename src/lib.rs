//! jupyter-tunnel: Jupyter on a cluster allocation, reachable from localhost
//!
//! The crate drives `ssh` inside a pseudo-terminal the way the Unix `expect`
//! utility drives interactive programs. One session logs in, requests an
//! interactive allocation with `srun`, and starts Jupyter on the allocated
//! node. A second session forwards the Jupyter port from the login node to
//! that node, and the first session's `LocalForward` carries it home.
//!
//! # Layers
//!
//! - [`Session`]: one remote shell. Send bytes, wait for [`Pattern`]s with a
//!   deadline, hand the terminal to the user.
//! - [`Credential`] and [`SecureCredentialPrompt`]: the password, obtained
//!   through pinentry or the console and zeroed once used.
//! - [`OutputRelay`]: what remote output reaches the user.
//! - [`SessionOrchestrator`]: the two-session workflow and its cleanup.
//!
//! # Waiting for output
//!
//! ```rust,no_run
//! use jupyter_tunnel::{Credential, Pattern, Session, WaitOutcome};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::builder()
//!     .timeout(Duration::from_secs(30))
//!     .option("PubkeyAuthentication", "no")
//!     .build()?;
//!
//! let password = Credential::from_string("hunter2".to_string());
//! session.login("login.example.org", "ab123", &password).await?;
//!
//! session.send_line("hostname").await?;
//! match session.prompt(None).await? {
//!     WaitOutcome::Matched(reply) => println!("{}", reply.before),
//!     WaitOutcome::Timeout { before } => println!("still waiting, saw {:?}", before),
//! }
//!
//! // several candidates, earliest match in the output wins
//! let patterns = [
//!     Pattern::exact("success"),
//!     Pattern::regex(r"error: (\w+)")?,
//!     Pattern::Eof,
//! ];
//! let result = session.expect_any(&patterns).await?;
//! println!("pattern {} matched {:?}", result.pattern_index, result.matched);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod buffer;
mod pattern;
mod result;
mod session;

pub mod cli;
pub mod config;
pub mod credential;
pub mod desktop;
pub mod logging;
pub mod orchestrator;
pub mod relay;
pub mod resolve;
pub mod shutdown;

// Public API exports
pub use config::Config;
pub use credential::{Credential, PromptError, SecureCredentialPrompt};
pub use orchestrator::{SessionOrchestrator, WorkflowError, WorkflowState};
pub use pattern::{Match, Matcher, Pattern};
pub use relay::{OutputRelay, RelayVerdict};
pub use result::{MatchResult, PatternError, SessionError, WaitOutcome};
pub use session::{
    Connection, Connector, HandoffExit, PromptMarker, PtyConnector, Session, SessionBuilder,
    SessionState, SshCommand, SHELL_PROMPT,
};
