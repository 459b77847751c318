//! The two-session workflow: allocate, launch, tunnel, hand off
//!
//! [`SessionOrchestrator`] owns both sessions and the credential. It drives
//! the first session through login, the `srun` allocation and the Jupyter
//! launch, then the second session through the port forward, and finally
//! hands the terminal to the first session. Whatever happens,
//! [`SessionOrchestrator::cleanup`] releases everything exactly once.

mod commands;
mod console;
mod state;

pub use commands::{
    allocation_command, banner_pattern, extract_address, extract_reply, password_pattern,
    service_command, setup_commands, shell_quote, tunnel_command,
};
pub use console::Console;
pub use state::WorkflowState;

use crate::config::Config;
use crate::credential::{non_empty, Credential, PromptError, SecureCredentialPrompt};
use crate::desktop::{Desktop, SystemDesktop};
use crate::relay::OutputRelay;
use crate::resolve::{FallbackResolver, HostResolver, ResolveError, Resolved};
use crate::result::{PatternError, SessionError, WaitOutcome};
use crate::session::{Connector, HandoffExit, PtyConnector, Session, SessionBuilder};
use crate::shutdown::{ShutdownGuard, Signal};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

const PASSPHRASE_PROMPT: &str = "Enter your passphrase: ";
const NO_PASSWORD: &str = "No password entered";

/// How long each wait may take while draining prompts on the tunnel session
const DIGEST_TIMEOUT: Duration = Duration::from_millis(100);

/// Marker that relays allocation diagnostics to the user
const SRUN_PREFIX: &str = "srun";

/// Why the workflow stopped.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// A host name could not be resolved.
    #[error("could not resolve {host}: {reason}")]
    Resolution {
        /// Host that failed
        host: String,
        /// Resolver diagnostic
        reason: String,
    },

    /// A host rejected the credential.
    #[error("authentication to {host} failed: {reason}")]
    Authentication {
        /// Host that refused
        host: String,
        /// What it said
        reason: String,
    },

    /// Expected output never arrived.
    #[error("timed out waiting for {step}")]
    PatternTimeout {
        /// What was being waited for
        step: &'static str,
    },

    /// No credential could be obtained.
    #[error(transparent)]
    Prompt(#[from] PromptError),

    /// Jupyter never printed its address.
    #[error("jupyter did not report its address within {timeout:?}")]
    LaunchFailure {
        /// How long we waited
        timeout: Duration,
    },

    /// A command round trip produced no output line.
    #[error("no reply to `{command}`")]
    MissingReply {
        /// The command that was sent
        command: String,
    },

    /// Any other session failure.
    #[error(transparent)]
    Session(SessionError),

    /// A termination signal arrived.
    #[error("interrupted by {0}")]
    Interrupted(Signal),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl WorkflowError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            WorkflowError::Interrupted(signal) => signal.exit_code(),
            _ => 1,
        }
    }
}

impl From<SessionError> for WorkflowError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Authentication { host, reason } => {
                WorkflowError::Authentication { host, reason }
            }
            other => WorkflowError::Session(other),
        }
    }
}

impl From<PatternError> for WorkflowError {
    fn from(e: PatternError) -> Self {
        WorkflowError::Session(SessionError::PatternError(e))
    }
}

impl From<ResolveError> for WorkflowError {
    fn from(e: ResolveError) -> Self {
        WorkflowError::Resolution {
            host: e.host,
            reason: e.reason,
        }
    }
}

/// Everything the workflow reaches outside this process.
#[derive(Clone)]
pub struct Collaborators {
    /// Resolves login host names
    pub resolver: Arc<dyn HostResolver>,
    /// Opens the browser and handles the X server
    pub desktop: Arc<dyn Desktop>,
    /// Starts `ssh`
    pub connector: Arc<dyn Connector>,
}

impl Collaborators {
    /// The real system: DNS with the configured fallback nameservers, the
    /// desktop, `ssh` in a PTY.
    pub fn system(config: &Config) -> Self {
        Self {
            resolver: Arc::new(FallbackResolver::from_nameservers(
                &config.connection.nameservers,
            )),
            desktop: Arc::new(SystemDesktop),
            connector: Arc::new(PtyConnector),
        }
    }
}

/// Where [`SessionOrchestrator::prepare`] left off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prepared {
    /// Jupyter is up and tunnelled to this machine.
    Tunnelled {
        /// The address Jupyter printed
        address: String,
    },
    /// Jupyter never reported an address; keep-alive asked for a shell anyway.
    Interactive,
}

/// Sequences the workflow and owns every resource it opens.
pub struct SessionOrchestrator {
    config: Config,
    collaborators: Collaborators,
    console: Console,
    guard: ShutdownGuard,
    state: WorkflowState,
    states: watch::Sender<WorkflowState>,
    prompt: Option<SecureCredentialPrompt>,
    credential: Option<Credential>,
    login: Option<Session>,
    tunnel: Option<Session>,
}

impl SessionOrchestrator {
    /// Create an orchestrator. Nothing is opened yet.
    pub fn new(config: Config, collaborators: Collaborators, console: Console) -> Self {
        Self {
            config,
            collaborators,
            console,
            guard: ShutdownGuard::new(),
            state: WorkflowState::Unauthenticated,
            states: watch::channel(WorkflowState::Unauthenticated).0,
            prompt: None,
            credential: None,
            login: None,
            tunnel: None,
        }
    }

    /// Use `credential` instead of asking for one.
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Ask through `prompt` instead of opening pinentry.
    pub fn with_prompt(mut self, prompt: SecureCredentialPrompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// The one-shot flag guarding [`cleanup`](Self::cleanup).
    pub fn shutdown_guard(&self) -> ShutdownGuard {
        self.guard.clone()
    }

    /// Current workflow state
    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Follow state changes as they happen.
    pub fn subscribe_state(&self) -> watch::Receiver<WorkflowState> {
        self.states.subscribe()
    }

    /// The configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The credential, once acquired
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// The allocation session, once created
    pub fn login_session(&self) -> Option<&Session> {
        self.login.as_ref()
    }

    /// The tunnel session, once created
    pub fn tunnel_session(&self) -> Option<&Session> {
        self.tunnel.as_ref()
    }

    fn transition(&mut self, next: WorkflowState) {
        let from = self.state;
        if self.state.advance(next) {
            tracing::info!(%from, to = %next, "workflow state");
            self.states.send_replace(next);
        }
    }

    /// Resolve `host`, telling the user when a fallback nameserver had to
    /// answer. Returns what to hand to `ssh`.
    async fn resolve_host(&self, host: &str) -> Result<String, WorkflowError> {
        let resolved = self.collaborators.resolver.resolve(host).await?;
        if let Resolved::Fallback {
            address,
            nameservers,
        } = &resolved
        {
            self.console.say(&format!(
                "Could not resolve {} locally. Tried nameservers: {}\nFound IP: {}",
                host,
                nameservers.join(", "),
                address
            ));
        }
        Ok(resolved.target())
    }

    /// Obtain the password unless one is already held.
    ///
    /// The dialog runs on the blocking pool, so this future can be dropped
    /// while the user is still typing; [`cleanup`](Self::cleanup) then closes
    /// the agent. Otherwise the agent is released as soon as it has answered.
    pub async fn acquire_credential(&mut self) -> Result<(), WorkflowError> {
        if self.credential.is_some() {
            return Ok(());
        }

        if self.prompt.is_none() {
            let settings = &self.config.credential;
            self.prompt = Some(SecureCredentialPrompt::open(
                &settings.pinentry,
                settings.console_fallback,
            )?);
        }
        let prompt = self
            .prompt
            .clone()
            .ok_or(WorkflowError::Prompt(PromptError::Unavailable))?;

        let description = format!(
            "Connect to {} for jupyter {}",
            self.config.connection.host, self.config.jupyter.subcommand
        );
        let asking = prompt.clone();
        let answer = tokio::task::spawn_blocking(move || {
            asking.ask(PASSPHRASE_PROMPT, Some(&description), NO_PASSWORD, non_empty)
        })
        .await
        .map_err(|e| PromptError::Io(io::Error::other(e)))?;
        if let Err(e) = prompt.close() {
            tracing::debug!(error = %e, "closing prompt failed");
        }

        self.credential = Some(answer?);
        Ok(())
    }

    fn primary_builder(&self) -> SessionBuilder {
        let port = self.config.jupyter.port;
        let mut builder = Session::builder()
            .name("login")
            .connector(self.collaborators.connector.clone())
            .timeout(self.config.connection.login_timeout())
            .option("ForwardX11", "yes");
        if self.config.connection.trusted_x11 {
            builder = builder.option("ForwardX11Trusted", "yes");
        }
        builder = builder
            .option("LocalForward", format!("{} 127.0.0.1:{}", port, port))
            .option("PubkeyAuthentication", "no");

        // the hand-off later shows the remote shell at the local size
        match crossterm::terminal::size() {
            Ok((cols, rows)) if cols > 0 && rows > 0 => builder.pty_size(rows, cols),
            _ => builder,
        }
    }

    fn secondary_builder(&self) -> SessionBuilder {
        Session::builder()
            .name("tunnel")
            .connector(self.collaborators.connector.clone())
            .timeout(self.config.connection.tunnel_timeout())
            .option("PubkeyAuthentication", "no")
    }

    /// Run everything up to the hand-off.
    ///
    /// Returns the Jupyter address, or [`Prepared::Interactive`] when the
    /// launch timed out and keep-alive is set.
    pub async fn prepare(&mut self) -> Result<Prepared, WorkflowError> {
        let user = self.config.connection.user.clone();
        let port = self.config.jupyter.port;
        let console = self.console.clone();

        // 1. first login
        let host = self.resolve_host(&self.config.connection.host).await?;
        console.say(&format!("ssh {}@{}", user, host));
        let session = self.primary_builder().build()?;
        let session = self.login.insert(session);
        let secret = live_secret(&self.credential)?;
        session.login(&host, &user, secret).await?;
        self.transition(WorkflowState::LoggedInPrimary);

        // 2. which login node we landed on
        let session = open_session(&mut self.login)?;
        let login_node = round_trip(session, commands::LOGIN_HOSTNAME, "the login node name").await?;
        console.say(&format!("hostname: {}", login_node));

        // 3. allocation; only srun diagnostics reach the user
        let session = open_session(&mut self.login)?;
        session.set_output_hook(Some(Box::new(OutputRelay::new(console.clone(), SRUN_PREFIX))));
        session
            .send_line(&allocation_command(&self.config.allocation))
            .await?;
        self.transition(WorkflowState::AllocationRequested);

        let session = open_session(&mut self.login)?;
        session.set_prompt(password_pattern()?);
        if let WaitOutcome::Timeout { .. } = session.prompt(None).await? {
            console.say("the timeout was reached.");
            return Err(WorkflowError::PatternTimeout {
                step: "the allocation password prompt",
            });
        }

        // 4. authenticate the allocation and mark its prompt
        session.set_output_hook(None);
        let secret = live_secret(&self.credential)?;
        let session = open_session(&mut self.login)?;
        session.send_secret(secret).await?;
        session.set_unique_prompt().await?;

        // 5. the allocated node
        let node = round_trip(session, commands::NODE_HOSTNAME, "the allocation node name").await?;
        console.say(&format!("interactive host: {}", node));

        // 6. environment
        for command in setup_commands(&self.config.jupyter) {
            tracing::debug!(%command, "environment setup");
            session.send_line(&command).await?;
            if !session.prompt(None).await?.is_match() {
                return Err(WorkflowError::PatternTimeout {
                    step: "environment setup",
                });
            }
        }

        // 7. launch and wait for the banner, showing Jupyter's own output
        session
            .send_line(&service_command(&self.config.jupyter.subcommand, port))
            .await?;
        self.transition(WorkflowState::ServiceLaunching);

        let launch_timeout = self.config.jupyter.launch_timeout();
        let session = open_session(&mut self.login)?;
        session.set_output_hook(Some(Box::new(console.clone())));
        session.set_prompt(banner_pattern(port)?);
        let banner = session.prompt(Some(launch_timeout)).await?;
        session.set_output_hook(None);

        let banner = match banner {
            WaitOutcome::Matched(banner) => banner,
            WaitOutcome::Timeout { .. } if self.config.jupyter.keepalive => {
                tracing::warn!(?launch_timeout, "no address from jupyter, staying interactive");
                console.say("\nJupyter did not report an address; keeping the session open.");
                self.transition(WorkflowState::Interactive);
                return Ok(Prepared::Interactive);
            }
            WaitOutcome::Timeout { .. } => {
                return Err(WorkflowError::LaunchFailure {
                    timeout: launch_timeout,
                })
            }
        };

        // 8. the address
        let address = extract_address(&banner).ok_or(WorkflowError::LaunchFailure {
            timeout: launch_timeout,
        })?;
        self.transition(WorkflowState::ServiceReady);

        // 9. second login, to the same login node
        let login_host = self.resolve_host(&login_node).await?;
        console.say(&format!("\nssh {}@{}", user, login_host));
        let tunnel = self.secondary_builder().build()?;
        let tunnel = self.tunnel.insert(tunnel);
        let secret = live_secret(&self.credential)?;
        tunnel.login(&login_host, &user, secret).await?;
        tunnel.digest_pending_prompts(DIGEST_TIMEOUT).await?;
        self.transition(WorkflowState::LoggedInSecondary);

        // 10. forward the port, then the password is never needed again
        let forward = tunnel_command(port, &node);
        console.say(&format!("\n{}", forward));
        let tunnel = open_session(&mut self.tunnel)?;
        tunnel.set_prompt(password_pattern()?);
        tunnel.send_line(&forward).await?;
        if let WaitOutcome::Timeout { .. } = tunnel.prompt(None).await? {
            console.say("the timeout was reached.");
            return Err(WorkflowError::PatternTimeout {
                step: "the tunnel password prompt",
            });
        }
        let secret = live_secret(&self.credential)?;
        open_session(&mut self.tunnel)?.send_secret(secret).await?;
        if let Some(credential) = self.credential.as_mut() {
            credential.zero();
        }
        self.transition(WorkflowState::TunnelEstablished);

        // 11. tell the user
        console.say(&format!(
            "\nJupyter is ready! Access at:\n{}\nOpening in browser...",
            address
        ));
        let desktop = &self.collaborators.desktop;
        if self.config.desktop.open_browser {
            if let Err(e) = desktop.open_url(&address) {
                tracing::warn!(error = %e, "could not open a browser");
            }
        }
        if self.config.desktop.quit_xquartz {
            if let Err(e) = desktop.quit_idle_x_server() {
                tracing::debug!(error = %e, "could not check XQuartz");
            }
        }

        Ok(Prepared::Tunnelled { address })
    }

    /// Text whose appearance ends the hand-off.
    ///
    /// With keep-alive that is the user logging out of the marker shell,
    /// otherwise the marker prompt coming back after Jupyter exits.
    pub fn exit_marker(&self) -> Result<String, WorkflowError> {
        let session = self
            .login
            .as_ref()
            .ok_or(WorkflowError::Session(SessionError::NotConnected))?;
        let prompt = session.marker().rendered();
        Ok(if self.config.jupyter.keepalive {
            format!("{}logout", prompt)
        } else {
            prompt
        })
    }

    /// Give the terminal to the allocation shell (step 12).
    pub async fn hand_off(&mut self) -> Result<HandoffExit, WorkflowError> {
        let exit_marker = self.exit_marker()?;
        self.transition(WorkflowState::Interactive);
        let session = open_session(&mut self.login)?;
        Ok(session.interact(&exit_marker).await?)
    }

    /// [`hand_off`](Self::hand_off) over explicit streams.
    pub async fn hand_off_with<W: Write>(
        &mut self,
        input: mpsc::UnboundedReceiver<Vec<u8>>,
        out: &mut W,
    ) -> Result<HandoffExit, WorkflowError> {
        let watcher = OutputRelay::<io::Sink>::watcher(self.exit_marker()?);
        self.transition(WorkflowState::Interactive);
        let session = open_session(&mut self.login)?;
        Ok(session.interact_with(input, out, &watcher).await?)
    }

    /// The whole workflow: credential, preparation, hand-off.
    pub async fn run(&mut self) -> Result<HandoffExit, WorkflowError> {
        self.acquire_credential().await?;
        if let Prepared::Tunnelled { address } = self.prepare().await? {
            tracing::debug!(%address, "tunnel ready");
        }
        self.hand_off().await
    }

    /// Release everything, exactly once.
    ///
    /// Order: zero the credential, close the prompt agent, force-close the
    /// allocation session, force-close the tunnel session. No step can stop
    /// the next one and nothing propagates out. Later calls return at once.
    pub fn cleanup(&mut self) {
        if !self.guard.try_begin() {
            return;
        }
        tracing::debug!(state = %self.state, "cleaning up");

        if let Some(credential) = self.credential.as_mut() {
            credential.zero();
        }
        if let Some(prompt) = self.prompt.as_ref() {
            if let Err(e) = prompt.close() {
                tracing::debug!(error = %e, "closing prompt failed");
            }
        }
        for session in [self.login.as_mut(), self.tunnel.as_mut()].into_iter().flatten() {
            if !session.is_closed() {
                tracing::info!(session = session.name(), "closing session");
            }
            session.close(true);
        }

        self.transition(WorkflowState::Closed);
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn open_session(slot: &mut Option<Session>) -> Result<&mut Session, WorkflowError> {
    slot.as_mut()
        .ok_or(WorkflowError::Session(SessionError::NotConnected))
}

fn live_secret(slot: &Option<Credential>) -> Result<&Credential, WorkflowError> {
    slot.as_ref()
        .filter(|c| !c.is_zeroed())
        .ok_or(WorkflowError::Prompt(PromptError::Unavailable))
}

/// Send `command`, wait for the prompt, return the first output line.
async fn round_trip(
    session: &mut Session,
    command: &str,
    step: &'static str,
) -> Result<String, WorkflowError> {
    session.send_line(command).await?;
    match session.prompt(None).await? {
        WaitOutcome::Matched(reply) => {
            extract_reply(&reply.before, command).ok_or_else(|| WorkflowError::MissingReply {
                command: command.to_string(),
            })
        }
        WaitOutcome::Timeout { .. } => Err(WorkflowError::PatternTimeout { step }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            WorkflowError::LaunchFailure {
                timeout: Duration::from_secs(5)
            }
            .exit_code(),
            1
        );
        assert_eq!(WorkflowError::Interrupted(Signal::Terminate).exit_code(), 143);
        assert_eq!(
            WorkflowError::from(SessionError::Authentication {
                host: "h".into(),
                reason: "denied".into()
            })
            .exit_code(),
            1
        );
    }

    #[test]
    fn test_session_auth_maps_to_workflow_auth() {
        let e = WorkflowError::from(SessionError::Authentication {
            host: "login01".into(),
            reason: "Permission denied".into(),
        });
        assert!(matches!(e, WorkflowError::Authentication { .. }));
    }

    #[tokio::test]
    async fn test_cleanup_without_anything_open() {
        let config = Config::default();
        let mut orchestrator = SessionOrchestrator::new(
            config.clone(),
            Collaborators::system(&config),
            Console::new(io::sink()),
        );
        orchestrator.cleanup();
        orchestrator.cleanup();
        assert_eq!(orchestrator.state(), WorkflowState::Closed);
        assert!(orchestrator.shutdown_guard().has_begun());
    }
}
