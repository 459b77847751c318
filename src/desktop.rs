//! Local desktop integration: browser launch and the macOS X server

use std::io;
use std::process::{Command, Stdio};

/// Side effects on the user's desktop once the tunnel is up.
pub trait Desktop: Send + Sync {
    /// Open `url` in the default browser.
    fn open_url(&self, url: &str) -> io::Result<()>;

    /// Quit the companion X server if it runs without windows.
    fn quit_idle_x_server(&self) -> io::Result<()>;
}

/// The real desktop: `open` on macOS, `xdg-open` elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDesktop;

/// Quit XQuartz only when it is running and has no windows of its own.
const QUIT_IDLE_XQUARTZ: [&str; 3] = [
    r#"if application "XQuartz" is running then"#,
    r#"tell application "XQuartz" to if (count of windows) is 0 then quit"#,
    "end if",
];

impl Desktop for SystemDesktop {
    fn open_url(&self, url: &str) -> io::Result<()> {
        let opener = if cfg!(target_os = "macos") {
            "open"
        } else {
            "xdg-open"
        };
        let program = which::which(opener)
            .map_err(|e| io::Error::new(io::ErrorKind::NotFound, format!("{}: {}", opener, e)))?;

        // detached: the browser outlives the hand-off
        Command::new(program)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(())
    }

    fn quit_idle_x_server(&self) -> io::Result<()> {
        if !cfg!(target_os = "macos") {
            return Ok(());
        }

        let mut command = Command::new("osascript");
        for line in QUIT_IDLE_XQUARTZ {
            command.arg("-e").arg(line);
        }
        let status = command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if !status.success() {
            tracing::debug!(%status, "osascript did not quit XQuartz");
        }
        Ok(())
    }
}

/// Does nothing. For headless hosts and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessDesktop;

impl Desktop for HeadlessDesktop {
    fn open_url(&self, url: &str) -> io::Result<()> {
        tracing::debug!(url, "headless desktop, not opening browser");
        Ok(())
    }

    fn quit_idle_x_server(&self) -> io::Result<()> {
        Ok(())
    }
}
