//! Remote command lines and the patterns that answer them

use crate::config::{AllocationConfig, JupyterConfig};
use crate::pattern::Pattern;
use crate::result::{MatchResult, PatternError};

/// Prints the login node's own name.
pub const LOGIN_HOSTNAME: &str = "echo $HOSTNAME";

/// Prints the allocation node's short name.
pub const NODE_HOSTNAME: &str = r"hostname | sed 's/\..*//'";

/// `<user>@<host>'s password: ` as printed by `ssh` inside the cluster
pub const PASSWORD_PROMPT: &str = r"[\w-]+@[\w-]+'s password: ";

/// Quote `word` for a POSIX shell, leaving plain words untouched.
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"@%+=:,./-_".contains(&b));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r#"'"'"'"#))
    }
}

/// `srun` request for an interactive X11-enabled shell.
pub fn allocation_command(allocation: &AllocationConfig) -> String {
    format!(
        "srun -t {} --mem {} -c {} --pty -p {} --x11 /bin/bash",
        allocation.time, allocation.memory, allocation.cores, allocation.partition
    )
}

/// Shell lines that prepare the environment before launch, in order.
///
/// A `venv` containing a `/` is a virtualenv directory; anything else is
/// taken as a conda environment name.
pub fn setup_commands(jupyter: &JupyterConfig) -> Vec<String> {
    let mut commands = Vec::new();

    if !jupyter.modules.is_empty() {
        let modules: Vec<String> = jupyter.modules.iter().map(|m| shell_quote(m)).collect();
        commands.push(format!("module load {}", modules.join(" ")));
    }
    if let Some(venv) = jupyter.venv.as_deref().filter(|v| !v.is_empty()) {
        if venv.contains('/') {
            commands.push(format!("source {}/bin/activate", shell_quote(venv.trim_end_matches('/'))));
        } else {
            commands.push(format!("conda activate {}", shell_quote(venv)));
        }
    }
    if let Some(init) = jupyter.init_command.as_deref().filter(|c| !c.trim().is_empty()) {
        commands.push(init.to_string());
    }

    commands
}

/// Start Jupyter without a browser on `port`.
pub fn service_command(subcommand: &str, port: u16) -> String {
    format!("jupyter {} --port={} --no-browser", subcommand, port)
}

/// Forward `port` on the login node to the same port on `node`.
pub fn tunnel_command(port: u16, node: &str) -> String {
    format!("ssh -N -L {0}:127.0.0.1:{0} {1}", port, shell_quote(node))
}

/// The password request of a nested `ssh`/`srun`.
pub fn password_pattern() -> Result<Pattern, PatternError> {
    Pattern::regex(PASSWORD_PROMPT)
}

/// Jupyter's address line for `port`, surrounded by whitespace.
pub fn banner_pattern(port: u16) -> Result<Pattern, PatternError> {
    Pattern::regex(&format!(
        r"\s(https?://(?:localhost|127\.0\.0\.1):{}/\S*)\s",
        port
    ))
}

/// The address captured by [`banner_pattern`].
pub fn extract_address(banner: &MatchResult) -> Option<String> {
    banner
        .capture(1)
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .map(str::to_string)
}

/// First output line after the echo of `command`.
///
/// `before` is everything between sending `command` and the next prompt.
/// When the echo is missing, the second line is used.
pub fn extract_reply(before: &str, command: &str) -> Option<String> {
    let lines: Vec<&str> = before.trim().lines().map(str::trim).collect();
    let start = lines
        .iter()
        .position(|line| line.ends_with(command))
        .map_or(1, |echo| echo + 1);

    lines
        .get(start..)?
        .iter()
        .find(|line| !line.is_empty())
        .map(|line| line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("python/3.7.4"), "python/3.7.4");
        assert_eq!(shell_quote("my env"), "'my env'");
        assert_eq!(shell_quote("a'b"), r#"'a'"'"'b'"#);
        assert_eq!(shell_quote("$(rm -rf ~)"), "'$(rm -rf ~)'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_allocation_command() {
        let command = allocation_command(&AllocationConfig::default());
        assert_eq!(
            command,
            "srun -t 0-3:00 --mem 1G -c 1 --pty -p interactive --x11 /bin/bash"
        );
    }

    #[test]
    fn test_setup_commands() {
        let jupyter = JupyterConfig {
            modules: vec!["gcc/6.2.0".into(), "python/3.7.4".into()],
            venv: Some("/home/ab123/my env/".into()),
            init_command: Some("export JUPYTER_RUNTIME_DIR=/tmp".into()),
            ..JupyterConfig::default()
        };
        assert_eq!(
            setup_commands(&jupyter),
            [
                "module load gcc/6.2.0 python/3.7.4",
                "source '/home/ab123/my env'/bin/activate",
                "export JUPYTER_RUNTIME_DIR=/tmp",
            ]
        );

        let conda = JupyterConfig {
            venv: Some("py37".into()),
            ..JupyterConfig::default()
        };
        assert_eq!(setup_commands(&conda), ["conda activate py37"]);
        assert!(setup_commands(&JupyterConfig::default()).is_empty());
    }

    #[test]
    fn test_service_and_tunnel_commands() {
        assert_eq!(
            service_command("lab", 8887),
            "jupyter lab --port=8887 --no-browser"
        );
        assert_eq!(
            tunnel_command(8887, "compute-a-16-160"),
            "ssh -N -L 8887:127.0.0.1:8887 compute-a-16-160"
        );
    }

    #[test]
    fn test_password_pattern() {
        let matcher = password_pattern().unwrap().to_matcher().unwrap();
        assert!(matcher.find(b"ab123@compute-e-16-175's password: ").is_some());
        assert!(matcher.find(b"Password: ").is_none());
    }

    #[test]
    fn test_banner_pattern_port_specific() {
        let matcher = banner_pattern(8887).unwrap().to_matcher().unwrap();
        let banner = b"  or http://127.0.0.1:8887/?token=abc\r\n";
        let m = matcher.find(banner).unwrap();
        assert_eq!(m.captures[1], "http://127.0.0.1:8887/?token=abc");

        assert!(matcher.find(b" http://127.0.0.1:8888/?token=abc\r\n").is_none());
        assert!(matcher
            .find(b" https://localhost:8887/lab?token=f00\n")
            .is_some());
    }

    #[test]
    fn test_extract_reply() {
        let before = "echo $HOSTNAME\r\nlogin01.o2.rc.hms.harvard.edu\r\n";
        assert_eq!(
            extract_reply(before, LOGIN_HOSTNAME).as_deref(),
            Some("login01.o2.rc.hms.harvard.edu")
        );

        let no_echo = "first\r\nsecond\r\n";
        assert_eq!(extract_reply(no_echo, "hostname").as_deref(), Some("second"));
        assert_eq!(extract_reply("echo $HOSTNAME\r\n", LOGIN_HOSTNAME), None);
    }
}
