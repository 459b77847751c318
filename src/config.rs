//! Configuration for the tunnel workflow.
//!
//! Values come from an optional TOML file at
//! `~/.config/jupyter-tunnel/config.toml`, then command-line flags override
//! them. Every section is optional; missing keys take the defaults below.
//!
//! ```toml
//! [connection]
//! host = "o2.hms.harvard.edu"
//! nameservers = [["134.174.17.6", "134.174.141.2"]]
//!
//! [allocation]
//! time = "0-6:00"
//! memory = "4G"
//!
//! [jupyter]
//! port = 8888
//! modules = ["gcc/6.2.0", "python/3.7.4"]
//! venv = "/home/alice/envs/jupyter"
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Longest timeout accepted for any wait, in seconds.
const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("invalid TOML in {}: {message}", .path.display())]
    Parse {
        /// File that failed
        path: PathBuf,
        /// Parser message with position
        message: String,
    },

    /// `connection.host` is blank.
    #[error("host must not be empty")]
    EmptyHost,

    /// No user was configured or given on the command line.
    #[error("user must not be empty")]
    EmptyUser,

    /// Port 0.
    #[error("port must be between 1 and 65535")]
    InvalidPort,

    /// Zero cores requested.
    #[error("cores must be at least 1")]
    InvalidCores,

    /// Time limit the scheduler would not accept.
    #[error("time limit must look like [days-]hours[:minutes[:seconds]], got {0:?}")]
    InvalidTime(String),

    /// Memory amount the scheduler would not accept.
    #[error("memory must look like 512M or 2G, got {0:?}")]
    InvalidMemory(String),

    /// A value that ends up unquoted in a remote command line.
    #[error("{field} must be a plain word, got {value:?}")]
    InvalidWord {
        /// Offending field
        field: &'static str,
        /// Offending value
        value: String,
    },

    /// A fallback nameserver that is not an IP address.
    #[error("nameserver must be an IP address, got {0:?}")]
    InvalidNameserver(String),

    /// Timeout of zero or more than a day.
    #[error("{name} timeout must be between 1 and 86400 seconds, got {secs}")]
    InvalidTimeout {
        /// Which timeout
        name: &'static str,
        /// Configured value
        secs: u64,
    },
}

/// Complete configuration, passed by value into the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Login host and connection timeouts
    pub connection: ConnectionConfig,
    /// Resource request sent to the scheduler
    pub allocation: AllocationConfig,
    /// The service started inside the allocation
    pub jupyter: JupyterConfig,
    /// Local desktop integration
    pub desktop: DesktopConfig,
    /// Where the password comes from
    pub credential: CredentialConfig,
}

/// Login host and connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Cluster login host
    pub host: String,
    /// Remote user name. Normally given on the command line.
    pub user: String,
    /// Timeout for waits on the first connection, in seconds
    pub login_timeout_secs: u64,
    /// Timeout for waits on the tunnel connection, in seconds
    pub tunnel_timeout_secs: u64,
    /// Forward X11 as trusted (`ForwardX11Trusted`) instead of untrusted
    pub trusted_x11: bool,
    /// Nameserver groups asked in order when the system resolver does not
    /// know a login host
    pub nameservers: Vec<Vec<String>>,
}

/// Scheduler allocation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AllocationConfig {
    /// Wall-clock limit, e.g. `0-3:00`
    pub time: String,
    /// Memory, e.g. `1G`
    pub memory: String,
    /// CPU cores
    pub cores: u32,
    /// Partition (queue)
    pub partition: String,
}

/// The Jupyter service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JupyterConfig {
    /// Jupyter subcommand, e.g. `notebook` or `lab`
    pub subcommand: String,
    /// Port used on both ends of the tunnel
    pub port: u16,
    /// How long to wait for the address banner, in seconds
    pub launch_timeout_secs: u64,
    /// Environment modules loaded before launch
    pub modules: Vec<String>,
    /// Virtual environment directory, or a conda environment name
    pub venv: Option<String>,
    /// Extra shell line run before launch
    pub init_command: Option<String>,
    /// Stay in the shell after Jupyter exits
    pub keepalive: bool,
}

/// Local desktop integration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DesktopConfig {
    /// Open the address in a browser once the tunnel is up
    pub open_browser: bool,
    /// Quit an idle XQuartz on macOS once the tunnel is up
    pub quit_xquartz: bool,
}

/// Credential prompt settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CredentialConfig {
    /// pinentry program, a path or a name looked up in `PATH`
    pub pinentry: String,
    /// Read the password from the terminal when pinentry is missing
    pub console_fallback: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "o2.hms.harvard.edu".to_string(),
            user: String::new(),
            login_timeout_secs: 60,
            tunnel_timeout_secs: 10,
            trusted_x11: false,
            nameservers: default_nameservers(),
        }
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            time: "0-3:00".to_string(),
            memory: "1G".to_string(),
            cores: 1,
            partition: "interactive".to_string(),
        }
    }
}

impl Default for JupyterConfig {
    fn default() -> Self {
        Self {
            subcommand: "notebook".to_string(),
            port: 8887,
            launch_timeout_secs: 60,
            modules: Vec::new(),
            venv: None,
            init_command: None,
            keepalive: false,
        }
    }
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            open_browser: true,
            quit_xquartz: true,
        }
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            pinentry: default_pinentry(),
            console_fallback: true,
        }
    }
}

/// HMS, then Harvard University nameservers; both carry the login nodes.
fn default_nameservers() -> Vec<Vec<String>> {
    [
        &["134.174.17.6", "134.174.141.2"][..],
        &["128.103.1.1", "128.103.201.100", "128.103.200.101"][..],
    ]
    .iter()
    .map(|group| group.iter().map(|s| s.to_string()).collect())
    .collect()
}

fn default_pinentry() -> String {
    if cfg!(target_os = "linux") {
        "/usr/bin/pinentry".to_string()
    } else if cfg!(target_os = "macos") {
        "/usr/local/bin/pinentry".to_string()
    } else {
        "pinentry".to_string()
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jupyter-tunnel")
        .join("config.toml")
}

impl ConnectionConfig {
    /// Wait timeout for the first connection
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    /// Wait timeout for the tunnel connection
    pub fn tunnel_timeout(&self) -> Duration {
        Duration::from_secs(self.tunnel_timeout_secs)
    }
}

impl JupyterConfig {
    /// How long to wait for the address banner
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }
}

impl Config {
    /// Load configuration from `path`.
    ///
    /// A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&contents).map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: format_toml_error(&e),
        })
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(default_config_path())
    }

    /// Check every value the workflow interpolates into remote commands.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.connection.user.trim().is_empty() {
            return Err(ConfigError::EmptyUser);
        }
        if self.jupyter.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.allocation.cores == 0 {
            return Err(ConfigError::InvalidCores);
        }

        if !matches_whole(r"\d+(?:-\d+)?(?::\d+){0,2}", &self.allocation.time) {
            return Err(ConfigError::InvalidTime(self.allocation.time.clone()));
        }
        if !matches_whole(r"\d+[KMGT]?", &self.allocation.memory) {
            return Err(ConfigError::InvalidMemory(self.allocation.memory.clone()));
        }

        for (field, value) in [
            ("user", &self.connection.user),
            ("host", &self.connection.host),
            ("partition", &self.allocation.partition),
            ("subcommand", &self.jupyter.subcommand),
        ] {
            if !matches_whole(r"[A-Za-z0-9][A-Za-z0-9_.-]*", value) {
                return Err(ConfigError::InvalidWord {
                    field,
                    value: value.clone(),
                });
            }
        }

        if let Some(bad) = self
            .connection
            .nameservers
            .iter()
            .flatten()
            .find(|s| s.parse::<IpAddr>().is_err())
        {
            return Err(ConfigError::InvalidNameserver(bad.clone()));
        }

        for (name, secs) in [
            ("login", self.connection.login_timeout_secs),
            ("tunnel", self.connection.tunnel_timeout_secs),
            ("launch", self.jupyter.launch_timeout_secs),
        ] {
            if secs == 0 || secs > MAX_TIMEOUT_SECS {
                return Err(ConfigError::InvalidTimeout { name, secs });
            }
        }

        Ok(())
    }
}

fn matches_whole(pattern: &str, value: &str) -> bool {
    Regex::new(&format!("^(?:{})$", pattern)).is_ok_and(|re| re.is_match(value))
}

fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn valid() -> Config {
        let mut config = Config::default();
        config.connection.user = "ab123".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.connection.host, "o2.hms.harvard.edu");
        assert_eq!(config.jupyter.port, 8887);
        assert_eq!(config.allocation.time, "0-3:00");
        assert_eq!(config.allocation.memory, "1G");
        assert_eq!(config.allocation.cores, 1);
        assert_eq!(config.allocation.partition, "interactive");
        assert_eq!(config.connection.login_timeout(), Duration::from_secs(60));
        assert_eq!(config.connection.tunnel_timeout(), Duration::from_secs(10));
        assert!(!config.jupyter.keepalive);
        assert_eq!(config.connection.nameservers.len(), 2);
        assert_eq!(config.connection.nameservers[0][0], "134.174.17.6");
    }

    #[test]
    fn test_nameservers_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[connection]\nnameservers = [[\"192.0.2.53\"], []]").unwrap();

        let mut config = Config::load(file.path()).unwrap();
        assert_eq!(
            config.connection.nameservers,
            vec![vec!["192.0.2.53".to_string()], Vec::new()]
        );

        config.connection.user = "ab123".to_string();
        config.validate().unwrap();
        config.connection.nameservers = vec![vec!["dns.example.org".to_string()]];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidNameserver(s)) if s == "dns.example.org"
        ));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[jupyter]\nport = 9999\nmodules = [\"python/3.7.4\"]\n\n[allocation]\nmemory = \"8G\""
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.jupyter.port, 9999);
        assert_eq!(config.jupyter.modules, ["python/3.7.4"]);
        assert_eq!(config.allocation.memory, "8G");
        assert_eq!(config.allocation.time, "0-3:00");
    }

    #[test]
    fn test_invalid_toml_reports_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[jupyter\nport = 1").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_validate_accepts_defaults_with_user() {
        valid().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = valid();
        config.connection.user.clear();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyUser)));

        let mut config = valid();
        config.jupyter.port = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPort)));

        let mut config = valid();
        config.allocation.time = "3 hours".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTime(_))));

        let mut config = valid();
        config.allocation.memory = "1G; rm -rf ~".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMemory(_))));

        let mut config = valid();
        config.jupyter.subcommand = "lab && id".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWord { field: "subcommand", .. })
        ));

        let mut config = valid();
        config.jupyter.launch_timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout { name: "launch", .. })
        ));
    }

    #[test]
    fn test_time_formats() {
        for ok in ["30", "0-3:00", "2:00:00", "1-0", "12:30"] {
            let mut config = valid();
            config.allocation.time = ok.to_string();
            assert!(config.validate().is_ok(), "{ok} should be accepted");
        }
    }
}
