//! Command-line arguments

use crate::config::Config;
use clap::Parser;
use std::path::PathBuf;

/// Launch Jupyter on a cluster allocation and tunnel it to this machine.
#[derive(Parser, Debug, Clone)]
#[command(name = "jupyter-tunnel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Remote user name
    pub user: String,

    /// Jupyter subcommand to launch (e.g. notebook, lab)
    pub subcommand: String,

    /// Port used locally and on the allocation
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Time limit for the allocation, e.g. 0-3:00
    #[arg(short, long)]
    pub time: Option<String>,

    /// Memory for the allocation, e.g. 1G
    #[arg(short, long)]
    pub mem: Option<String>,

    /// Cores for the allocation
    #[arg(short, long, visible_short_alias = 'n')]
    pub cores: Option<u32>,

    /// Keep the interactive shell after Jupyter exits
    #[arg(short, long)]
    pub keepalive: bool,

    /// Forward X11 as trusted
    #[arg(short = 'y', long = "trusted-x11")]
    pub trusted_x11: bool,

    /// Environment module to load before launch (repeatable)
    #[arg(long = "module", value_name = "MODULE")]
    pub modules: Vec<String>,

    /// Virtual environment directory or conda environment to activate
    #[arg(long, value_name = "PATH")]
    pub venv: Option<String>,

    /// Login host
    #[arg(long)]
    pub host: Option<String>,

    /// Configuration file (default: ~/.config/jupyter-tunnel/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Seconds to wait for Jupyter to report its address
    #[arg(long, value_name = "SECS")]
    pub launch_timeout: Option<u64>,

    /// Do not open a browser
    #[arg(long)]
    pub no_browser: bool,

    /// Verbose logging (repeat for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Override `config` with every flag that was given.
    pub fn apply(&self, config: &mut Config) {
        config.connection.user = self.user.clone();
        config.jupyter.subcommand = self.subcommand.clone();

        if let Some(port) = self.port {
            config.jupyter.port = port;
        }
        if let Some(time) = &self.time {
            config.allocation.time = time.clone();
        }
        if let Some(mem) = &self.mem {
            config.allocation.memory = mem.clone();
        }
        if let Some(cores) = self.cores {
            config.allocation.cores = cores;
        }
        if let Some(host) = &self.host {
            config.connection.host = host.clone();
        }
        if let Some(venv) = &self.venv {
            config.jupyter.venv = Some(venv.clone());
        }
        if let Some(secs) = self.launch_timeout {
            config.jupyter.launch_timeout_secs = secs;
        }
        if !self.modules.is_empty() {
            config.jupyter.modules = self.modules.clone();
        }
        config.jupyter.keepalive |= self.keepalive;
        config.connection.trusted_x11 |= self.trusted_x11;
        if self.no_browser {
            config.desktop.open_browser = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_only() {
        let cli = Cli::try_parse_from(["jupyter-tunnel", "ab123", "lab"]).unwrap();
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.connection.user, "ab123");
        assert_eq!(config.jupyter.subcommand, "lab");
        assert_eq!(config.jupyter.port, 8887);
        assert!(!config.jupyter.keepalive);
    }

    #[test]
    fn test_flags_override_file_values() {
        let cli = Cli::try_parse_from([
            "jupyter-tunnel",
            "ab123",
            "notebook",
            "-p",
            "9000",
            "-t",
            "1-0",
            "-m",
            "4G",
            "-n",
            "2",
            "-k",
            "-y",
            "--module",
            "gcc/6.2.0",
            "--module",
            "python/3.7.4",
            "--venv",
            "/home/ab123/env",
        ])
        .unwrap();
        let mut config = Config::default();
        config.jupyter.modules = vec!["from-file".to_string()];
        cli.apply(&mut config);

        assert_eq!(config.jupyter.port, 9000);
        assert_eq!(config.allocation.time, "1-0");
        assert_eq!(config.allocation.memory, "4G");
        assert_eq!(config.allocation.cores, 2);
        assert!(config.jupyter.keepalive);
        assert!(config.connection.trusted_x11);
        assert_eq!(config.jupyter.modules, ["gcc/6.2.0", "python/3.7.4"]);
        assert_eq!(config.jupyter.venv.as_deref(), Some("/home/ab123/env"));
    }

    #[test]
    fn test_missing_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["jupyter-tunnel", "ab123"]).is_err());
    }

    #[test]
    fn test_verbosity_counts() {
        let cli = Cli::try_parse_from(["jupyter-tunnel", "-vv", "ab123", "lab"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
