//! CLI argument definitions for logrelay-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use logrelay_core::config::LogRelayConfig;

/// LogRelay distribution daemon.
///
/// Fans inbound log packets out to a weighted pool of analyzer
/// services, tracking analyzer liveness and retrying failed deliveries.
#[derive(Parser, Debug)]
#[command(name = "logrelay-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to logrelay.toml configuration file.
    #[arg(short, long, default_value = "/etc/logrelay/logrelay.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (an empty string disables the PID file).
    #[arg(long)]
    pub pid_file: Option<String>,
}

impl DaemonCli {
    /// Apply command-line overrides on top of file and environment values.
    pub fn apply_overrides(&self, config: &mut LogRelayConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.general.log_format.clone_from(format);
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file.clone_from(pid_file);
        }
    }
}
