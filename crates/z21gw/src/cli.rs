//! Clap derive structures for the `z21gw` binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// z21gw -- bridge a z21 command station onto a NATS bus
#[derive(Debug, Parser)]
#[command(
    name = "z21gw",
    version,
    about = "Bridge a z21 model-railway command station onto a NATS bus",
    long_about = "Watches a z21 command station over UDP, publishes its reachability and \
        unsolicited events to NATS,\nand forwards command requests from NATS to the device.\n\n\
        Runs the gateway when no subcommand is given."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Option<Command>,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Instance name, the last token of every subject
    #[arg(long, short = 'n', alias = "z21_name", env = "Z21_NAME", global = true)]
    pub name: Option<String>,

    /// z21 address as host[:port]
    #[arg(long, short = 'z', alias = "z21_addr", env = "Z21_ADDR", global = true)]
    pub z21_addr: Option<String>,

    /// NATS server URL
    #[arg(long, short = 's', alias = "nats_url", env = "NATS_URL", global = true)]
    pub nats_url: Option<String>,

    /// Leading subject token(s) of the namespace
    #[arg(long, global = true)]
    pub subject_prefix: Option<String>,

    /// Period between reachability probes (e.g. "20s")
    #[arg(long, value_parser = humantime::parse_duration, global = true)]
    pub heartbeat_interval: Option<Duration>,

    /// Timeout for each z21 round-trip (e.g. "500ms")
    #[arg(long, value_parser = humantime::parse_duration, global = true)]
    pub request_timeout: Option<Duration>,

    /// Maximum number of bus commands in flight at the z21
    #[arg(long, global = true)]
    pub max_commands: Option<usize>,

    /// Path to a TOML configuration file
    #[arg(long, short = 'c', env = "Z21GW_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the version and exit
    Version,

    /// Run the gateway (default)
    Run,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn underscore_aliases_are_accepted() {
        let cli = Cli::try_parse_from([
            "z21gw",
            "--z21_name",
            "attic",
            "--z21_addr",
            "10.0.0.5",
            "--nats_url",
            "nats://bus:4222",
        ])
        .unwrap();

        assert_eq!(cli.global.name.as_deref(), Some("attic"));
        assert_eq!(cli.global.z21_addr.as_deref(), Some("10.0.0.5"));
        assert_eq!(cli.global.nats_url.as_deref(), Some("nats://bus:4222"));
        assert!(cli.command.is_none());
    }

    #[test]
    fn durations_use_humantime() {
        let cli = Cli::try_parse_from([
            "z21gw",
            "--heartbeat-interval",
            "1m 30s",
            "--request-timeout",
            "250ms",
            "run",
        ])
        .unwrap();

        assert_eq!(cli.global.heartbeat_interval, Some(Duration::from_secs(90)));
        assert_eq!(cli.global.request_timeout, Some(Duration::from_millis(250)));
        assert!(matches!(cli.command, Some(Command::Run)));
    }

    #[test]
    fn bad_duration_is_rejected() {
        let err = Cli::try_parse_from(["z21gw", "--request-timeout", "soon"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
