//! Binary error types with miette diagnostics.
//!
//! Maps `CoreError` variants into user-facing errors with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use z21gw_core::{BusError, CoreError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 2;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not open a socket to the z21 at {addr}")]
    #[diagnostic(
        code(z21gw::device_connect),
        help(
            "Check that the address resolves and the port is valid.\n\
             Address: {addr}\n\
             Set it with --z21-addr or Z21_ADDR."
        )
    )]
    DeviceConnect {
        addr: String,
        #[source]
        source: z21gw_api::Error,
    },

    #[error("Could not connect to NATS at {url}")]
    #[diagnostic(
        code(z21gw::bus_connect),
        help(
            "Check that the NATS server is running and reachable.\n\
             Set the URL with --nats-url or NATS_URL."
        )
    )]
    BusConnect {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(z21gw::config_not_found),
        help("Pass an existing file with --config, or unset Z21GW_CONFIG.")
    )]
    ConfigNotFound { path: String },

    #[error(transparent)]
    #[diagnostic(code(z21gw::config))]
    Config(Box<figment::Error>),

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(z21gw::validation))]
    Validation { field: String, reason: String },

    // ── Runtime ──────────────────────────────────────────────────────

    #[error("Gateway error: {message}")]
    #[diagnostic(code(z21gw::gateway))]
    Gateway { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::DeviceConnect { .. } | Self::BusConnect { .. } => exit_code::CONNECTION,
            Self::ConfigNotFound { .. } | Self::Config(_) | Self::Validation { .. } => {
                exit_code::CONFIG
            }
            Self::Gateway { .. } | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config { message } => CliError::Validation {
                field: "gateway".into(),
                reason: message,
            },

            CoreError::Bus(BusError::Connect { url, reason }) => CliError::BusConnect {
                url,
                source: reason.into(),
            },

            other => CliError::Gateway {
                message: other.to_string(),
            },
        }
    }
}
