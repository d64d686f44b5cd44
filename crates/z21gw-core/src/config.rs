// ── Runtime gateway configuration ──
//
// Describes how the gateway behaves once both collaborators are connected.
// The binary builds a `GatewayConfig` from flags/env/file and hands it in;
// core never reads config files.

use std::time::Duration;

use tokio::sync::Semaphore;

use crate::error::CoreError;

pub const DEFAULT_NAME: &str = "main";
pub const DEFAULT_SUBJECT_PREFIX: &str = "z21";
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_CONCURRENT_COMMANDS: usize = 4;

/// Tuning and naming for one gateway instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Instance name; the last token of the subject namespace.
    pub name: String,
    /// Leading subject token(s), e.g. `z21` → `z21.<name>.status`.
    pub subject_prefix: String,
    /// Period between reachability probes. The first probe is immediate.
    pub heartbeat_interval: Duration,
    /// Timeout applied to every device round-trip.
    pub request_timeout: Duration,
    /// Upper bound on simultaneous device requests issued for bus commands.
    pub max_concurrent_commands: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.into(),
            subject_prefix: DEFAULT_SUBJECT_PREFIX.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_concurrent_commands: DEFAULT_MAX_CONCURRENT_COMMANDS,
        }
    }
}

impl GatewayConfig {
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_concurrent_commands == 0 {
            return Err(config_error("max_concurrent_commands must be at least 1"));
        }
        if self.max_concurrent_commands > Semaphore::MAX_PERMITS {
            return Err(config_error(&format!(
                "max_concurrent_commands must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(config_error("heartbeat_interval must be greater than zero"));
        }
        if self.request_timeout.is_zero() {
            return Err(config_error("request_timeout must be greater than zero"));
        }
        for (field, value) in [("name", &self.name), ("subject_prefix", &self.subject_prefix)] {
            if !is_valid_subject(value) {
                return Err(config_error(&format!(
                    "{field} {value:?} is not a valid subject (empty token, whitespace or wildcard)"
                )));
            }
        }
        Ok(())
    }
}

fn config_error(message: &str) -> CoreError {
    CoreError::Config {
        message: message.to_owned(),
    }
}

/// Non-empty dot-separated tokens without whitespace or wildcards.
fn is_valid_subject(value: &str) -> bool {
    !value.is_empty()
        && value.split('.').all(|token| {
            !token.is_empty()
                && token != "*"
                && token != ">"
                && !token.chars().any(char::is_whitespace)
        })
}
