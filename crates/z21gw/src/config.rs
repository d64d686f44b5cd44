//! Binary-owned configuration: TOML file, `Z21GW_*` environment and CLI
//! flags merged into [`Settings`], then narrowed to a core
//! [`GatewayConfig`].
//!
//! Core never sees these types -- it receives a pre-built `GatewayConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use z21gw_core::GatewayConfig;
use z21gw_core::config::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_CONCURRENT_COMMANDS, DEFAULT_NAME,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_SUBJECT_PREFIX,
};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub const DEFAULT_Z21_ADDR: &str = "127.0.0.1:21105";
pub const DEFAULT_NATS_URL: &str = "nats://127.0.0.1:4222";

// ── Settings ─────────────────────────────────────────────────────────

/// Everything the binary needs to run one gateway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(deserialize_with = "scalar_str::deserialize")]
    pub name: String,
    #[serde(deserialize_with = "scalar_str::deserialize")]
    pub z21_addr: String,
    #[serde(deserialize_with = "scalar_str::deserialize")]
    pub nats_url: String,
    #[serde(deserialize_with = "scalar_str::deserialize")]
    pub subject_prefix: String,
    #[serde(with = "humantime_str")]
    pub heartbeat_interval: Duration,
    #[serde(with = "humantime_str")]
    pub request_timeout: Duration,
    pub max_concurrent_commands: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.into(),
            z21_addr: DEFAULT_Z21_ADDR.into(),
            nats_url: DEFAULT_NATS_URL.into(),
            subject_prefix: DEFAULT_SUBJECT_PREFIX.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_concurrent_commands: DEFAULT_MAX_CONCURRENT_COMMANDS,
        }
    }
}

impl Settings {
    /// Flags (and their env fallbacks) win over file and `Z21GW_*` values.
    fn apply_overrides(&mut self, global: &GlobalOpts) {
        if let Some(ref name) = global.name {
            self.name.clone_from(name);
        }
        if let Some(ref addr) = global.z21_addr {
            self.z21_addr.clone_from(addr);
        }
        if let Some(ref url) = global.nats_url {
            self.nats_url.clone_from(url);
        }
        if let Some(ref prefix) = global.subject_prefix {
            self.subject_prefix.clone_from(prefix);
        }
        if let Some(interval) = global.heartbeat_interval {
            self.heartbeat_interval = interval;
        }
        if let Some(timeout) = global.request_timeout {
            self.request_timeout = timeout;
        }
        if let Some(max) = global.max_commands {
            self.max_concurrent_commands = max;
        }
    }

    /// Translate into the core config and validate it.
    ///
    /// This is the single boundary where binary config crosses into core.
    pub fn gateway_config(&self) -> Result<GatewayConfig, CliError> {
        let config = GatewayConfig {
            name: self.name.clone(),
            subject_prefix: self.subject_prefix.clone(),
            heartbeat_interval: self.heartbeat_interval,
            request_timeout: self.request_timeout,
            max_concurrent_commands: self.max_concurrent_commands,
        };
        config.validate()?;
        Ok(config)
    }
}

/// `Duration` as a humantime string (`"20s"`, `"500ms"`).
mod humantime_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }
}

/// A string that may arrive as a bare scalar. Figment infers types for
/// `Z21GW_*` values, so `Z21GW_NAME=42` yields a number.
mod scalar_str {
    use std::fmt;

    use serde::Deserializer;
    use serde::de::{self, Visitor};

    struct ScalarVisitor;

    impl Visitor<'_> for ScalarVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a string or a number")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_owned())
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i128<E: de::Error>(self, v: i128) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_char<E: de::Error>(self, v: char) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        deserializer.deserialize_any(ScalarVisitor)
    }
}

// ── Config file path ─────────────────────────────────────────────────

/// Resolve the default config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("", "", "z21gw")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("z21gw");
            p.push("config.toml");
            p
        })
}

// ── Loading ──────────────────────────────────────────────────────────

fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("Z21GW_").ignore(&["config"]))
}

/// Resolve settings: defaults, then file, then `Z21GW_*` env, then flags.
///
/// An explicit `--config` must exist; the platform default may be absent.
pub fn load(global: &GlobalOpts) -> Result<Settings, CliError> {
    let path = match global.config {
        Some(ref path) if !path.exists() => {
            return Err(CliError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }
        Some(ref path) => path.clone(),
        None => config_path(),
    };

    let mut settings: Settings = figment(&path).extract()?;
    settings.apply_overrides(global);
    Ok(settings)
}
