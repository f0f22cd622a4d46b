//! Configuration Module
//!
//! Two kinds of configuration feed the bridge:
//! - Local tuning (this module): TOML file, `${VAR:-default}` substitution and
//!   `MQTT_BRIDGE__SECTION__KEY` environment overrides
//! - The adapter document fetched from the platform ([`adapter`])

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

pub use adapter::{AdapterConfig, BrokerAddress, BrokerSettings, DEFAULT_TOPIC_ROOT};

mod adapter;

#[cfg(test)]
mod tests;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "MQTT_BRIDGE";

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(&caps[1]).unwrap_or_else(|_| default.to_string())
        })
        .into_owned())
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Config crate error
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    /// Substitution pattern failed to compile
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
    /// The adapter record could not be fetched from the platform
    #[error("failed to fetch adapter configuration: {0}")]
    Fetch(String),
    /// The collection holds no record for this adapter
    #[error("no configuration found for adapter {0:?}")]
    AdapterNotFound(String),
    /// The adapter record is present but unusable
    #[error("invalid adapter configuration: {0}")]
    Adapter(String),
    /// `adapter_settings` is not valid JSON for the broker settings
    #[error("failed to parse adapter_settings: {0}")]
    Json(#[from] serde_json::Error),
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Per-connection tuning, shared by both sides
    pub connection: ConnectionConfig,
    /// Reconnect policy
    pub backoff: BackoffConfig,
    /// Startup authentication
    pub auth: AuthConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// MQTT session tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Keep alive sent in CONNECT; PINGREQ is sent at this period
    #[serde(with = "humantime_serde")]
    pub keep_alive: Duration,
    /// Bound on TCP connect, CONNACK and SUBACK waits
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Inbound message channel capacity per connection
    pub inbound_capacity: usize,
    /// Outbound publish queue capacity per connection
    pub outbound_capacity: usize,
    /// Largest inbound packet accepted, in bytes
    pub max_packet_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(8),
            inbound_capacity: 1024,
            outbound_capacity: 1024,
            max_packet_size: crate::codec::DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

/// Reconnect backoff configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial: Duration,
    /// Upper bound on any single delay
    #[serde(with = "humantime_serde")]
    pub max: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Randomize each delay between half and all of its nominal value
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Startup authentication configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Fixed wait between failed bootstrap authentication attempts
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `MQTT_BRIDGE__` prefix with double underscores for nesting:
    ///    - `MQTT_BRIDGE__CONNECTION__KEEP_ALIVE=30s` overrides `connection.keep_alive`
    ///    - `MQTT_BRIDGE__BACKOFF__JITTER=false` overrides `backoff.jitter`
    ///
    /// A missing file is not an error; defaults and overrides still apply.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut builder = config::Config::builder()
            .set_default("log.level", defaults.log.level.as_str())?
            .set_default("connection.keep_alive", "10s")?
            .set_default("connection.connect_timeout", "8s")?
            .set_default(
                "connection.inbound_capacity",
                defaults.connection.inbound_capacity as u64,
            )?
            .set_default(
                "connection.outbound_capacity",
                defaults.connection.outbound_capacity as u64,
            )?
            .set_default(
                "connection.max_packet_size",
                defaults.connection.max_packet_size as u64,
            )?
            .set_default("backoff.initial", "1s")?
            .set_default("backoff.max", "30s")?
            .set_default("backoff.multiplier", defaults.backoff.multiplier)?
            .set_default("backoff.jitter", defaults.backoff.jitter)?
            .set_default("auth.retry_interval", "1s")?;

        let path = path.as_ref();
        if !path.as_os_str().is_empty() {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    let substituted = substitute_env_vars(&content)?;
                    builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ConfigError::Io(e)),
            }
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(
            self.log.level.to_ascii_lowercase().as_str(),
            "error" | "warn" | "info" | "debug" | "trace"
        ) {
            return Err(ConfigError::Validation(format!(
                "log.level must be one of error, warn, info, debug, trace (got '{}')",
                self.log.level
            )));
        }

        let conn = &self.connection;
        if conn.keep_alive.is_zero() || conn.keep_alive.as_secs() > u64::from(u16::MAX) {
            return Err(ConfigError::Validation(
                "connection.keep_alive must be between 1s and 65535s".to_string(),
            ));
        }
        if conn.connect_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "connection.connect_timeout must be greater than zero".to_string(),
            ));
        }
        if conn.inbound_capacity == 0 || conn.outbound_capacity == 0 {
            return Err(ConfigError::Validation(
                "connection channel capacities must be greater than zero".to_string(),
            ));
        }
        if conn.max_packet_size < 2 {
            return Err(ConfigError::Validation(
                "connection.max_packet_size is too small".to_string(),
            ));
        }

        let backoff = &self.backoff;
        if backoff.initial.is_zero() {
            return Err(ConfigError::Validation(
                "backoff.initial must be greater than zero".to_string(),
            ));
        }
        if backoff.max < backoff.initial {
            return Err(ConfigError::Validation(
                "backoff.max must not be less than backoff.initial".to_string(),
            ));
        }
        if !backoff.multiplier.is_finite() || backoff.multiplier < 1.0 {
            return Err(ConfigError::Validation(
                "backoff.multiplier must be at least 1.0".to_string(),
            ));
        }

        if self.auth.retry_interval.is_zero() {
            return Err(ConfigError::Validation(
                "auth.retry_interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
