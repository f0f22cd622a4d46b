//! Adapter configuration document
//!
//! The platform stores one record per adapter in a data collection. The
//! record carries the topic root and an `adapter_settings` blob describing
//! the secondary broker.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;

use super::ConfigError;
use crate::topic::validate_topic_filter;

/// Topic root used when the record does not set one
pub const DEFAULT_TOPIC_ROOT: &str = "mqtt-bridge-adapter";

const DEFAULT_MQTT_PORT: u16 = 1883;

/// Validated adapter configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterConfig {
    /// Namespace for platform traffic (`<root>/outgoing`, `<root>/incoming`)
    pub topic_root: String,
    /// Secondary broker settings
    pub broker: BrokerSettings,
}

/// Secondary broker settings as stored in `adapter_settings`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    #[serde(rename = "messagingURL")]
    pub messaging_url: String,
    pub username: String,
    pub password: String,
    /// Filters to subscribe to; empty means everything
    pub topics: Vec<String>,
    #[serde(rename = "platformURL")]
    pub platform_url: String,
    #[serde(rename = "systemKey")]
    pub system_key: String,
    #[serde(rename = "systemSecret")]
    pub system_secret: String,
    #[serde(rename = "deviceName")]
    pub device_name: String,
    #[serde(rename = "activeKey")]
    pub active_key: String,
    /// The secondary broker is itself a platform broker and may need device auth
    #[serde(rename = "isCbBroker")]
    pub is_cb_broker: bool,
}

impl BrokerSettings {
    /// Static credentials, if both username and password are configured
    pub fn has_static_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Whether connecting requires a device authentication round trip first
    pub fn needs_platform_auth(&self) -> bool {
        self.is_cb_broker && !self.has_static_credentials()
    }
}

impl AdapterConfig {
    /// Build from the first record returned by the adapter collection query
    pub fn from_record(record: &Value) -> Result<Self, ConfigError> {
        let record = record
            .as_object()
            .ok_or_else(|| ConfigError::Adapter("record is not a JSON object".to_string()))?;

        let topic_root = match record.get("topic_root") {
            None | Some(Value::Null) => DEFAULT_TOPIC_ROOT.to_string(),
            Some(Value::String(root)) => root.clone(),
            Some(_) => {
                return Err(ConfigError::Adapter(
                    "topic_root must be a string".to_string(),
                ))
            }
        };

        let broker: BrokerSettings = match record.get("adapter_settings") {
            None | Some(Value::Null) => {
                return Err(ConfigError::Adapter(
                    "adapter_settings is required".to_string(),
                ))
            }
            Some(Value::String(raw)) => serde_json::from_str(raw)?,
            Some(inline @ Value::Object(_)) => serde_json::from_value(inline.clone())?,
            Some(_) => {
                return Err(ConfigError::Adapter(
                    "adapter_settings must be a JSON string or object".to_string(),
                ))
            }
        };

        let config = Self { topic_root, broker };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_topic_root(&self.topic_root)?;

        if self.broker.messaging_url.is_empty() {
            return Err(ConfigError::Adapter(
                "no messagingURL defined in adapter_settings".to_string(),
            ));
        }
        self.broker.messaging_url.parse::<BrokerAddress>()?;

        for filter in &self.broker.topics {
            validate_topic_filter(filter).map_err(|reason| {
                ConfigError::Adapter(format!("invalid topic filter '{}': {}", filter, reason))
            })?;
        }

        if self.broker.needs_platform_auth() {
            let missing: Vec<&str> = [
                ("platformURL", &self.broker.platform_url),
                ("systemKey", &self.broker.system_key),
                ("systemSecret", &self.broker.system_secret),
                ("deviceName", &self.broker.device_name),
                ("activeKey", &self.broker.active_key),
            ]
            .into_iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(name, _)| name)
            .collect();
            if !missing.is_empty() {
                return Err(ConfigError::Adapter(format!(
                    "isCbBroker without username/password requires {}",
                    missing.join(", ")
                )));
            }
        }

        Ok(())
    }
}

fn validate_topic_root(root: &str) -> Result<(), ConfigError> {
    if root.is_empty() {
        return Err(ConfigError::Adapter("topic_root cannot be empty".to_string()));
    }
    if root.contains('/') {
        return Err(ConfigError::Adapter(format!(
            "topic_root '{}' must be a single topic level",
            root
        )));
    }
    if root.contains(['+', '#', '\0']) {
        return Err(ConfigError::Adapter(format!(
            "topic_root '{}' cannot contain wildcards",
            root
        )));
    }
    Ok(())
}

/// A plain TCP MQTT broker address
///
/// Accepts `host:port`, `tcp://host:port` and `mqtt://host:port`; the port
/// defaults to 1883.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl FromStr for BrokerAddress {
    type Err = ConfigError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| {
            ConfigError::Adapter(format!("invalid broker address '{}': {}", url, reason))
        };

        let rest = match url.split_once("://") {
            Some((scheme, rest)) => match scheme.to_ascii_lowercase().as_str() {
                "tcp" | "mqtt" => rest,
                "ssl" | "tls" | "mqtts" => return Err(invalid("TLS transports are not supported")),
                _ => return Err(invalid("unsupported scheme")),
            },
            None => url,
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            // Bracketed IPv6 without a port: "[::1]"
            Some((host, port)) if !port.contains(']') => {
                let port = port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
                (host, port)
            }
            _ => (rest, DEFAULT_MQTT_PORT),
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        if host.contains('/') {
            return Err(invalid("unexpected path"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
