//! mqtt-bridge-adapter - MQTT v3.1.1 bridge for a device-management platform
//!
//! Relays traffic between the platform's MQTT broker and a secondary MQTT
//! broker, mapping topics under a configurable root and suppressing the
//! echoes of its own forwards.

pub mod bridge;
pub mod codec;
pub mod config;
pub mod error;
pub mod platform;
pub mod protocol;
pub mod remote;
pub mod topic;

pub use bridge::{BridgeSupervisor, EchoLedger, RelayEngine, TopicMapper};
pub use config::{AdapterConfig, Config};
pub use error::BridgeError;
pub use protocol::QoS;
pub use remote::{ConnectionState, Message, RemotePeer, Side};
