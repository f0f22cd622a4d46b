//! MQTT Packet Definitions
//!
//! MQTT v3.1.1 packets used on both sides of the bridge. The fake broker in
//! the integration tests decodes the client-to-server half of this set.

use bytes::Bytes;

use super::{ConnectReturnCode, PacketType, QoS, SubscribeReturnCode};

/// MQTT Packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Box<Connect>),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PubAck),
    Subscribe(Subscribe),
    SubAck(SubAck),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    /// Get the packet type
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }
}

/// CONNECT packet (client -> server)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    /// Client identifier
    pub client_id: String,
    /// Clean session flag
    pub clean_session: bool,
    /// Keep alive interval in seconds
    pub keep_alive: u16,
    /// Username (optional)
    pub username: Option<String>,
    /// Password (optional, only valid together with a username)
    pub password: Option<Bytes>,
}

impl Default for Connect {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            clean_session: true,
            keep_alive: 60,
            username: None,
            password: None,
        }
    }
}

/// CONNACK packet (server -> client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnAck {
    /// Session present flag
    pub session_present: bool,
    /// Return code
    pub return_code: ConnectReturnCode,
}

/// PUBLISH packet (bidirectional)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    /// Duplicate delivery flag
    pub dup: bool,
    /// Quality of service
    pub qos: QoS,
    /// Retain flag
    pub retain: bool,
    /// Topic name
    pub topic: String,
    /// Packet identifier (QoS > 0 only)
    pub packet_id: Option<u16>,
    /// Application payload
    pub payload: Bytes,
}

impl Publish {
    /// A non-retained QoS 0 publish, the only kind the bridge sends
    pub fn at_most_once(topic: impl Into<String>, payload: Bytes) -> Self {
        Self {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: topic.into(),
            packet_id: None,
            payload,
        }
    }
}

/// PUBACK packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAck {
    pub packet_id: u16,
}

/// SUBSCRIBE packet (client -> server)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    /// Packet identifier
    pub packet_id: u16,
    /// Topic filters with their requested QoS
    pub filters: Vec<(String, QoS)>,
}

/// SUBACK packet (server -> client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    /// Packet identifier
    pub packet_id: u16,
    /// One return code per requested filter, in request order
    pub return_codes: Vec<SubscribeReturnCode>,
}
