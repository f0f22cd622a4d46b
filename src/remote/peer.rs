//! Remote Peer Abstraction
//!
//! The publish capability the relay depends on. Each bridge side is exposed
//! to the relay as a `RemotePeer`; the relay never sees sockets, sessions or
//! reconnects.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::PublishError;

/// Which of the two brokers a connection or flow belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The device-management platform's broker
    Platform,
    /// The external broker being bridged
    Secondary,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Platform => "platform",
            Side::Secondary => "secondary",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one broker connection
///
/// Written only by the connection's own session task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session; either never started or shut down on request
    #[default]
    Disconnected,
    /// TCP connect and MQTT handshake in progress
    Connecting,
    /// CONNACK accepted; publishes are allowed
    Connected,
    /// Session ended by an error or by the broker
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Trait for publishing to one of the bridged brokers
///
/// Implemented by:
/// - `ConnectionManager`: one live MQTT session
/// - `BrokerLink`: the stable per-side handle the supervisor re-points on reconnect
#[async_trait]
pub trait RemotePeer: Send + Sync {
    /// Side this peer publishes to
    fn side(&self) -> Side;

    /// Current connection state
    fn state(&self) -> ConnectionState;

    /// Whether the broker granted a subscription that matches `topic`
    ///
    /// False while there is no session.
    fn accepts(&self, topic: &str) -> bool;

    /// Publish at QoS 0
    ///
    /// Fails with [`PublishError::NotConnected`] unless the state is
    /// [`ConnectionState::Connected`].
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError>;
}
