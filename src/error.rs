//! Error taxonomy
//!
//! Each error type is contained to the scope it describes: a `PublishError`
//! or `MalformedTopicError` affects one message, a `ConnectError` one side's
//! session, while `ConfigError` and bootstrap failures end the process.

use thiserror::Error;

use crate::protocol::{ConnectReturnCode, ProtocolError};
use crate::remote::Side;

/// Device authentication against the platform failed
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("authentication rejected: status {status} body={body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("authentication response has no {0}")]
    MissingField(&'static str),
}

/// A broker session could not be established
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("could not resolve endpoint: {0}")]
    Endpoint(#[from] AuthError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("broker refused connection: {0}")]
    Rejected(ConnectReturnCode),
    #[error("broker rejected every subscription")]
    SubscriptionRejected,
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("connection closed by broker during handshake")]
    Closed,
    #[error("cancelled")]
    Cancelled,
}

/// A single publish could not be handed to a broker
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("{side} broker is not connected")]
    NotConnected { side: Side },
    #[error("outbound queue to {side} broker is full")]
    QueueFull { side: Side },
}

/// A platform topic that does not have the `<root>/outgoing/<topic>` shape
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed platform topic '{topic}': expected at least three levels with a non-empty remainder")]
pub struct MalformedTopicError {
    pub topic: String,
}

/// Bridge startup stopped before it completed
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("shutdown requested before the bridge started")]
    Shutdown,
}
