//! Relayed message type

use bytes::Bytes;

/// A message received from, or bound for, one of the two brokers
///
/// Cloning is cheap: the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic exactly as it appeared on the wire
    pub topic: String,
    /// Raw payload, possibly empty
    pub payload: Bytes,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}
