//! Remote Broker Communication
//!
//! Shared abstractions between the connection layer and the relay: the
//! message value, the per-side connection state and the publish trait.

mod message;
mod peer;

pub use message::Message;
pub use peer::{ConnectionState, RemotePeer, Side};
