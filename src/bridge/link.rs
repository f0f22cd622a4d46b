//! Stable per-side publish handle

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::connection::ConnectionManager;
use crate::error::PublishError;
use crate::remote::{ConnectionState, RemotePeer, Side};

/// The relay's view of one side
///
/// The supervisor installs each new [`ConnectionManager`] here and clears it
/// when the session ends. While empty, publishes fail with
/// [`PublishError::NotConnected`].
#[derive(Debug)]
pub struct BrokerLink {
    side: Side,
    current: RwLock<Option<Arc<ConnectionManager>>>,
}

impl BrokerLink {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            current: RwLock::new(None),
        }
    }

    pub fn install(&self, manager: Arc<ConnectionManager>) {
        *self.current.write() = Some(manager);
    }

    pub fn clear(&self) -> Option<Arc<ConnectionManager>> {
        self.current.write().take()
    }

    pub fn is_installed(&self) -> bool {
        self.current.read().is_some()
    }

    fn current(&self) -> Option<Arc<ConnectionManager>> {
        self.current.read().clone()
    }
}

#[async_trait]
impl RemotePeer for BrokerLink {
    fn side(&self) -> Side {
        self.side
    }

    fn state(&self) -> ConnectionState {
        self.current()
            .map(|m| m.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    fn accepts(&self, topic: &str) -> bool {
        self.current()
            .map(|m| m.granted().matches(topic))
            .unwrap_or(false)
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        // Clone the handle out so no lock is held across the await
        let manager = self
            .current()
            .ok_or(PublishError::NotConnected { side: self.side })?;
        manager.publish(topic, payload).await
    }
}
