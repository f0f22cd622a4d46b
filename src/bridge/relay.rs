//! Relay Engine
//!
//! Moves messages between the two sides:
//! - platform -> secondary: strip the topic root, count the forward in the
//!   ledger, publish on the secondary broker
//! - secondary -> platform: drop echoes of our own forwards, otherwise prefix
//!   with `<root>/incoming` and publish on the platform
//!
//! Publishing failures are logged and the message is dropped; nothing is
//! retried or buffered here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::connection::Inbound;
use super::ledger::{EchoLedger, LedgerCheck};
use super::topic_mapper::TopicMapper;
use crate::remote::{Message, RemotePeer, Side};

/// What happened to one relayed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Published on the other side
    Forwarded,
    /// Recognized as the echo of a forward and dropped
    Suppressed,
    /// Dropped because of a malformed topic or a failed publish
    Dropped,
}

/// Counters since the relay was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub platform_forwarded: u64,
    pub platform_dropped: u64,
    pub secondary_forwarded: u64,
    pub secondary_suppressed: u64,
    pub secondary_dropped: u64,
}

#[derive(Debug, Default)]
struct RelayCounters {
    platform_forwarded: AtomicU64,
    platform_dropped: AtomicU64,
    secondary_forwarded: AtomicU64,
    secondary_suppressed: AtomicU64,
    secondary_dropped: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub struct RelayEngine {
    ledger: Arc<EchoLedger>,
    mapper: TopicMapper,
    platform: Arc<dyn RemotePeer>,
    secondary: Arc<dyn RemotePeer>,
    counters: RelayCounters,
}

impl RelayEngine {
    pub fn new(
        ledger: Arc<EchoLedger>,
        mapper: TopicMapper,
        platform: Arc<dyn RemotePeer>,
        secondary: Arc<dyn RemotePeer>,
    ) -> Self {
        Self {
            ledger,
            mapper,
            platform,
            secondary,
            counters: RelayCounters::default(),
        }
    }

    pub fn stats(&self) -> RelayStats {
        let c = &self.counters;
        RelayStats {
            platform_forwarded: c.platform_forwarded.load(Ordering::Relaxed),
            platform_dropped: c.platform_dropped.load(Ordering::Relaxed),
            secondary_forwarded: c.secondary_forwarded.load(Ordering::Relaxed),
            secondary_suppressed: c.secondary_suppressed.load(Ordering::Relaxed),
            secondary_dropped: c.secondary_dropped.load(Ordering::Relaxed),
        }
    }

    /// Forward one message received from the platform to the secondary broker
    pub async fn handle_platform_message(&self, message: &Message) -> RelayOutcome {
        let topic = match self.mapper.to_secondary(&message.topic) {
            Ok(topic) => topic,
            Err(e) => {
                warn!("Relay: Dropping platform message: {}", e);
                bump(&self.counters.platform_dropped);
                return RelayOutcome::Dropped;
            }
        };

        // Without a granted secondary subscription no echo will ever arrive
        let expects_echo = self.secondary.accepts(&topic);
        if expects_echo {
            self.ledger.record_forward(&topic, &message.payload);
        }

        match self.secondary.publish(&topic, message.payload.clone()).await {
            Ok(()) => {
                debug!("Relay: {} -> secondary {}", message.topic, topic);
                bump(&self.counters.platform_forwarded);
                RelayOutcome::Forwarded
            }
            Err(e) => {
                if expects_echo {
                    self.ledger.release(&topic, &message.payload);
                }
                warn!("Relay: Failed to forward {} to secondary: {}", message.topic, e);
                bump(&self.counters.platform_dropped);
                RelayOutcome::Dropped
            }
        }
    }

    /// Forward one message received from the secondary broker to the platform
    pub async fn handle_secondary_message(&self, message: &Message) -> RelayOutcome {
        if self.ledger.check_and_consume(&message.topic, &message.payload) == LedgerCheck::Echo {
            debug!("Relay: Ignoring echo of forwarded message on {}", message.topic);
            bump(&self.counters.secondary_suppressed);
            return RelayOutcome::Suppressed;
        }

        let topic = self.mapper.to_platform(&message.topic);
        match self.platform.publish(&topic, message.payload.clone()).await {
            Ok(()) => {
                debug!("Relay: {} -> platform {}", message.topic, topic);
                bump(&self.counters.secondary_forwarded);
                RelayOutcome::Forwarded
            }
            Err(e) => {
                warn!("Relay: Failed to forward {} to platform: {}", message.topic, e);
                bump(&self.counters.secondary_dropped);
                RelayOutcome::Dropped
            }
        }
    }

    /// Relay everything arriving on one connection's inbound stream
    ///
    /// Returns when the stream closes or `cancel` fires.
    pub async fn run_flow(self: Arc<Self>, from: Side, mut inbound: Inbound, cancel: CancellationToken) {
        debug!("Relay: {} flow started", from);
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = inbound.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            match from {
                Side::Platform => self.handle_platform_message(&message).await,
                Side::Secondary => self.handle_secondary_message(&message).await,
            };
        }
        debug!("Relay: {} flow stopped", from);
    }
}
