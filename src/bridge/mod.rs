//! MQTT Bridge Module
//!
//! Bridges a device-management platform broker with a secondary MQTT broker.
//!
//! # Topic layout
//!
//! ```text
//! platform  <root>/outgoing/<topic>  ──►  secondary  <topic>
//! platform  <root>/incoming/<topic>  ◄──  secondary  <topic>
//! ```
//!
//! # Loop Prevention
//!
//! The secondary broker gives no way to tell our own publishes apart from
//! anyone else's, and the bridge subscribes to the topics it forwards to.
//! Every forward is therefore counted in an [`EchoLedger`] and the matching
//! message is dropped when it comes back.

mod backoff;
mod connection;
mod endpoint;
mod ledger;
mod link;
mod relay;
mod supervisor;
mod topic_mapper;


pub use backoff::BackoffPolicy;
pub use connection::{ConnectionManager, Inbound};
pub use endpoint::{
    generate_client_id, BrokerEndpoint, Credentials, EndpointSource, PlatformEndpointSource,
    SecondaryEndpointSource,
};
pub use ledger::{EchoLedger, LedgerCheck};
pub use link::BrokerLink;
pub use relay::{RelayEngine, RelayOutcome, RelayStats};
pub use supervisor::{BridgeSupervisor, SidePhase};
pub use topic_mapper::TopicMapper;
