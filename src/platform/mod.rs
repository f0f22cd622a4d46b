//! Device-management platform collaborators
//!
//! The bridge needs two things from the platform: a device token to log in
//! to brokers with, and the adapter configuration record. Both are reached
//! through traits so the bridge can be driven by test doubles.

mod client;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{AdapterConfig, ConfigError};
use crate::error::{AuthError, BridgeError};

pub use client::{PlatformClient, PlatformCredentials};

/// Device token returned by a successful authentication
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

/// Authenticates this adapter as a platform device
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<AuthToken, AuthError>;

    /// System key that accompanies the device token in broker logins
    fn system_key(&self) -> &str;
}

/// Source of the adapter configuration record
#[async_trait]
pub trait AdapterConfigSource: Send + Sync {
    /// Fetch the first record of `collection_id` whose `adapter_name` equals `adapter_name`
    async fn fetch_adapter_record(
        &self,
        token: &AuthToken,
        collection_id: &str,
        adapter_name: &str,
    ) -> Result<Value, ConfigError>;
}

/// Authenticate, retrying at a fixed interval until success or shutdown
pub async fn authenticate_with_retry(
    auth: &dyn Authenticator,
    interval: Duration,
    shutdown: &CancellationToken,
) -> Result<AuthToken, BridgeError> {
    loop {
        match auth.authenticate().await {
            Ok(token) => return Ok(token),
            Err(e) => warn!("Platform authentication failed: {}, retrying in {:?}", e, interval),
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Err(BridgeError::Shutdown),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Fetch and validate the adapter configuration; every failure is fatal
pub async fn load_adapter_config(
    source: &dyn AdapterConfigSource,
    token: &AuthToken,
    collection_id: &str,
    adapter_name: &str,
) -> Result<AdapterConfig, ConfigError> {
    info!("Fetching adapter config for '{}'", adapter_name);
    let record = source
        .fetch_adapter_record(token, collection_id, adapter_name)
        .await?;
    AdapterConfig::from_record(&record)
}
