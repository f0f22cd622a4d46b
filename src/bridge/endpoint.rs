//! Broker endpoints
//!
//! A [`BrokerEndpoint`] is everything needed for one connect attempt. It is
//! resolved fresh before every attempt because platform logins use a device
//! token that may have expired since the previous session.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;

use crate::config::{BrokerAddress, BrokerSettings, ConfigError};
use crate::error::AuthError;
use crate::platform::{AuthToken, Authenticator, PlatformClient, PlatformCredentials};
use crate::remote::Side;
use crate::topic::FilterSet;

/// MQTT login credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Connection parameters for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub address: BrokerAddress,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    /// Filters to subscribe to; empty means `#`
    pub topics: Vec<String>,
    /// Credentials are a device token plus the system key
    pub platform_auth: bool,
}

impl BrokerEndpoint {
    pub fn subscriptions(&self) -> FilterSet {
        FilterSet::new(&self.topics)
    }
}

/// `<device name>-<0..10000>`
pub fn generate_client_id(device_name: &str) -> String {
    format!("{}-{}", device_name, rand::thread_rng().gen_range(0..10000))
}

fn platform_credentials(token: &AuthToken, system_key: &str) -> Credentials {
    Credentials {
        username: token.as_str().to_string(),
        password: Some(system_key.to_string()),
    }
}

/// Produces the endpoint for each connect attempt of one side
#[async_trait]
pub trait EndpointSource: Send + Sync {
    fn side(&self) -> Side;

    async fn resolve(&self) -> Result<BrokerEndpoint, AuthError>;
}

/// The platform broker, logged into with a fresh device token
pub struct PlatformEndpointSource {
    auth: Arc<dyn Authenticator>,
    address: BrokerAddress,
    device_name: String,
    subscription: String,
    /// Token from bootstrap, used for the first attempt only
    initial_token: Mutex<Option<AuthToken>>,
}

impl PlatformEndpointSource {
    pub fn new(
        auth: Arc<dyn Authenticator>,
        address: BrokerAddress,
        device_name: impl Into<String>,
        subscription: impl Into<String>,
    ) -> Self {
        Self {
            auth,
            address,
            device_name: device_name.into(),
            subscription: subscription.into(),
            initial_token: Mutex::new(None),
        }
    }

    pub fn with_initial_token(self, token: AuthToken) -> Self {
        *self.initial_token.lock() = Some(token);
        self
    }
}

#[async_trait]
impl EndpointSource for PlatformEndpointSource {
    fn side(&self) -> Side {
        Side::Platform
    }

    async fn resolve(&self) -> Result<BrokerEndpoint, AuthError> {
        let cached = self.initial_token.lock().take();
        let token = match cached {
            Some(token) => token,
            None => self.auth.authenticate().await?,
        };

        Ok(BrokerEndpoint {
            address: self.address.clone(),
            client_id: generate_client_id(&self.device_name),
            credentials: Some(platform_credentials(&token, self.auth.system_key())),
            topics: vec![self.subscription.clone()],
            platform_auth: true,
        })
    }
}

/// The secondary broker described by the adapter settings
pub struct SecondaryEndpointSource {
    settings: BrokerSettings,
    address: BrokerAddress,
    device_name: String,
    /// Present when the secondary is a platform broker without static credentials
    auth: Option<Arc<dyn Authenticator>>,
}

impl SecondaryEndpointSource {
    /// `device_name` is this adapter's name, used for the client id
    pub fn new(settings: BrokerSettings, device_name: impl Into<String>) -> Result<Self, ConfigError> {
        let address = settings.messaging_url.parse()?;
        let auth = settings.needs_platform_auth().then(|| {
            Arc::new(PlatformClient::new(PlatformCredentials {
                platform_url: settings.platform_url.clone(),
                system_key: settings.system_key.clone(),
                system_secret: settings.system_secret.clone(),
                device_name: settings.device_name.clone(),
                active_key: settings.active_key.clone(),
            })) as Arc<dyn Authenticator>
        });

        Ok(Self {
            settings,
            address,
            device_name: device_name.into(),
            auth,
        })
    }

    /// Replace the authenticator used for platform-broker logins
    pub fn with_authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = Some(auth);
        self
    }

    fn static_credentials(&self) -> Option<Credentials> {
        if self.settings.username.is_empty() {
            // MQTT 3.1.1 has no password-only login
            return None;
        }
        Some(Credentials {
            username: self.settings.username.clone(),
            password: (!self.settings.password.is_empty()).then(|| self.settings.password.clone()),
        })
    }
}

#[async_trait]
impl EndpointSource for SecondaryEndpointSource {
    fn side(&self) -> Side {
        Side::Secondary
    }

    async fn resolve(&self) -> Result<BrokerEndpoint, AuthError> {
        let (credentials, platform_auth) = match &self.auth {
            Some(auth) if self.settings.needs_platform_auth() => {
                let token = auth.authenticate().await?;
                (Some(platform_credentials(&token, auth.system_key())), true)
            }
            _ => (self.static_credentials(), false),
        };

        Ok(BrokerEndpoint {
            address: self.address.clone(),
            client_id: generate_client_id(&self.device_name),
            credentials,
            topics: self.settings.topics.clone(),
            platform_auth,
        })
    }
}
