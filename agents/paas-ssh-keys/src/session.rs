//! User Session
//!
//! Binds a [`KeysCollection`] to the authenticated broker account and
//! exposes the key operations. Connection settings come from
//! [`SessionConfig`]; the library itself reads no environment variables.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::KeysError;
use crate::keys::{KeysCollection, SshKey};
use crate::public_key::{KeyMaterial, PublicKey};
use crate::transport::{HttpTransport, Transport};

/// Public broker REST endpoint
pub const DEFAULT_BROKER_URL: &str = "https://openshift.redhat.com/broker/rest";

/// Per-request deadline used unless configured otherwise
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Account credentials sent with every request
#[derive(Clone)]
pub enum Credentials {
    /// Unauthenticated (test brokers only)
    None,
    /// HTTP basic auth
    Basic { username: String, password: String },
    /// Bearer token
    Token(String),
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Credentials::Token(token.into())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::None => f.write_str("None"),
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Credentials::Token(_) => f.debug_tuple("Token").field(&"[REDACTED]").finish(),
        }
    }
}

/// Connection settings for a broker session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the broker REST API
    pub broker_url: String,
    pub credentials: Credentials,
    /// Per-request deadline
    pub timeout: Duration,
    /// Skip TLS certificate verification (self-signed test brokers)
    pub accept_invalid_certs: bool,
    pub user_agent: String,
}

impl SessionConfig {
    pub fn new(broker_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            broker_url: broker_url.into(),
            credentials,
            timeout: DEFAULT_TIMEOUT,
            accept_invalid_certs: false,
            user_agent: concat!("paas-ssh-keys/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BROKER_URL, Credentials::None)
    }
}

/// An authenticated broker account
pub struct UserSession {
    keys: KeysCollection,
}

impl UserSession {
    /// Create a session talking HTTP to the configured broker.
    ///
    /// No request is made until the first key operation.
    pub fn new(config: SessionConfig) -> Result<Self, KeysError> {
        let transport = HttpTransport::new(&config)?;
        info!(
            broker_url = %config.broker_url,
            timeout_secs = config.timeout.as_secs(),
            "Broker session created"
        );
        Ok(Self::with_transport(Arc::new(transport)))
    }

    /// Create a session over any transport
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            keys: KeysCollection::new(transport),
        }
    }

    /// The underlying key collection
    pub fn keys(&self) -> &KeysCollection {
        &self.keys
    }

    pub async fn get_ssh_keys(&self) -> Result<Vec<SshKey>, KeysError> {
        self.keys.list().await
    }

    pub async fn get_ssh_key_by_name(&self, name: &str) -> Result<Option<SshKey>, KeysError> {
        self.keys.get_by_name(name).await
    }

    pub async fn get_ssh_key_by_public_key(
        &self,
        public_key: &str,
    ) -> Result<Option<SshKey>, KeysError> {
        self.keys.get_by_public_key(public_key).await
    }

    /// Register a public key, or the public half of a key pair.
    /// The private key never leaves the machine.
    pub async fn add_ssh_key(
        &self,
        name: &str,
        material: impl Into<KeyMaterial>,
    ) -> Result<SshKey, KeysError> {
        self.keys.add(name, material).await
    }

    pub async fn put_ssh_key(&self, name: &str, key: &PublicKey) -> Result<SshKey, KeysError> {
        self.keys.put(name, key).await
    }

    pub async fn delete_key(&self, name: &str) -> Result<(), KeysError> {
        self.keys.delete_by_name(name).await
    }

    /// Forget cached keys; the next read reloads them from the broker.
    pub fn refresh(&self) {
        self.keys.refresh();
    }
}
