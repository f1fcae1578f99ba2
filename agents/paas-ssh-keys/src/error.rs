//! Error types for SSH key operations.

use std::path::PathBuf;
use thiserror::Error;

/// Broker exit code: a key with this name already exists
pub const EXIT_KEY_NAME_EXISTS: i32 = 120;
/// Broker exit code: this public key is registered under another name
pub const EXIT_KEY_CONTENT_EXISTS: i32 = 121;
/// Broker exit code: no key with this name
pub const EXIT_KEY_NOT_FOUND: i32 = 118;

/// A non-success response from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointError {
    /// HTTP status code
    pub status: u16,
    /// Broker exit code of the first message that carried one
    pub exit_code: Option<i32>,
    /// Request field the broker complained about
    pub field: Option<String>,
    /// Server message text
    pub message: String,
}

impl EndpointError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            exit_code: None,
            field: None,
            message: message.into(),
        }
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404 || self.exit_code == Some(EXIT_KEY_NOT_FOUND)
    }

    pub fn is_duplicate_content(&self) -> bool {
        self.exit_code == Some(EXIT_KEY_CONTENT_EXISTS) || self.field.as_deref() == Some("content")
    }

    pub fn is_duplicate_name(&self) -> bool {
        self.exit_code == Some(EXIT_KEY_NAME_EXISTS) || self.field.as_deref() == Some("name")
    }
}

impl std::fmt::Display for EndpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP {}", self.status)?;
        if let Some(code) = self.exit_code {
            write!(f, " (exit code {code})")?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// Errors that can occur during SSH key operations
#[derive(Debug, Error)]
pub enum KeysError {
    /// Malformed public key or unknown wire type
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// Local filesystem failure
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// External key pair generator failed
    #[error("Key generation failed: {0}")]
    KeygenFailed(String),

    /// A key with this name already exists (cache or server)
    #[error("SSH key with name {name} already exists")]
    DuplicateKeyName { name: String },

    /// The public key is already registered under another name
    #[error("Public key already in use: {0}")]
    DuplicateKeyContent(EndpointError),

    /// Server rejected the key material
    #[error("Invalid key: {0}")]
    InvalidKey(EndpointError),

    /// No such key on the server
    #[error("No SSH key named {name}")]
    NoSuchKey { name: String },

    /// Operation on a destroyed handle
    #[error("SSH key {name} has been destroyed")]
    KeyDestroyed { name: String },

    /// Unclassified non-success response
    #[error("Endpoint error: {0}")]
    Endpoint(EndpointError),

    /// Network, TLS, auth or decoding failure
    #[error("Transport error: {0:#}")]
    Transport(#[from] anyhow::Error),
}

impl KeysError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        KeysError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for every kind carrying a server response
    pub fn is_endpoint(&self) -> bool {
        self.endpoint().is_some()
    }

    /// The server response behind this error, if any
    pub fn endpoint(&self) -> Option<&EndpointError> {
        match self {
            KeysError::Endpoint(e) | KeysError::DuplicateKeyContent(e) | KeysError::InvalidKey(e) => {
                Some(e)
            }
            _ => None,
        }
    }
}

/// Classify a failed `POST /user/keys`.
pub(crate) fn classify_create(err: KeysError, name: &str) -> KeysError {
    match err {
        KeysError::Endpoint(e) if e.is_duplicate_content() => KeysError::DuplicateKeyContent(e),
        KeysError::Endpoint(e) if e.status == 409 || (e.status == 422 && e.is_duplicate_name()) => {
            KeysError::DuplicateKeyName {
                name: name.to_string(),
            }
        }
        KeysError::Endpoint(e) if e.status == 422 => KeysError::InvalidKey(e),
        other => other,
    }
}
