//! Error types shared by the core and the crates that implement its traits.

use thiserror::Error;

use crate::sync::SyncRetryClass;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for the contact sync core.
#[derive(Debug, Error)]
pub enum Error {
    /// Local persistence failed; the previous durable value is still in place.
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// A value could not be encoded or decoded as JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A contact or payload failed schema validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The remote contact service could not be reached or rejected the request.
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A secret (access token, session cookie) could not be read.
    #[error("Secret store error: {0}")]
    Secret(String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True when the failure threatens durability and must reach the user.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Serialization(_))
    }
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad failure category of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Timeout, refused connection, DNS failure. The device is treated as offline.
    Transport,
    /// The service answered with a non-success status.
    Api { status: u16 },
    /// No usable credential was available.
    Auth,
    /// The response body did not match the record schema.
    Decode,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transport, message)
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Api { status }, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Auth, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Decode, message)
    }

    /// Whether this failure means connectivity was lost.
    pub fn is_offline(&self) -> bool {
        self.kind == RemoteErrorKind::Transport
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> SyncRetryClass {
        match self.kind {
            RemoteErrorKind::Transport => SyncRetryClass::Retryable,
            RemoteErrorKind::Api { status } => SyncRetryClass::from_http_status(status),
            RemoteErrorKind::Auth => SyncRetryClass::ReauthRequired,
            RemoteErrorKind::Decode => SyncRetryClass::Permanent,
        }
    }
}
