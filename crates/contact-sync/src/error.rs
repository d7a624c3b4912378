//! Error types for the contact service client.

use safecircle_core::errors::{Error as CoreError, RemoteError};
use safecircle_core::sync::SyncRetryClass;
use thiserror::Error;

/// Result type alias for contact service calls.
pub type Result<T> = std::result::Result<T, ContactApiError>;

pub type ApiRetryClass = SyncRetryClass;

/// Errors that can occur while talking to the contact service.
#[derive(Debug, Error)]
pub enum ContactApiError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API error response from the service
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid request or client configuration
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication error (missing or malformed credential)
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl ContactApiError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> ApiRetryClass {
        match self {
            Self::Api { status, .. } => ApiRetryClass::from_http_status(*status),
            Self::Http(err) if err.is_decode() => ApiRetryClass::Permanent,
            Self::Http(_) => ApiRetryClass::Retryable,
            Self::Json(_) => ApiRetryClass::Permanent,
            Self::InvalidRequest(_) => ApiRetryClass::Permanent,
            Self::Auth(_) => ApiRetryClass::ReauthRequired,
        }
    }
}

impl From<ContactApiError> for RemoteError {
    fn from(err: ContactApiError) -> Self {
        let message = err.to_string();
        match err {
            ContactApiError::Api { status, .. } => RemoteError::api(status, message),
            ContactApiError::Http(e) if e.is_decode() => RemoteError::decode(message),
            ContactApiError::Http(_) => RemoteError::transport(message),
            ContactApiError::Json(_) => RemoteError::decode(message),
            ContactApiError::InvalidRequest(_) => RemoteError::decode(message),
            ContactApiError::Auth(_) => RemoteError::auth(message),
        }
    }
}

impl From<ContactApiError> for CoreError {
    fn from(err: ContactApiError) -> Self {
        CoreError::Remote(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safecircle_core::errors::RemoteErrorKind;

    #[test]
    fn retry_class_for_auth_error_is_reauth() {
        let err = ContactApiError::api(401, "unauthorized");
        assert_eq!(err.retry_class(), ApiRetryClass::ReauthRequired);
        assert_eq!(err.status_code(), Some(401));
    }

    #[test]
    fn conversion_keeps_status_and_category() {
        let remote: RemoteError = ContactApiError::api(503, "down").into();
        assert_eq!(remote.kind, RemoteErrorKind::Api { status: 503 });
        assert_eq!(remote.retry_class(), SyncRetryClass::Retryable);

        let remote: RemoteError = ContactApiError::auth("no token").into();
        assert_eq!(remote.kind, RemoteErrorKind::Auth);

        let json_err = serde_json::from_str::<serde_json::Value>("{").expect_err("bad json");
        let remote: RemoteError = ContactApiError::from(json_err).into();
        assert_eq!(remote.kind, RemoteErrorKind::Decode);
        assert!(!remote.is_offline());
    }
}
