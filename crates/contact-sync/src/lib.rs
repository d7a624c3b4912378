//! HTTP client for the remote contact service.

pub mod client;
pub mod config;
pub mod error;
pub mod remote;
pub mod types;

pub use client::ContactServiceClient;
pub use config::{AuthScheme, ContactApiConfig};
pub use error::{ApiRetryClass, ContactApiError, Result};
pub use remote::HttpContactService;
pub use types::ApiErrorResponse;
