//! Access to credentials owned by the host's auth module.

use crate::errors::Result;

/// Secret storage contract (keyring, secure enclave, env).
///
/// The sync core only reads from it; signing in and out is the host's job.
pub trait SecretStore: Send + Sync {
    fn get_secret(&self, key: &str) -> Result<Option<String>>;
    fn set_secret(&self, key: &str, value: &str) -> Result<()>;
    fn delete_secret(&self, key: &str) -> Result<()>;
}

/// Key under which the host stores the API access token or session id.
pub const CONTACT_API_TOKEN_KEY: &str = "contact_api_access_token";
