//! Client configuration, read from the environment by hosts.

use std::time::Duration;

use crate::error::{ContactApiError, Result};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const API_URL_ENV: &str = "SAFECIRCLE_API_URL";
const TIMEOUT_ENV: &str = "SAFECIRCLE_API_TIMEOUT_SECS";
const SESSION_COOKIE_ENV: &str = "SAFECIRCLE_SESSION_COOKIE";

/// How the stored credential is attached to requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>`
    Bearer,
    /// `Cookie: <name>=<token>`
    SessionCookie(String),
}

#[derive(Debug, Clone)]
pub struct ContactApiConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub auth: AuthScheme,
}

impl ContactApiConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            auth: AuthScheme::Bearer,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_auth(mut self, auth: AuthScheme) -> Self {
        self.auth = auth;
        self
    }

    /// Reads `SAFECIRCLE_API_URL` (required), `SAFECIRCLE_API_TIMEOUT_SECS`
    /// and `SAFECIRCLE_SESSION_COOKIE` (cookie name; bearer auth when unset).
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var(API_URL_ENV)
            .ok()
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ContactApiError::invalid_request(format!(
                    "{} not configured. Contact sync is disabled.",
                    API_URL_ENV
                ))
            })?;

        let mut config = Self::new(&base_url);
        if let Some(secs) = std::env::var(TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
        {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(cookie) = std::env::var(SESSION_COOKIE_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
        {
            config.auth = AuthScheme::SessionCookie(cookie);
        }
        Ok(config)
    }
}
