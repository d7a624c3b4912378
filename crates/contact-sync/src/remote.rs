//! `RemoteContactServiceTrait` backed by the HTTP client.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use safecircle_core::contacts::{ContactRecord, RemoteContactServiceTrait};
use safecircle_core::errors::RemoteError;
use safecircle_core::secrets::{SecretStore, CONTACT_API_TOKEN_KEY};

use crate::client::ContactServiceClient;
use crate::config::ContactApiConfig;
use crate::error::Result;

/// Reads the access token on every call so sign-in and sign-out by the host
/// take effect without rebuilding the service.
pub struct HttpContactService {
    client: ContactServiceClient,
    secrets: Arc<dyn SecretStore>,
    token_key: String,
}

impl HttpContactService {
    pub fn new(config: &ContactApiConfig, secrets: Arc<dyn SecretStore>) -> Result<Self> {
        Ok(Self {
            client: ContactServiceClient::new(config)?,
            secrets,
            token_key: CONTACT_API_TOKEN_KEY.to_string(),
        })
    }

    pub fn with_token_key(mut self, token_key: impl Into<String>) -> Self {
        self.token_key = token_key.into();
        self
    }

    fn access_token(&self) -> safecircle_core::Result<String> {
        self.secrets
            .get_secret(&self.token_key)?
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                RemoteError::auth("No access token configured. Please sign in first.").into()
            })
    }
}

#[async_trait]
impl RemoteContactServiceTrait for HttpContactService {
    async fn fetch_record(&self) -> safecircle_core::Result<ContactRecord> {
        let token = self.access_token()?;
        let record = self.client.fetch_record(&token).await?;
        debug!(
            "[ContactApi] Fetched {} contacts from {}",
            record.emergency_contacts.len(),
            self.client.base_url()
        );
        Ok(record)
    }

    async fn replace_record(&self, record: &ContactRecord) -> safecircle_core::Result<()> {
        let token = self.access_token()?;
        self.client.replace_record(&token, record).await?;
        Ok(())
    }
}
