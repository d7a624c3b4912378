//! Contact service API client.
//!
//! The service exposes one record per signed-in user at `/api/v1/profile`:
//! GET returns it, POST replaces it wholesale.

use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, COOKIE};
use safecircle_core::contacts::ContactRecord;

use crate::config::{AuthScheme, ContactApiConfig};
use crate::error::{ContactApiError, Result};
use crate::types::ApiErrorResponse;

const PROFILE_PATH: &str = "/api/v1/profile";
const MAX_LOG_BODY_CHARS: usize = 512;

fn truncate_for_log(body: &str) -> String {
    let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
    if body.chars().count() > MAX_LOG_BODY_CHARS {
        preview.push_str("...");
    }
    preview
}

/// Decodes a profile body. An empty body or `null` means "no contacts yet".
pub fn decode_record(body: &str) -> Result<ContactRecord> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(ContactRecord::default());
    }

    let record: ContactRecord = serde_json::from_str(trimmed)?;
    if !record.unrecognized_contacts.is_empty() {
        warn!(
            "[ContactApi] {} contact entries are not valid contacts; carrying them as-is",
            record.unrecognized_contacts.len()
        );
    }
    Ok(record)
}

#[derive(Debug, Clone)]
pub struct ContactServiceClient {
    client: reqwest::Client,
    base_url: String,
    auth: AuthScheme,
}

impl ContactServiceClient {
    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[ContactApi] Response status: {}", status);
            return;
        }
        debug!(
            "[ContactApi] Response error ({}): {}",
            status,
            truncate_for_log(body)
        );
    }

    pub fn new(config: &ContactApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                ContactApiError::invalid_request(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth: config.auth.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn profile_url(&self) -> String {
        format!("{}{}", self.base_url, PROFILE_PATH)
    }

    /// Create headers for an API request.
    fn headers(&self, token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        match &self.auth {
            AuthScheme::Bearer => {
                let value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|_| ContactApiError::auth("Invalid access token format"))?;
                headers.insert(AUTHORIZATION, value);
            }
            AuthScheme::SessionCookie(name) => {
                let value = HeaderValue::from_str(&format!("{}={}", name, token))
                    .map_err(|_| ContactApiError::auth("Invalid session cookie format"))?;
                headers.insert(COOKIE, value);
            }
        }

        Ok(headers)
    }

    /// Read the body and turn non-success statuses into API errors.
    async fn read_body(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                let message = if error.code.is_empty() {
                    error.message
                } else {
                    format!("{}: {}", error.code, error.message)
                };
                return Err(ContactApiError::api(status.as_u16(), message));
            }
            return Err(ContactApiError::api(
                status.as_u16(),
                format!("Request failed: {}", truncate_for_log(&body)),
            ));
        }

        Ok(body)
    }

    /// GET /api/v1/profile
    pub async fn fetch_record(&self, token: &str) -> Result<ContactRecord> {
        let response = self
            .client
            .get(self.profile_url())
            .headers(self.headers(token)?)
            .send()
            .await?;
        let body = Self::read_body(response).await?;
        decode_record(&body).map_err(|e| {
            warn!(
                "[ContactApi] Failed to decode profile. Body: {}, Error: {}",
                truncate_for_log(&body),
                e
            );
            e
        })
    }

    /// POST /api/v1/profile
    pub async fn replace_record(&self, token: &str, record: &ContactRecord) -> Result<()> {
        let response = self
            .client
            .post(self.profile_url())
            .headers(self.headers(token)?)
            .json(record)
            .send()
            .await?;
        Self::read_body(response).await?;
        debug!(
            "[ContactApi] Replaced profile with {} contacts",
            record.emergency_contacts.len()
        );
        Ok(())
    }
}
