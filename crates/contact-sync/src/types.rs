//! Wire types of the contact service that are not part of the core model.

use serde::{Deserialize, Serialize};

/// Error body returned by the service on non-success statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub code: String,
    #[serde(alias = "detail")]
    pub message: String,
}
