use async_trait::async_trait;

use super::contacts_model::ContactRecord;
use crate::errors::Result;

/// Generic device key-value persistence (string keys, string values).
///
/// Implementations must make every write atomic: after a failed `set` or
/// `set_many`, `get` returns the previous values.
#[async_trait]
pub trait KeyValueStoreTrait: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Writes every entry or none of them.
    async fn set_many(&self, entries: Vec<(String, String)>) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// Record-oriented remote holding the authoritative contact list.
#[async_trait]
pub trait RemoteContactServiceTrait: Send + Sync {
    /// GET the whole record. An empty record means "no contacts yet".
    async fn fetch_record(&self) -> Result<ContactRecord>;

    /// POST the whole record, replacing the server copy.
    async fn replace_record(&self, record: &ContactRecord) -> Result<()>;
}
