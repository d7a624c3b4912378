//! Typed contact persistence over the device key-value store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;

use super::contacts_model::{Contact, ContactSet, Tombstone};
use super::contacts_traits::KeyValueStoreTrait;
use crate::errors::{DatabaseError, Error, Result};

pub const CONTACTS_KEY: &str = "emergency_contacts";
pub const TOMBSTONES_KEY: &str = "emergency_contacts_tombstones";
pub const LAST_SYNC_AT_KEY: &str = "contacts_last_sync_at";

/// Everything the sync engine keeps durable between sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalSnapshot {
    pub contacts: ContactSet,
    pub tombstones: Vec<Tombstone>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct LocalContactStore {
    kv: Arc<dyn KeyValueStoreTrait>,
}

impl LocalContactStore {
    pub fn new(kv: Arc<dyn KeyValueStoreTrait>) -> Self {
        Self { kv }
    }

    /// Persisted contact list; empty when nothing was ever saved.
    pub async fn get(&self) -> Result<ContactSet> {
        match self.kv.get(CONTACTS_KEY).await? {
            Some(raw) => {
                let contacts: Vec<Contact> = serde_json::from_str(&raw)?;
                Ok(ContactSet::from_untrusted(contacts, "stored"))
            }
            None => Ok(ContactSet::default()),
        }
    }

    /// Replaces the persisted contact list. Either fully applied or not at all.
    pub async fn set(&self, contacts: &ContactSet) -> Result<()> {
        let raw = serde_json::to_string(contacts)?;
        self.kv.set(CONTACTS_KEY, raw).await
    }

    pub async fn tombstones(&self) -> Result<Vec<Tombstone>> {
        match self.kv.get(TOMBSTONES_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.kv.get(LAST_SYNC_AT_KEY).await? else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| {
                Error::Database(DatabaseError::Internal(format!(
                    "Stored last sync timestamp '{}' is invalid: {}",
                    raw, e
                )))
            })
    }

    pub async fn load(&self) -> Result<LocalSnapshot> {
        let snapshot = LocalSnapshot {
            contacts: self.get().await?,
            tombstones: self.tombstones().await?,
            last_sync_at: self.last_sync_at().await?,
        };
        debug!(
            "[ContactSync] Loaded {} contacts, {} pending deletions from local store",
            snapshot.contacts.len(),
            snapshot.tombstones.len()
        );
        Ok(snapshot)
    }

    /// Writes contacts, tombstones and the sync timestamp in one atomic batch.
    pub async fn save_snapshot(&self, snapshot: &LocalSnapshot) -> Result<()> {
        let mut entries = vec![
            (
                CONTACTS_KEY.to_string(),
                serde_json::to_string(&snapshot.contacts)?,
            ),
            (
                TOMBSTONES_KEY.to_string(),
                serde_json::to_string(&snapshot.tombstones)?,
            ),
        ];
        if let Some(last_sync_at) = snapshot.last_sync_at {
            entries.push((LAST_SYNC_AT_KEY.to_string(), last_sync_at.to_rfc3339()));
        }
        self.kv.set_many(entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryKeyValueStore;

    fn contact(id: &str, phone: &str) -> Contact {
        Contact {
            id: id.to_string(),
            name: "Test".to_string(),
            phone: phone.to_string(),
            relationship: "friend".to_string(),
            created_at: Utc::now(),
            synced: false,
        }
    }

    #[tokio::test]
    async fn empty_store_reads_as_empty_set() {
        let store = LocalContactStore::new(Arc::new(InMemoryKeyValueStore::new()));
        assert!(store.get().await.expect("get").is_empty());
        assert_eq!(store.load().await.expect("load"), LocalSnapshot::default());
    }

    #[tokio::test]
    async fn set_then_get_returns_same_contacts() {
        let store = LocalContactStore::new(Arc::new(InMemoryKeyValueStore::new()));
        let contacts = ContactSet::new(vec![contact("temp_1", "555-0001")]);
        store.set(&contacts).await.expect("set");
        assert_eq!(store.get().await.expect("get"), contacts);
    }

    #[tokio::test]
    async fn failed_write_keeps_previous_value() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let store = LocalContactStore::new(kv.clone());
        let original = ContactSet::new(vec![contact("srv_1", "555-0001")]);
        store.set(&original).await.expect("set");

        kv.fail_writes(true);
        let replacement = ContactSet::new(vec![contact("srv_2", "555-0002")]);
        let err = store.set(&replacement).await.expect_err("write should fail");
        assert!(err.is_persistence());

        let err = store
            .save_snapshot(&LocalSnapshot {
                contacts: replacement,
                tombstones: Vec::new(),
                last_sync_at: Some(Utc::now()),
            })
            .await
            .expect_err("batch should fail");
        assert!(err.is_persistence());

        assert_eq!(store.get().await.expect("get"), original);
        assert_eq!(store.last_sync_at().await.expect("last sync"), None);
    }

    #[tokio::test]
    async fn snapshot_round_trips_all_keys() {
        let store = LocalContactStore::new(Arc::new(InMemoryKeyValueStore::new()));
        let synced_at = Utc::now();
        let snapshot = LocalSnapshot {
            contacts: ContactSet::new(vec![contact("srv_1", "555-0001")]),
            tombstones: vec![Tombstone {
                id: "srv_2".to_string(),
                phone: "555-0002".to_string(),
                removed_at: synced_at,
            }],
            last_sync_at: Some(synced_at),
        };
        store.save_snapshot(&snapshot).await.expect("save");
        assert_eq!(store.load().await.expect("load"), snapshot);
    }

    #[tokio::test]
    async fn corrupt_value_is_a_persistence_error() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        kv.set(CONTACTS_KEY, "not json".to_string())
            .await
            .expect("seed");
        let store = LocalContactStore::new(kv);
        let err = store.get().await.expect_err("decode should fail");
        assert!(err.is_persistence());
    }
}
