//! In-memory fakes of the storage and remote traits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::contacts::{ContactRecord, KeyValueStoreTrait, RemoteContactServiceTrait};
use crate::errors::{DatabaseError, Error, RemoteError, Result};
use crate::secrets::SecretStore;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Key-value store backed by a `HashMap`, with switchable write failures.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `set`/`set_many` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Database(DatabaseError::QueryFailed(
                "storage quota exceeded".to_string(),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStoreTrait for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.check_writable()?;
        lock(&self.entries).insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_many(&self, entries: Vec<(String, String)>) -> Result<()> {
        self.check_writable()?;
        lock(&self.entries).extend(entries);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// Scriptable stand-in for the remote contact service.
#[derive(Debug, Default)]
pub struct FakeRemoteContactService {
    record: Mutex<ContactRecord>,
    pushed: Mutex<Vec<ContactRecord>>,
    offline: AtomicBool,
    reject_push_status: Mutex<Option<u16>>,
    fetch_delay: Mutex<Option<Duration>>,
    push_delay: Mutex<Option<Duration>>,
    fetches: AtomicUsize,
}

impl FakeRemoteContactService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: ContactRecord) -> Self {
        let fake = Self::default();
        *lock(&fake.record) = record;
        fake
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes every POST fail with the given HTTP status until cleared.
    pub fn reject_pushes_with(&self, status: Option<u16>) {
        *lock(&self.reject_push_status) = status;
    }

    /// Suspends each fetch, simulating a slow network.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *lock(&self.fetch_delay) = delay;
    }

    /// Suspends each push before it reaches the server.
    pub fn set_push_delay(&self, delay: Option<Duration>) {
        *lock(&self.push_delay) = delay;
    }

    pub fn record(&self) -> ContactRecord {
        lock(&self.record).clone()
    }

    pub fn set_record(&self, record: ContactRecord) {
        *lock(&self.record) = record;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn pushed(&self) -> Vec<ContactRecord> {
        lock(&self.pushed).clone()
    }
}

#[async_trait]
impl RemoteContactServiceTrait for FakeRemoteContactService {
    async fn fetch_record(&self) -> Result<ContactRecord> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.fetch_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::transport("network unreachable").into());
        }
        Ok(self.record())
    }

    async fn replace_record(&self, record: &ContactRecord) -> Result<()> {
        let delay = *lock(&self.push_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::transport("network unreachable").into());
        }
        let rejected = *lock(&self.reject_push_status);
        if let Some(status) = rejected {
            return Err(RemoteError::api(status, "push rejected").into());
        }
        lock(&self.pushed).push(record.clone());
        self.set_record(record.clone());
        Ok(())
    }
}

/// Secret store kept in memory.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(key: &str, value: &str) -> Self {
        let store = Self::default();
        lock(&store.secrets).insert(key.to_string(), value.to_string());
        store
    }
}

impl SecretStore for InMemorySecretStore {
    fn get_secret(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.secrets).get(key).cloned())
    }

    fn set_secret(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.secrets).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_secret(&self, key: &str) -> Result<()> {
        lock(&self.secrets).remove(key);
        Ok(())
    }
}
