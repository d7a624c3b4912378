use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;
use log::debug;

use safecircle_core::contacts::KeyValueStoreTrait;
use safecircle_core::Result;

use super::model::KeyValueEntryDB;
use crate::db::{get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::kv_store;

pub struct KeyValueRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl KeyValueRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }

    pub fn get_value(&self, key_value: &str) -> Result<Option<String>> {
        let mut conn = get_connection(&self.pool)?;
        let value = kv_store::table
            .find(key_value)
            .select(kv_store::value)
            .first::<String>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(value)
    }

    /// Keys starting with `prefix`, in key order.
    pub fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = get_connection(&self.pool)?;
        let keys = kv_store::table
            .select(kv_store::key)
            .order(kv_store::key.asc())
            .load::<String>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(keys.into_iter().filter(|k| k.starts_with(prefix)).collect())
    }

    /// Upserts every entry in one transaction.
    pub async fn upsert_entries(&self, entries: Vec<(String, String)>) -> Result<()> {
        let count = entries.len();
        self.writer
            .exec(move |conn| {
                let now = Utc::now().to_rfc3339();
                for (key_value, value) in entries {
                    let row = KeyValueEntryDB {
                        key: key_value,
                        value: value.clone(),
                        updated_at: now.clone(),
                    };
                    diesel::insert_into(kv_store::table)
                        .values(&row)
                        .on_conflict(kv_store::key)
                        .do_update()
                        .set((
                            kv_store::value.eq(value),
                            kv_store::updated_at.eq(now.clone()),
                        ))
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                Ok(())
            })
            .await?;
        debug!("[Storage] Wrote {} key-value entries", count);
        Ok(())
    }

    pub async fn delete_key(&self, key_value: String) -> Result<usize> {
        self.writer
            .exec(move |conn| {
                let affected = diesel::delete(kv_store::table.find(key_value))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(affected)
            })
            .await
    }
}

#[async_trait]
impl KeyValueStoreTrait for KeyValueRepository {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.get_value(key)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.upsert_entries(vec![(key.to_string(), value)]).await
    }

    async fn set_many(&self, entries: Vec<(String, String)>) -> Result<()> {
        self.upsert_entries(entries).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.delete_key(key.to_string()).await.map(|_| ())
    }
}
