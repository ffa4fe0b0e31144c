//! Durable named-record store.
//!
//! A thin key-value layer over redb: every stateful component owns a handful
//! of named records (session list, timeout list, settings, participation
//! log) and re-saves its record wholesale after each mutation. Values are
//! JSON so records stay inspectable and tolerate schema drift.

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable record keeper. Load-or-default on start, explicit [`Store::put`]
/// on mutation. Shared between owners; each record has exactly one writer.
pub struct Store {
    db: Database,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(|e| StoreError::Database(e.to_string()))?;
        // Make sure the table exists so first reads don't fail on a fresh file.
        let txn = db
            .begin_write()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        txn.open_table(RECORDS)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        txn.commit()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(Self { db })
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let table = txn
            .open_table(RECORDS)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let Some(guard) = table
            .get(key)
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };
        let value = serde_json::from_slice(guard.value())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Some(value))
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        {
            let mut table = txn
                .open_table(RECORDS)
                .map_err(|e| StoreError::Database(e.to_string()))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        txn.commit()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    /// Load a record, falling back to the default when it is missing or no
    /// longer deserializes. A broken record is reported and abandoned rather
    /// than taking the process down.
    pub fn load_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.get(key) {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(e) => {
                warn!(key = %key, error = %e, "record unreadable, reinitialising");
                T::default()
            }
        }
    }
}
