//! The redb-backed store and its table helpers.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableHandle, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use riskline_traits::DataSources;

use crate::error::StorageResult;
use crate::keys::{Table, ALL_TABLES};

/// Redb-based store implementing every repository and the persistence gateway.
///
/// redb serializes write transactions, so a [`WriteBatch`] committed through
/// the gateway is applied in a single transaction and never interleaves with
/// another writer.
///
/// [`WriteBatch`]: riskline_traits::storage::WriteBatch
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Opens or creates a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref();
        let db = Database::create(path)?;
        let store = Self { db: Arc::new(db) };
        store.initialize_tables()?;
        info!(path = %path.display(), "Opened redb store");
        Ok(store)
    }

    /// Every engine collaborator backed by this store.
    pub fn data_sources(self: &Arc<Self>) -> DataSources {
        DataSources {
            portfolios: self.clone(),
            positions: self.clone(),
            market_data: self.clone(),
            factors: self.clone(),
            gateway: self.clone(),
        }
    }

    /// Row count per table, keyed by table name.
    pub fn table_counts(&self) -> StorageResult<BTreeMap<String, u64>> {
        let txn = self.db.begin_read()?;
        let mut counts = BTreeMap::new();
        for table in ALL_TABLES {
            let len = txn.open_table(table)?.len()?;
            counts.insert(table.name().to_string(), len);
        }
        Ok(counts)
    }

    fn initialize_tables(&self) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        for table in ALL_TABLES {
            let _ = write_txn.open_table(table)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub(crate) fn ping(&self) -> StorageResult<()> {
        let _ = self.db.begin_read()?;
        Ok(())
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub(crate) fn fetch<T: DeserializeOwned>(&self, table: Table, key: &str) -> StorageResult<Option<T>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table)?;
        match table.get(key)? {
            Some(data) => Ok(Some(serde_json::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Values with keys in `[lower, upper]`, in key order.
    pub(crate) fn scan<T: DeserializeOwned>(
        &self,
        table: Table,
        lower: &str,
        upper: &str,
    ) -> StorageResult<Vec<T>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table)?;
        let mut rows = Vec::new();
        for entry in table.range::<&str>(lower..=upper)? {
            let (_, value) = entry?;
            rows.push(serde_json::from_slice(value.value())?);
        }
        Ok(rows)
    }

    /// Value with the greatest key in `[lower, upper]`.
    pub(crate) fn last_in<T: DeserializeOwned>(
        &self,
        table: Table,
        lower: &str,
        upper: &str,
    ) -> StorageResult<Option<T>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table)?;
        let last = table.range::<&str>(lower..=upper)?.next_back();
        match last {
            Some(entry) => {
                let (_, value) = entry?;
                Ok(Some(serde_json::from_slice(value.value())?))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn scan_all<T: DeserializeOwned>(&self, table: Table) -> StorageResult<Vec<T>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table)?;
        let mut rows = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            rows.push(serde_json::from_slice(value.value())?);
        }
        Ok(rows)
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Run `f` in one write transaction, committing only if it succeeds.
    pub(crate) fn write<R>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> StorageResult<R>,
    ) -> StorageResult<R> {
        let write_txn = self.db.begin_write()?;
        match f(&write_txn) {
            Ok(value) => {
                write_txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                write_txn.abort()?;
                Err(e)
            }
        }
    }
}

pub(crate) fn put<T: Serialize>(
    txn: &WriteTransaction,
    table: Table,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let bytes = serde_json::to_vec(value)?;
    let mut table = txn.open_table(table)?;
    table.insert(key, bytes.as_slice())?;
    Ok(())
}

pub(crate) fn get_in<T: DeserializeOwned>(
    txn: &WriteTransaction,
    table: Table,
    key: &str,
) -> StorageResult<Option<T>> {
    let table = txn.open_table(table)?;
    let value = match table.get(key)? {
        Some(data) => Some(serde_json::from_slice(data.value())?),
        None => None,
    };
    Ok(value)
}

/// Delete every key in `[lower, upper]`, returning how many were removed.
pub(crate) fn remove_range(
    txn: &WriteTransaction,
    table: Table,
    lower: &str,
    upper: &str,
) -> StorageResult<usize> {
    let mut table = txn.open_table(table)?;
    let keys = table
        .range::<&str>(lower..=upper)?
        .map(|entry| entry.map(|(key, _)| key.value().to_string()))
        .collect::<Result<Vec<String>, redb::StorageError>>()?;
    for key in &keys {
        table.remove(key.as_str())?;
    }
    Ok(keys.len())
}
