// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded database handle backed by redb (pure Rust, ACID).
//!
//! Records are JSON bytes in `&str → &[u8]` tables; secondary indexes are
//! `&str → &str` tables whose composite keys are `|`-separated so that a
//! prefix scan over `"<prefix>|"` returns one owner's rows in key order.
//!
//! redb serialises write transactions, so every multi-row mutation done
//! inside [`Database::write`] is atomic and linearisable with respect to
//! other writers.

use std::path::Path;

use redb::{ReadTransaction, ReadableDatabase, ReadableTable, Table, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Primary record table: id → JSON bytes.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Secondary index table: composite key → referenced id.
pub type IndexTable = TableDefinition<'static, &'static str, &'static str>;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// One redb file.
pub struct Database {
    db: redb::Database,
    name: &'static str,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("name", &self.name).finish()
    }
}

impl Database {
    /// Open (or create) the database and pre-create its tables so later
    /// read transactions never fail on a missing table.
    pub fn open(
        path: &Path,
        name: &'static str,
        records: &[JsonTable],
        indexes: &[IndexTable],
    ) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = redb::Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            for table in records {
                let _ = write_txn.open_table(*table)?;
            }
            for table in indexes {
                let _ = write_txn.open_table(*table)?;
            }
        }
        write_txn.commit()?;

        tracing::debug!(database = name, path = %path.display(), "Opened database");
        Ok(Self { db, name })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run `f` in a read transaction.
    pub fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<DbError>,
        F: FnOnce(&ReadTransaction) -> Result<T, E>,
    {
        let txn = self.db.begin_read().map_err(DbError::from)?;
        f(&txn)
    }

    /// Run `f` in a write transaction, committing on `Ok` and aborting on `Err`.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<DbError>,
        F: FnOnce(&WriteTransaction) -> Result<T, E>,
    {
        let txn = self.db.begin_write().map_err(DbError::from)?;
        match f(&txn) {
            Ok(value) => {
                txn.commit().map_err(DbError::from)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort) = txn.abort() {
                    tracing::warn!(database = self.name, error = %abort, "Failed to abort write transaction");
                }
                Err(err)
            }
        }
    }

    /// Cheap reachability probe used by readiness checks.
    pub fn ping(&self) -> DbResult<()> {
        let _ = self.db.begin_read()?;
        Ok(())
    }
}

// =============================================================================
// Record helpers
// =============================================================================

pub fn get_json<T, R>(table: &R, key: &str) -> DbResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

pub fn put_json<T: Serialize>(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    key: &str,
    value: &T,
) -> DbResult<()> {
    let json = serde_json::to_vec(value)?;
    table.insert(key, json.as_slice())?;
    Ok(())
}

/// `(key, value)` pairs of an index whose keys start with `prefix|`, in key
/// order.
pub fn scan_prefix<R>(table: &R, prefix: &str) -> DbResult<Vec<(String, String)>>
where
    R: ReadableTable<&'static str, &'static str>,
{
    // '}' sorts right after '|'
    let start = format!("{prefix}|");
    let end = format!("{prefix}}}");
    let mut out = Vec::new();
    for entry in table.range(start.as_str()..end.as_str())? {
        let (key, value) = entry?;
        out.push((key.value().to_string(), value.value().to_string()));
    }
    Ok(out)
}

/// Every record of a table. Used for catalogue tables that stay small.
pub fn all_json<T, R>(table: &R) -> DbResult<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut out = Vec::new();
    for entry in table.iter()? {
        let (_, value) = entry?;
        out.push(serde_json::from_slice(value.value())?);
    }
    Ok(out)
}

/// Zero-padded big-endian-ordered rendering of a timestamp in nanoseconds.
pub fn ts_key(nanos: i64) -> String {
    format!("{:020}", nanos.max(0))
}

/// Inverted timestamp so newer entries sort first in a forward scan.
pub fn inverted_ts_key(nanos: i64) -> String {
    format!("{:020}", i64::MAX - nanos.max(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEMS: JsonTable = TableDefinition::new("items");
    const ITEMS_BY_OWNER: IndexTable = TableDefinition::new("items_by_owner");

    fn temp_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.redb"), "test", &[ITEMS], &[ITEMS_BY_OWNER])
            .unwrap();
        (db, dir)
    }

    #[test]
    fn write_commits_and_read_sees_it() {
        let (db, _dir) = temp_db();
        db.write(|txn| {
            let mut table = txn.open_table(ITEMS)?;
            put_json(&mut table, "a", &serde_json::json!({"n": 1}))?;
            Ok::<_, DbError>(())
        })
        .unwrap();

        let value: Option<serde_json::Value> = db
            .read(|txn| {
                let table = txn.open_table(ITEMS)?;
                get_json(&table, "a")
            })
            .unwrap();
        assert_eq!(value.unwrap()["n"], 1);
    }

    #[test]
    fn failed_write_is_rolled_back() {
        let (db, _dir) = temp_db();
        let result: DbResult<()> = db.write(|txn| {
            let mut table = txn.open_table(ITEMS)?;
            put_json(&mut table, "a", &1)?;
            Err(DbError::Conflict("boom".into()))
        });
        assert!(result.is_err());

        let value: Option<i32> = db
            .read(|txn| get_json(&txn.open_table(ITEMS)?, "a"))
            .unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn prefix_scan_stays_within_owner() {
        let (db, _dir) = temp_db();
        db.write(|txn| {
            let mut index = txn.open_table(ITEMS_BY_OWNER)?;
            index.insert("alice|1", "1")?;
            index.insert("alice|2", "2")?;
            index.insert("alice2|3", "3")?;
            index.insert("bob|4", "4")?;
            Ok::<_, DbError>(())
        })
        .unwrap();

        let rows = db
            .read(|txn| scan_prefix(&txn.open_table(ITEMS_BY_OWNER)?, "alice"))
            .unwrap();
        let ids: Vec<_> = rows.into_iter().map(|(_, v)| v).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn inverted_keys_sort_newest_first() {
        assert!(inverted_ts_key(2_000) < inverted_ts_key(1_000));
        assert!(ts_key(1_000) < ts_key(2_000));
    }
}
