// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction records.
//!
//! ## Table Layout
//!
//! - `transactions`: tx_id → JSON [`TransactionRecord`]
//! - `tx_by_hash`: chain hash → tx_id
//! - `tx_by_wallet`: `wallet_id|inverted_ts|tx_id` → tx_id (newest first)
//! - `tx_open`: `CHAIN|ts|tx_id` → tx_id for pending/confirming records
//!   (oldest first, drained by the transaction monitor)

use chrono::{DateTime, Utc};
use redb::{ReadableTable, TableDefinition, WriteTransaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::Chain;
use crate::storage::database::{
    get_json, inverted_ts_key, put_json, ts_key, Database, DbError, DbResult, IndexTable, JsonTable,
};
use crate::storage::OwnedResource;

pub(crate) const TRANSACTIONS: JsonTable = TableDefinition::new("transactions");
pub(crate) const TX_BY_HASH: IndexTable = TableDefinition::new("tx_by_hash");
pub(crate) const TX_BY_WALLET: IndexTable = TableDefinition::new("tx_by_wallet");
pub(crate) const TX_OPEN: IndexTable = TableDefinition::new("tx_open");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Send,
    Receive,
    SwapIn,
    SwapOut,
}

/// Transaction status.
///
/// Moves forward only: pending → confirming → confirmed | failed, plus
/// pending → cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    #[default]
    Pending,
    /// Broadcast and waiting for enough confirmations
    Confirming,
    Confirmed,
    Failed,
    Cancelled,
}

impl TxStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, TxStatus::Pending | TxStatus::Confirming)
    }

    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        use TxStatus::*;
        matches!(
            (self, next),
            (Pending, Confirming)
                | (Pending, Confirmed)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Confirming, Confirmed)
                | (Confirming, Failed)
        )
    }
}

/// Stored transaction record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub wallet_id: String,
    pub user_id: String,
    pub chain: Chain,
    pub tx_type: TxType,
    pub status: TxStatus,
    /// Chain hash, set after broadcast (internal swaps use `swap:<op>:<leg>`)
    pub hash: Option<String>,
    pub from_address: String,
    pub to_address: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub memo: Option<String>,
    pub confirmations: u64,
    pub block_number: Option<u64>,
    pub error_message: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl OwnedResource for TransactionRecord {
    fn owner_user_id(&self) -> &str {
        &self.user_id
    }
}

/// Listing filter; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TxFilter {
    pub tx_type: Option<TxType>,
    pub status: Option<TxStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TxFilter {
    pub fn is_empty(&self) -> bool {
        self.tx_type.is_none() && self.status.is_none() && self.from.is_none() && self.to.is_none()
    }

    fn matches(&self, tx: &TransactionRecord) -> bool {
        self.tx_type.is_none_or(|t| t == tx.tx_type)
            && self.status.is_none_or(|s| s == tx.status)
            && self.from.is_none_or(|from| tx.created_at >= from)
            && self.to.is_none_or(|to| tx.created_at <= to)
    }
}

fn nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or_default()
}

fn wallet_key(tx: &TransactionRecord) -> String {
    format!("{}|{}|{}", tx.wallet_id, inverted_ts_key(nanos(tx.created_at)), tx.id)
}

fn open_key(tx: &TransactionRecord) -> String {
    format!("{}|{}|{}", tx.chain, ts_key(nanos(tx.created_at)), tx.id)
}

fn encode_cursor(key: &str) -> String {
    alloy::hex::encode(key.as_bytes())
}

fn decode_cursor(cursor: &str) -> Option<String> {
    alloy::hex::decode(cursor)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

pub struct TransactionRepository<'a> {
    db: &'a Database,
}

impl<'a> TransactionRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn insert(&self, tx: &TransactionRecord) -> DbResult<()> {
        self.db.write(|txn| Self::insert_in(txn, tx))
    }

    /// Insert the record and all of its index entries.
    pub(crate) fn insert_in(txn: &WriteTransaction, tx: &TransactionRecord) -> DbResult<()> {
        let mut records = txn.open_table(TRANSACTIONS)?;
        if records.get(tx.id.as_str())?.is_some() {
            return Err(DbError::Conflict(format!("Transaction {} already exists", tx.id)));
        }
        put_json(&mut records, &tx.id, tx)?;

        if let Some(hash) = &tx.hash {
            txn.open_table(TX_BY_HASH)?.insert(hash.as_str(), tx.id.as_str())?;
        }
        txn.open_table(TX_BY_WALLET)?
            .insert(wallet_key(tx).as_str(), tx.id.as_str())?;
        if tx.status.is_open() {
            txn.open_table(TX_OPEN)?.insert(open_key(tx).as_str(), tx.id.as_str())?;
        }
        Ok(())
    }

    pub fn get(&self, tx_id: &str) -> DbResult<Option<TransactionRecord>> {
        self.db.read(|txn| get_json(&txn.open_table(TRANSACTIONS)?, tx_id))
    }

    pub fn get_by_hash(&self, hash: &str) -> DbResult<Option<TransactionRecord>> {
        self.db.read(|txn| {
            let Some(id) = txn
                .open_table(TX_BY_HASH)?
                .get(hash)?
                .map(|v| v.value().to_string())
            else {
                return Ok(None);
            };
            get_json(&txn.open_table(TRANSACTIONS)?, &id)
        })
    }

    /// Paginated, newest-first listing of a wallet's transactions.
    ///
    /// Returns `(transactions, next_cursor)`.
    pub fn list_by_wallet(
        &self,
        wallet_id: &str,
        filter: &TxFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> DbResult<(Vec<TransactionRecord>, Option<String>)> {
        let limit = limit.max(1);
        self.db.read(|txn| {
            let index = txn.open_table(TX_BY_WALLET)?;
            let records = txn.open_table(TRANSACTIONS)?;

            let prefix = format!("{wallet_id}|");
            let end = format!("{wallet_id}}}");
            let after = cursor.and_then(decode_cursor).filter(|k| k.starts_with(&prefix));
            let start = after.clone().unwrap_or_else(|| prefix.clone());

            let mut out = Vec::with_capacity(limit);
            let mut last_key = None;
            let mut more = false;
            for entry in index.range(start.as_str()..end.as_str())? {
                let (key, id) = entry?;
                let key = key.value().to_string();
                if after.as_deref() == Some(key.as_str()) {
                    continue;
                }
                let Some(tx) = get_json::<TransactionRecord, _>(&records, id.value())? else {
                    continue;
                };
                if !filter.matches(&tx) {
                    continue;
                }
                if out.len() == limit {
                    more = true;
                    break;
                }
                out.push(tx);
                last_key = Some(key);
            }

            let next = if more { last_key.map(|k| encode_cursor(&k)) } else { None };
            Ok((out, next))
        })
    }

    /// A wallet's transactions created at or after `since`, newest first.
    pub fn since(&self, wallet_id: &str, since: DateTime<Utc>) -> DbResult<Vec<TransactionRecord>> {
        self.db.read(|txn| {
            let index = txn.open_table(TX_BY_WALLET)?;
            let records = txn.open_table(TRANSACTIONS)?;
            let start = format!("{wallet_id}|");
            let end = format!("{wallet_id}}}");
            let mut out = Vec::new();
            for entry in index.range(start.as_str()..end.as_str())? {
                let (_, id) = entry?;
                let Some(tx) = get_json::<TransactionRecord, _>(&records, id.value())? else {
                    continue;
                };
                if tx.created_at < since {
                    break;
                }
                out.push(tx);
            }
            Ok(out)
        })
    }

    /// Oldest-first open transactions of a chain.
    pub fn list_open(&self, chain: Chain, limit: usize) -> DbResult<Vec<TransactionRecord>> {
        self.db.read(|txn| {
            let index = txn.open_table(TX_OPEN)?;
            let records = txn.open_table(TRANSACTIONS)?;
            let start = format!("{chain}|");
            let end = format!("{chain}}}");
            let mut out = Vec::new();
            for entry in index.range(start.as_str()..end.as_str())? {
                let (_, id) = entry?;
                if let Some(tx) = get_json(&records, id.value())? {
                    out.push(tx);
                }
                if out.len() >= limit {
                    break;
                }
            }
            Ok(out)
        })
    }

    /// Replace a record, keeping the hash and open indexes in step.
    pub fn update(&self, tx: &TransactionRecord) -> DbResult<()> {
        self.db.write(|txn| {
            let mut records = txn.open_table(TRANSACTIONS)?;
            let previous: TransactionRecord = get_json(&records, &tx.id)?
                .ok_or_else(|| DbError::NotFound(format!("Transaction {}", tx.id)))?;
            put_json(&mut records, &tx.id, tx)?;

            if previous.hash != tx.hash {
                if let Some(hash) = &tx.hash {
                    txn.open_table(TX_BY_HASH)?.insert(hash.as_str(), tx.id.as_str())?;
                }
            }
            let mut open = txn.open_table(TX_OPEN)?;
            let key = open_key(tx);
            if tx.status.is_open() {
                open.insert(key.as_str(), tx.id.as_str())?;
            } else {
                open.remove(key.as_str())?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{core_db, sample_tx};

    #[test]
    fn insert_and_lookup_by_hash() {
        let (db, _dir) = core_db();
        let repo = TransactionRepository::new(&db);
        let tx = sample_tx("t1", "w1", Chain::Eth, Some("0xaaa"));
        repo.insert(&tx).unwrap();

        assert_eq!(repo.get("t1").unwrap().unwrap(), tx);
        assert_eq!(repo.get_by_hash("0xaaa").unwrap().unwrap().id, "t1");
        assert!(matches!(repo.insert(&tx).unwrap_err(), DbError::Conflict(_)));
    }

    #[test]
    fn list_by_wallet_with_pagination() {
        let (db, _dir) = core_db();
        let repo = TransactionRepository::new(&db);
        let base = Utc::now();
        for i in 0..5 {
            let mut tx = sample_tx(&format!("t{i}"), "w1", Chain::Eth, None);
            tx.created_at = base + chrono::Duration::seconds(i);
            repo.insert(&tx).unwrap();
        }
        repo.insert(&sample_tx("other", "w2", Chain::Eth, None)).unwrap();

        let filter = TxFilter::default();
        let (page1, cursor) = repo.list_by_wallet("w1", &filter, None, 2).unwrap();
        assert_eq!(
            page1.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            vec!["t4", "t3"]
        );
        let (page2, cursor2) = repo.list_by_wallet("w1", &filter, cursor.as_deref(), 2).unwrap();
        assert_eq!(page2.len(), 2);
        let (page3, cursor3) = repo.list_by_wallet("w1", &filter, cursor2.as_deref(), 2).unwrap();
        assert_eq!(page3.len(), 1);
        assert_eq!(page3[0].id, "t0");
        assert!(cursor3.is_none());
    }

    #[test]
    fn filter_by_type_and_status() {
        let (db, _dir) = core_db();
        let repo = TransactionRepository::new(&db);
        let mut swap = sample_tx("swap", "w1", Chain::Eth, None);
        swap.tx_type = TxType::SwapIn;
        swap.status = TxStatus::Confirmed;
        repo.insert(&swap).unwrap();
        repo.insert(&sample_tx("send", "w1", Chain::Eth, Some("0x1"))).unwrap();

        let filter = TxFilter {
            tx_type: Some(TxType::SwapIn),
            ..Default::default()
        };
        let (rows, _) = repo.list_by_wallet("w1", &filter, None, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "swap");
    }

    #[test]
    fn open_index_tracks_status() {
        let (db, _dir) = core_db();
        let repo = TransactionRepository::new(&db);
        let mut tx = sample_tx("t1", "w1", Chain::Sol, Some("sig"));
        repo.insert(&tx).unwrap();
        assert_eq!(repo.list_open(Chain::Sol, 10).unwrap().len(), 1);
        assert!(repo.list_open(Chain::Eth, 10).unwrap().is_empty());

        tx.status = TxStatus::Confirmed;
        repo.update(&tx).unwrap();
        assert!(repo.list_open(Chain::Sol, 10).unwrap().is_empty());
    }

    #[test]
    fn status_transitions_move_forward() {
        assert!(TxStatus::Pending.can_transition_to(TxStatus::Cancelled));
        assert!(TxStatus::Confirming.can_transition_to(TxStatus::Confirmed));
        assert!(!TxStatus::Confirming.can_transition_to(TxStatus::Cancelled));
        assert!(!TxStatus::Confirmed.can_transition_to(TxStatus::Failed));
    }
}
