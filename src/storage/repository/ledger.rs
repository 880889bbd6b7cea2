// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Append-only double-entry ledger.
//!
//! ## Table Layout
//!
//! - `ledger`: entry_id → JSON [`LedgerEntry`]
//! - `ledger_by_tx`: `tx_id|entry_id` → entry_id
//! - `ledger_by_account`: `account|ts|entry_id` → entry_id
//! - `ledger_gaps`: tx_id → JSON [`LedgerGap`] (entries that failed to append)
//!
//! Entries are never updated or removed; there is no update method on
//! purpose.

use chrono::{DateTime, Utc};
use redb::{ReadableTable, TableDefinition, WriteTransaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::database::{
    all_json, get_json, put_json, scan_prefix, ts_key, Database, DbError, DbResult, IndexTable,
    JsonTable,
};

pub(crate) const LEDGER: JsonTable = TableDefinition::new("ledger");
pub(crate) const LEDGER_BY_TX: IndexTable = TableDefinition::new("ledger_by_tx");
pub(crate) const LEDGER_BY_ACCOUNT: IndexTable = TableDefinition::new("ledger_by_account");
pub(crate) const LEDGER_GAPS: JsonTable = TableDefinition::new("ledger_gaps");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Debit,
    Credit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LedgerEntry {
    pub id: String,
    /// Wallet address, wallet id or an internal account such as `exchange:ETH/SOL`
    pub account_id: String,
    pub transaction_id: Option<String>,
    pub entry_type: EntryType,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    #[schema(value_type = Option<String>)]
    pub balance_after: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        account_id: impl Into<String>,
        transaction_id: Option<String>,
        entry_type: EntryType,
        amount: Decimal,
        currency: impl Into<String>,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            transaction_id,
            entry_type,
            amount,
            currency: currency.into(),
            description: description.into(),
            balance_after: None,
            created_at,
        }
    }

    pub fn with_balance_after(mut self, balance: Decimal) -> Self {
        self.balance_after = Some(balance);
        self
    }
}

/// A transaction whose ledger rows could not be written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerGap {
    pub transaction_id: String,
    pub entries: Vec<LedgerEntry>,
    pub error: String,
    pub recorded_at: DateTime<Utc>,
}

fn account_key(entry: &LedgerEntry) -> String {
    format!(
        "{}|{}|{}",
        entry.account_id,
        ts_key(entry.created_at.timestamp_nanos_opt().unwrap_or_default()),
        entry.id
    )
}

pub struct LedgerRepository<'a> {
    db: &'a Database,
}

impl<'a> LedgerRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Append entries in a single write transaction.
    pub fn append(&self, entries: &[LedgerEntry]) -> DbResult<()> {
        self.db.write(|txn| Self::append_in(txn, entries))
    }

    pub(crate) fn append_in(txn: &WriteTransaction, entries: &[LedgerEntry]) -> DbResult<()> {
        let mut records = txn.open_table(LEDGER)?;
        let mut by_tx = txn.open_table(LEDGER_BY_TX)?;
        let mut by_account = txn.open_table(LEDGER_BY_ACCOUNT)?;
        for entry in entries {
            if entry.amount <= Decimal::ZERO {
                return Err(DbError::Conflict(format!(
                    "ledger entry {} has non-positive amount",
                    entry.id
                )));
            }
            if records.get(entry.id.as_str())?.is_some() {
                return Err(DbError::Conflict(format!("ledger entry {} exists", entry.id)));
            }
            put_json(&mut records, &entry.id, entry)?;
            if let Some(tx_id) = &entry.transaction_id {
                let key = format!("{tx_id}|{}", entry.id);
                by_tx.insert(key.as_str(), entry.id.as_str())?;
            }
            by_account.insert(account_key(entry).as_str(), entry.id.as_str())?;
        }
        Ok(())
    }

    pub fn by_transaction(&self, tx_id: &str) -> DbResult<Vec<LedgerEntry>> {
        self.db.read(|txn| {
            let ids = scan_prefix(&txn.open_table(LEDGER_BY_TX)?, tx_id)?;
            let records = txn.open_table(LEDGER)?;
            let mut out = Vec::with_capacity(ids.len());
            for (_, id) in ids {
                if let Some(entry) = get_json(&records, &id)? {
                    out.push(entry);
                }
            }
            Ok(out)
        })
    }

    /// Entries of one account, oldest first.
    pub fn by_account(&self, account_id: &str) -> DbResult<Vec<LedgerEntry>> {
        self.db.read(|txn| {
            let ids = scan_prefix(&txn.open_table(LEDGER_BY_ACCOUNT)?, account_id)?;
            let records = txn.open_table(LEDGER)?;
            let mut out = Vec::with_capacity(ids.len());
            for (_, id) in ids {
                if let Some(entry) = get_json(&records, &id)? {
                    out.push(entry);
                }
            }
            Ok(out)
        })
    }

    pub fn record_gap(&self, gap: &LedgerGap) -> DbResult<()> {
        self.db.write(|txn| {
            put_json(&mut txn.open_table(LEDGER_GAPS)?, &gap.transaction_id, gap)
        })
    }

    pub fn gaps(&self) -> DbResult<Vec<LedgerGap>> {
        self.db.read(|txn| all_json(&txn.open_table(LEDGER_GAPS)?))
    }

    /// Write the missing entries of a gap and clear it, atomically.
    ///
    /// Entries that already made it in are skipped.
    pub fn resolve_gap(&self, gap: &LedgerGap) -> DbResult<usize> {
        self.db.write(|txn| {
            let missing: Vec<LedgerEntry> = {
                let records = txn.open_table(LEDGER)?;
                let mut missing = Vec::new();
                for entry in &gap.entries {
                    if records.get(entry.id.as_str())?.is_none() {
                        missing.push(entry.clone());
                    }
                }
                missing
            };
            Self::append_in(txn, &missing)?;
            txn.open_table(LEDGER_GAPS)?
                .remove(gap.transaction_id.as_str())?;
            Ok(missing.len())
        })
    }
}

/// Sum of debits minus sum of credits per currency; balanced entries net to zero.
pub fn net_by_currency(entries: &[LedgerEntry]) -> std::collections::BTreeMap<String, Decimal> {
    let mut out = std::collections::BTreeMap::new();
    for entry in entries {
        let slot = out.entry(entry.currency.clone()).or_insert(Decimal::ZERO);
        match entry.entry_type {
            EntryType::Debit => *slot += entry.amount,
            EntryType::Credit => *slot -= entry.amount,
        }
    }
    out
}
