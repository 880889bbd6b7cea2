// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Exchange operations (swap quotes and their execution state).
//!
//! ## Table Layout
//!
//! - `exchange_ops`: op_id → JSON [`ExchangeOperation`]
//! - `exchange_ops_by_user`: `user_id|inverted_ts|op_id` → op_id
//! - `exchange_pending`: `expires_ts|op_id` → op_id, only while `pending`

use chrono::{DateTime, Utc};
use redb::{ReadableTable, TableDefinition, WriteTransaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::database::{
    get_json, inverted_ts_key, put_json, scan_prefix, ts_key, Database, DbError, DbResult,
    IndexTable, JsonTable,
};
use crate::storage::OwnedResource;

pub(crate) const EXCHANGE_OPS: JsonTable = TableDefinition::new("exchange_ops");
pub(crate) const EXCHANGE_OPS_BY_USER: IndexTable = TableDefinition::new("exchange_ops_by_user");
pub(crate) const EXCHANGE_PENDING: IndexTable = TableDefinition::new("exchange_pending");

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ExchangeStatus {
    pub fn can_transition_to(&self, next: ExchangeStatus) -> bool {
        use ExchangeStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Cancelled) | (Processing, Completed) | (Processing, Failed)
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ExchangeStatus::Pending | ExchangeStatus::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeStatus::Pending => "pending",
            ExchangeStatus::Processing => "processing",
            ExchangeStatus::Completed => "completed",
            ExchangeStatus::Failed => "failed",
            ExchangeStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOperation {
    pub id: String,
    pub user_id: String,
    pub from_wallet_id: String,
    pub to_wallet_id: String,
    pub base_symbol: String,
    pub quote_symbol: String,
    pub from_amount: Decimal,
    pub to_amount: Decimal,
    pub exchange_rate: Decimal,
    /// Percent, `0.5` means 0.5 %
    pub fee_percentage: Decimal,
    pub fee_amount: Decimal,
    pub status: ExchangeStatus,
    pub quote_expires_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub from_transaction_id: Option<String>,
    pub to_transaction_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OwnedResource for ExchangeOperation {
    fn owner_user_id(&self) -> &str {
        &self.user_id
    }
}

/// Per-user aggregate over all operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExchangeStats {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending: u64,
    pub cancelled: u64,
    /// Sum of `from_amount` over completed operations
    #[schema(value_type = String)]
    pub volume: Decimal,
}

fn nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or_default()
}

fn user_key(op: &ExchangeOperation) -> String {
    format!("{}|{}|{}", op.user_id, inverted_ts_key(nanos(op.created_at)), op.id)
}

fn pending_key(op: &ExchangeOperation) -> String {
    format!("{}|{}", ts_key(nanos(op.quote_expires_at)), op.id)
}

pub struct ExchangeRepository<'a> {
    db: &'a Database,
}

impl<'a> ExchangeRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn insert(&self, op: &ExchangeOperation) -> DbResult<()> {
        self.db.write(|txn| {
            let mut ops = txn.open_table(EXCHANGE_OPS)?;
            if ops.get(op.id.as_str())?.is_some() {
                return Err(DbError::Conflict(format!("exchange operation {} exists", op.id)));
            }
            put_json(&mut ops, &op.id, op)?;
            txn.open_table(EXCHANGE_OPS_BY_USER)?
                .insert(user_key(op).as_str(), op.id.as_str())?;
            if op.status == ExchangeStatus::Pending {
                txn.open_table(EXCHANGE_PENDING)?
                    .insert(pending_key(op).as_str(), op.id.as_str())?;
            }
            Ok(())
        })
    }

    pub fn get(&self, op_id: &str) -> DbResult<Option<ExchangeOperation>> {
        self.db.read(|txn| get_json(&txn.open_table(EXCHANGE_OPS)?, op_id))
    }

    pub(crate) fn load_in(txn: &WriteTransaction, op_id: &str) -> DbResult<Option<ExchangeOperation>> {
        get_json(&txn.open_table(EXCHANGE_OPS)?, op_id)
    }

    /// Persist a new state of an operation; drops it from the pending index
    /// once it leaves `pending`.
    pub(crate) fn update_in(txn: &WriteTransaction, op: &ExchangeOperation) -> DbResult<()> {
        let mut ops = txn.open_table(EXCHANGE_OPS)?;
        if ops.get(op.id.as_str())?.is_none() {
            return Err(DbError::NotFound(format!("Exchange operation {}", op.id)));
        }
        put_json(&mut ops, &op.id, op)?;
        if op.status != ExchangeStatus::Pending {
            txn.open_table(EXCHANGE_PENDING)?
                .remove(pending_key(op).as_str())?;
        }
        Ok(())
    }

    pub fn update(&self, op: &ExchangeOperation) -> DbResult<()> {
        self.db.write(|txn| Self::update_in(txn, op))
    }

    /// Newest-first page of a user's operations plus the total count.
    pub fn list_by_user(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
    ) -> DbResult<(Vec<ExchangeOperation>, usize)> {
        self.db.read(|txn| {
            let ids = scan_prefix(&txn.open_table(EXCHANGE_OPS_BY_USER)?, user_id)?;
            let ops = txn.open_table(EXCHANGE_OPS)?;
            let total = ids.len();
            let mut out = Vec::new();
            for (_, id) in ids.into_iter().skip(offset).take(limit) {
                if let Some(op) = get_json(&ops, &id)? {
                    out.push(op);
                }
            }
            Ok((out, total))
        })
    }

    /// Ids of pending operations whose quote expired at or before `now`,
    /// soonest-expired first.
    pub fn due_pending(&self, now: DateTime<Utc>) -> DbResult<Vec<String>> {
        self.db.read(|txn| {
            let index = txn.open_table(EXCHANGE_PENDING)?;
            // '~' sorts after every id character
            let end = format!("{}|~", ts_key(nanos(now)));
            let mut out = Vec::new();
            for entry in index.range(..end.as_str())? {
                let (_, id) = entry?;
                out.push(id.value().to_string());
            }
            Ok(out)
        })
    }

    /// Whether any pending or processing operation of `user_id` touches the wallet.
    pub fn wallet_has_active_ops(&self, user_id: &str, wallet_id: &str) -> DbResult<bool> {
        self.db.read(|txn| {
            let ids = scan_prefix(&txn.open_table(EXCHANGE_OPS_BY_USER)?, user_id)?;
            let ops = txn.open_table(EXCHANGE_OPS)?;
            for (_, id) in ids {
                let Some(op) = get_json::<ExchangeOperation, _>(&ops, &id)? else {
                    continue;
                };
                if op.status.is_active()
                    && (op.from_wallet_id == wallet_id || op.to_wallet_id == wallet_id)
                {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }

    pub fn stats(&self, user_id: &str) -> DbResult<ExchangeStats> {
        self.db.read(|txn| {
            let ids = scan_prefix(&txn.open_table(EXCHANGE_OPS_BY_USER)?, user_id)?;
            let ops = txn.open_table(EXCHANGE_OPS)?;
            let mut stats = ExchangeStats::default();
            for (_, id) in ids {
                let Some(op) = get_json::<ExchangeOperation, _>(&ops, &id)? else {
                    continue;
                };
                stats.total += 1;
                match op.status {
                    ExchangeStatus::Completed => {
                        stats.completed += 1;
                        stats.volume += op.from_amount;
                    }
                    ExchangeStatus::Failed => stats.failed += 1,
                    ExchangeStatus::Pending | ExchangeStatus::Processing => stats.pending += 1,
                    ExchangeStatus::Cancelled => stats.cancelled += 1,
                }
            }
            Ok(stats)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{core_db, sample_operation};
    use rust_decimal_macros::dec;

    #[test]
    fn pending_index_follows_status() {
        let (db, _dir) = core_db();
        let repo = ExchangeRepository::new(&db);
        let now = Utc::now();
        let mut op = sample_operation("op1", "u1", now);
        repo.insert(&op).unwrap();

        assert!(repo.due_pending(now).unwrap().is_empty());
        let later = op.quote_expires_at;
        assert_eq!(repo.due_pending(later).unwrap(), vec!["op1".to_string()]);

        op.status = ExchangeStatus::Cancelled;
        repo.update(&op).unwrap();
        assert!(repo.due_pending(later).unwrap().is_empty());
    }

    #[test]
    fn stats_and_active_wallet_lookup() {
        let (db, _dir) = core_db();
        let repo = ExchangeRepository::new(&db);
        let now = Utc::now();
        let mut done = sample_operation("op1", "u1", now);
        done.status = ExchangeStatus::Completed;
        repo.insert(&done).unwrap();
        repo.insert(&sample_operation("op2", "u1", now)).unwrap();
        let mut failed = sample_operation("op3", "u1", now);
        failed.status = ExchangeStatus::Failed;
        repo.insert(&failed).unwrap();

        let stats = repo.stats("u1").unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.volume, dec!(1.0));

        assert!(repo.wallet_has_active_ops("u1", &done.from_wallet_id).unwrap());
        assert!(!repo.wallet_has_active_ops("u1", "unrelated").unwrap());
        assert_eq!(repo.stats("u2").unwrap(), ExchangeStats::default());
    }

    #[test]
    fn list_by_user_pages_newest_first() {
        let (db, _dir) = core_db();
        let repo = ExchangeRepository::new(&db);
        let now = Utc::now();
        for i in 0..3 {
            let op = sample_operation(&format!("op{i}"), "u1", now + chrono::Duration::seconds(i));
            repo.insert(&op).unwrap();
        }
        let (page, total) = repo.list_by_user("u1", 0, 2).unwrap();
        assert_eq!(total, 3);
        assert_eq!(page[0].id, "op2");
        assert_eq!(page[1].id, "op1");
    }

    #[test]
    fn transitions() {
        assert!(ExchangeStatus::Pending.can_transition_to(ExchangeStatus::Processing));
        assert!(ExchangeStatus::Processing.can_transition_to(ExchangeStatus::Failed));
        assert!(!ExchangeStatus::Processing.can_transition_to(ExchangeStatus::Cancelled));
        assert!(!ExchangeStatus::Completed.can_transition_to(ExchangeStatus::Failed));
    }
}
