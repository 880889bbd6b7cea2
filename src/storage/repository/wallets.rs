// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet repository.
//!
//! ## Table Layout
//!
//! - `wallets`: wallet_id → JSON [`Wallet`]
//! - `wallets_by_user`: `user_id|created_ts|wallet_id` → wallet_id
//! - `wallet_by_address`: `CHAIN|address` → wallet_id (global uniqueness)
//!
//! ## Security
//!
//! - Only the encrypted private key is stored
//! - The encrypted key is never returned via API (see [`WalletResponse`])

use chrono::{DateTime, Utc};
use redb::{ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::Chain;
use crate::storage::database::{
    get_json, put_json, scan_prefix, ts_key, Database, DbError, DbResult, IndexTable, JsonTable,
};
use crate::storage::OwnedResource;

pub(crate) const WALLETS: JsonTable = TableDefinition::new("wallets");
pub(crate) const WALLETS_BY_USER: IndexTable = TableDefinition::new("wallets_by_user");
pub(crate) const WALLET_BY_ADDRESS: IndexTable = TableDefinition::new("wallet_by_address");

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    /// Wallet can send and swap
    #[default]
    Active,
    /// Read-only; never hard-deleted
    Archived,
}

/// Stored wallet aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: String,
    pub user_id: String,
    pub chain: Chain,
    pub address: String,
    pub public_key: String,
    /// Private key sealed with the address as associated data
    pub encrypted_private_key: String,
    pub derivation_path: String,
    pub label: String,
    pub balance: Decimal,
    pub balance_updated_at: Option<DateTime<Utc>>,
    pub status: WalletStatus,
    /// Bumped on every update; guards read-modify-write cycles.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Response returned to API clients (never includes the key).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WalletResponse {
    pub id: String,
    pub chain: Chain,
    pub address: String,
    pub public_key: String,
    pub derivation_path: String,
    pub label: String,
    #[schema(value_type = String)]
    pub balance: Decimal,
    pub balance_updated_at: Option<DateTime<Utc>>,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Wallet> for WalletResponse {
    fn from(w: Wallet) -> Self {
        Self {
            id: w.id,
            chain: w.chain,
            address: w.address,
            public_key: w.public_key,
            derivation_path: w.derivation_path,
            label: w.label,
            balance: w.balance,
            balance_updated_at: w.balance_updated_at,
            status: w.status,
            created_at: w.created_at,
        }
    }
}

impl OwnedResource for Wallet {
    fn owner_user_id(&self) -> &str {
        &self.user_id
    }
}

fn address_key(chain: Chain, address: &str) -> String {
    // EVM addresses are case-insensitive; the others are case-sensitive
    match chain {
        Chain::Eth => format!("{chain}|{}", address.to_lowercase()),
        _ => format!("{chain}|{address}"),
    }
}

fn user_key(wallet: &Wallet) -> String {
    format!(
        "{}|{}|{}",
        wallet.user_id,
        ts_key(wallet.created_at.timestamp_nanos_opt().unwrap_or_default()),
        wallet.id
    )
}

pub struct WalletRepository<'a> {
    db: &'a Database,
}

impl<'a> WalletRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a new wallet. `(chain, address)` must be globally unique.
    pub fn create(&self, wallet: &Wallet) -> DbResult<()> {
        self.db.write(|txn| {
            let mut by_address = txn.open_table(WALLET_BY_ADDRESS)?;
            let key = address_key(wallet.chain, &wallet.address);
            if by_address.get(key.as_str())?.is_some() {
                return Err(DbError::Conflict(format!(
                    "{} address {} already registered",
                    wallet.chain, wallet.address
                )));
            }
            by_address.insert(key.as_str(), wallet.id.as_str())?;
            txn.open_table(WALLETS_BY_USER)?
                .insert(user_key(wallet).as_str(), wallet.id.as_str())?;
            put_json(&mut txn.open_table(WALLETS)?, &wallet.id, wallet)
        })
    }

    pub fn get(&self, wallet_id: &str) -> DbResult<Option<Wallet>> {
        self.db.read(|txn| get_json(&txn.open_table(WALLETS)?, wallet_id))
    }

    pub fn find_by_address(&self, chain: Chain, address: &str) -> DbResult<Option<Wallet>> {
        self.db.read(|txn| {
            let by_address = txn.open_table(WALLET_BY_ADDRESS)?;
            let key = address_key(chain, address);
            let Some(id) = by_address.get(key.as_str())?.map(|v| v.value().to_string()) else {
                return Ok(None);
            };
            get_json(&txn.open_table(WALLETS)?, &id)
        })
    }

    /// All wallets of a user, oldest first.
    pub fn list_by_user(&self, user_id: &str) -> DbResult<Vec<Wallet>> {
        self.db.read(|txn| {
            let index = scan_prefix(&txn.open_table(WALLETS_BY_USER)?, user_id)?;
            let wallets = txn.open_table(WALLETS)?;
            let mut out = Vec::with_capacity(index.len());
            for (_, id) in index {
                if let Some(wallet) = get_json(&wallets, &id)? {
                    out.push(wallet);
                }
            }
            Ok(out)
        })
    }

    /// Every wallet, for admin views and reconciliation.
    pub fn list_all(&self) -> DbResult<Vec<Wallet>> {
        self.db
            .read(|txn| crate::storage::database::all_json(&txn.open_table(WALLETS)?))
    }

    /// Optimistic update: fails with `Conflict` when the stored version no
    /// longer matches `wallet.version`. Returns the stored copy.
    pub fn update(&self, wallet: &Wallet) -> DbResult<Wallet> {
        self.db.write(|txn| Self::update_in(txn, wallet))
    }

    pub(crate) fn load_in(txn: &WriteTransaction, wallet_id: &str) -> DbResult<Option<Wallet>> {
        get_json(&txn.open_table(WALLETS)?, wallet_id)
    }

    /// Versioned write inside an existing transaction.
    pub(crate) fn update_in(txn: &WriteTransaction, wallet: &Wallet) -> DbResult<Wallet> {
        let mut table = txn.open_table(WALLETS)?;
        let current: Wallet = get_json(&table, &wallet.id)?
            .ok_or_else(|| DbError::NotFound(format!("Wallet {}", wallet.id)))?;
        if current.version != wallet.version {
            return Err(DbError::Conflict(format!(
                "wallet {} was modified concurrently",
                wallet.id
            )));
        }
        let mut next = wallet.clone();
        next.version += 1;
        next.updated_at = Utc::now();
        put_json(&mut table, &next.id, &next)?;
        Ok(next)
    }

    /// Number of wallets in the table.
    pub fn count(&self) -> DbResult<u64> {
        self.db
            .read(|txn| Ok::<_, DbError>(txn.open_table(WALLETS)?.len()?))
    }
}
