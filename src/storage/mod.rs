// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistent state lives in four embedded redb files, one per logical
//! database:
//!
//! ```text
//! core.redb   users, wallets, transactions, ledger, exchange ops, trading pairs
//! kyc.redb    KYC profiles, documents, risk scores
//! rates.redb  current exchange rates, OHLCV history
//! audit.redb  audit events
//! ```
//!
//! ## Important Notes
//!
//! - Private keys and KYC PII are encrypted before they reach this module
//! - Monetary values are persisted as decimal strings, never floats
//! - Every multi-row mutation runs inside one redb write transaction

pub mod audit;
pub mod database;
pub mod ownership;
pub mod repository;
pub mod tx_cache;

use crate::config::DatabasePaths;

pub use audit::{AuditError, AuditEvent, AuditEventType, AuditRepository};
pub use database::{Database, DbError, DbResult};
pub use ownership::{AccessDenied, OwnedResource, OwnershipCheck, OwnershipEnforcer};
pub use repository::*;
pub use tx_cache::TxCache;

/// The four databases, opened once at startup and shared behind an `Arc`.
#[derive(Debug)]
pub struct Databases {
    pub core: Database,
    pub kyc: Database,
    pub rates: Database,
    pub audit: Database,
}

impl Databases {
    pub fn open(paths: &DatabasePaths) -> DbResult<Self> {
        use repository::{exchange, kyc, ledger, rates, trading_pairs, transactions, users, wallets};

        let core = Database::open(
            &paths.core,
            "core",
            &[
                users::USERS,
                wallets::WALLETS,
                transactions::TRANSACTIONS,
                ledger::LEDGER,
                ledger::LEDGER_GAPS,
                exchange::EXCHANGE_OPS,
                trading_pairs::TRADING_PAIRS,
            ],
            &[
                users::USER_BY_EMAIL,
                wallets::WALLETS_BY_USER,
                wallets::WALLET_BY_ADDRESS,
                transactions::TX_BY_HASH,
                transactions::TX_BY_WALLET,
                transactions::TX_OPEN,
                ledger::LEDGER_BY_TX,
                ledger::LEDGER_BY_ACCOUNT,
                exchange::EXCHANGE_OPS_BY_USER,
                exchange::EXCHANGE_PENDING,
            ],
        )?;
        let kyc = Database::open(
            &paths.kyc,
            "kyc",
            &[kyc::KYC_PROFILES, kyc::KYC_DOCUMENTS, kyc::RISK_SCORES],
            &[kyc::KYC_DOCS_BY_PROFILE],
        )?;
        let rates = Database::open(
            &paths.rates,
            "rates",
            &[rates::EXCHANGE_RATES, rates::PRICE_HISTORY],
            &[],
        )?;
        let audit = Database::open(&paths.audit, "audit", &[audit::AUDIT_EVENTS], &[])?;

        tracing::info!(
            core = %paths.core.display(),
            kyc = %paths.kyc.display(),
            rates = %paths.rates.display(),
            audit = %paths.audit.display(),
            "Databases opened"
        );
        Ok(Self { core, kyc, rates, audit })
    }

    /// Open all four files under one directory (tests and local runs).
    pub fn open_in(dir: &std::path::Path) -> DbResult<Self> {
        Self::open(&DatabasePaths {
            core: dir.join("core.redb"),
            kyc: dir.join("kyc.redb"),
            rates: dir.join("rates.redb"),
            audit: dir.join("audit.redb"),
        })
    }

    /// Names of databases that fail a read probe.
    pub fn unreachable(&self) -> Vec<&'static str> {
        [&self.core, &self.kyc, &self.rates, &self.audit]
            .into_iter()
            .filter(|db| db.ping().is_err())
            .map(|db| db.name())
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    use super::*;
    use crate::blockchain::Chain;

    fn open(dir: &TempDir) -> Databases {
        Databases::open_in(dir.path()).unwrap()
    }

    pub fn databases() -> (Databases, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (open(&dir), dir)
    }

    pub fn core_db() -> (Database, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let Databases { core, .. } = open(&dir);
        (core, dir)
    }

    pub fn kyc_db() -> (Database, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let Databases { kyc, .. } = open(&dir);
        (kyc, dir)
    }

    pub fn rates_db() -> (Database, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let Databases { rates, .. } = open(&dir);
        (rates, dir)
    }

    pub fn audit_db() -> (Database, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let Databases { audit, .. } = open(&dir);
        (audit, dir)
    }

    pub fn sample_wallet(id: &str, user_id: &str, chain: Chain, address: &str) -> Wallet {
        let now = Utc::now();
        Wallet {
            id: id.into(),
            user_id: user_id.into(),
            chain,
            address: address.into(),
            public_key: "pub".into(),
            encrypted_private_key: "sealed".into(),
            derivation_path: chain.derivation_path().into(),
            label: format!("{chain} Wallet"),
            balance: Decimal::ZERO,
            balance_updated_at: None,
            status: WalletStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn sample_tx(id: &str, wallet_id: &str, chain: Chain, hash: Option<&str>) -> TransactionRecord {
        let now = Utc::now();
        TransactionRecord {
            id: id.into(),
            wallet_id: wallet_id.into(),
            user_id: "u1".into(),
            chain,
            tx_type: TxType::Send,
            status: TxStatus::Pending,
            hash: hash.map(str::to_string),
            from_address: "from".into(),
            to_address: "to".into(),
            amount: dec!(0.25),
            fee: dec!(0.001),
            memo: None,
            confirmations: 0,
            block_number: None,
            error_message: None,
            metadata: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
            confirmed_at: None,
        }
    }

    pub fn sample_operation(id: &str, user_id: &str, created_at: chrono::DateTime<Utc>) -> ExchangeOperation {
        ExchangeOperation {
            id: id.into(),
            user_id: user_id.into(),
            from_wallet_id: "w_eth".into(),
            to_wallet_id: "w_sol".into(),
            base_symbol: "ETH".into(),
            quote_symbol: "SOL".into(),
            from_amount: dec!(1.0),
            to_amount: dec!(49.75),
            exchange_rate: dec!(50),
            fee_percentage: dec!(0.5),
            fee_amount: dec!(0.005),
            status: ExchangeStatus::Pending,
            quote_expires_at: created_at + Duration::seconds(60),
            executed_at: None,
            from_transaction_id: None,
            to_transaction_id: None,
            error_message: None,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn sample_pair(base: &str, quote: &str, rate: Decimal) -> TradingPair {
        let now = Utc::now();
        TradingPair {
            base_symbol: base.to_uppercase(),
            quote_symbol: quote.to_uppercase(),
            exchange_rate: rate,
            inverse_rate: Decimal::ONE / rate,
            fee_percentage: dec!(0.5),
            min_amount: dec!(0.1),
            max_amount: None,
            daily_volume: Decimal::ZERO,
            volume_date: now.date_naive(),
            is_active: true,
            has_liquidity: true,
            last_updated: now,
        }
    }
}
