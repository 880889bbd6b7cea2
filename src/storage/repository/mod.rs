// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository layer providing typed access to the redb databases.
//!
//! Each repository borrows one [`Database`](super::Database) and exposes
//! CRUD operations for a single aggregate. Repositories that take part in
//! composite units of work also expose `*_in` functions that run inside a
//! caller-owned write transaction.

pub mod exchange;
pub mod kyc;
pub mod ledger;
pub mod rates;
pub mod trading_pairs;
pub mod transactions;
pub mod users;
pub mod wallets;

pub use exchange::{ExchangeOperation, ExchangeRepository, ExchangeStats, ExchangeStatus};
pub use kyc::{
    DocumentStatus, DocumentType, KycDocument, KycLevel, KycProfile, KycRepository, KycStatus,
    RiskLevel, RiskScore,
};
pub use ledger::{net_by_currency, EntryType, LedgerEntry, LedgerGap, LedgerRepository};
pub use rates::{CandleInterval, ExchangeRate, PriceCandle, RateRepository};
pub use trading_pairs::{TradingPair, TradingPairRepository};
pub use transactions::{TransactionRecord, TransactionRepository, TxFilter, TxStatus, TxType};
pub use users::{DisplayCurrency, User, UserRepository, UserStatus};
pub use wallets::{Wallet, WalletRepository, WalletResponse, WalletStatus};
