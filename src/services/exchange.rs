// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cross-chain swap quoting and execution.
//!
//! ```text
//!   quote ─▶ pending ─ execute ─▶ processing ─▶ completed
//!               │                     └──────▶ failed
//!               └─ cancel / expiry sweep ─▶ cancelled
//! ```
//!
//! `execute` runs in three redb write transactions:
//!
//! 1. claim: `pending → processing` after the expiry check. redb serialises
//!    writers, so of several concurrent executors exactly one wins.
//! 2. settle: balance re-check, both balance updates, the swap transactions,
//!    their ledger rows, the pair volume and `→ completed`. All or nothing.
//! 3. only if settle failed: `processing → failed` with the reason.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use redb::WriteTransaction;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::audit_log;
use crate::blockchain::Chain;
use crate::clock::Clock;
use crate::config::QUOTE_TTL_SECS;
use crate::storage::{
    AuditEvent, AuditEventType, Databases, EntryType, ExchangeOperation, ExchangeRepository,
    ExchangeStats, ExchangeStatus, KycLevel, LedgerEntry, LedgerRepository, OwnershipCheck,
    TradingPair, TradingPairRepository, TransactionRecord, TransactionRepository, TxCache,
    TxStatus, TxType, Wallet, WalletRepository, WalletStatus,
};

use super::kyc::KycEnforcer;
use super::{parse_decimal, parse_positive, Page, ServiceError, ServiceResult};

pub const QUOTE_EXPIRED_REASON: &str = "Quote expired";

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct QuoteRequest {
    pub from_wallet_id: String,
    pub to_wallet_id: String,
    /// Decimal string, in the source wallet's native asset
    pub from_amount: String,
}

/// Admin input for creating or replacing a trading pair.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TradingPairInput {
    pub base_symbol: String,
    pub quote_symbol: String,
    pub exchange_rate: String,
    pub fee_percentage: String,
    pub min_amount: String,
    pub max_amount: Option<String>,
    #[serde(default = "enabled")]
    pub is_active: bool,
    #[serde(default = "enabled")]
    pub has_liquidity: bool,
}

fn enabled() -> bool {
    true
}

pub struct ExchangeEngine {
    dbs: Arc<Databases>,
    kyc: KycEnforcer,
    tx_cache: Arc<TxCache>,
    clock: Arc<dyn Clock>,
}

impl ExchangeEngine {
    pub fn new(dbs: Arc<Databases>, tx_cache: Arc<TxCache>, clock: Arc<dyn Clock>) -> Self {
        Self {
            kyc: KycEnforcer::new(dbs.clone(), clock.clone()),
            dbs,
            tx_cache,
            clock,
        }
    }

    fn ops(&self) -> ExchangeRepository<'_> {
        ExchangeRepository::new(&self.dbs.core)
    }

    fn pairs(&self) -> TradingPairRepository<'_> {
        TradingPairRepository::new(&self.dbs.core)
    }

    fn owned_wallet(&self, user_id: &str, wallet_id: &str) -> ServiceResult<Wallet> {
        let wallet = WalletRepository::new(&self.dbs.core)
            .get(wallet_id)?
            .verify_owner(user_id, "wallet", wallet_id)?;
        if wallet.status != WalletStatus::Active {
            return Err(ServiceError::WalletInactive(wallet.id));
        }
        Ok(wallet)
    }

    // =========================================================================
    // Quotes and execution
    // =========================================================================

    pub fn quote(&self, user_id: &str, request: QuoteRequest) -> ServiceResult<ExchangeOperation> {
        self.kyc.require(Some(user_id), KycLevel::Basic)?;
        if request.from_wallet_id == request.to_wallet_id {
            return Err(ServiceError::SameWallets);
        }
        let from = self.owned_wallet(user_id, &request.from_wallet_id)?;
        let to = self.owned_wallet(user_id, &request.to_wallet_id)?;
        let from_amount = parse_positive("from_amount", &request.from_amount)?;

        if from.balance < from_amount {
            return Err(ServiceError::InsufficientBalance {
                available: from.balance,
                requested: from_amount,
            });
        }

        let (base, quote) = (from.chain.symbol(), to.chain.symbol());
        let pair = self
            .pairs()
            .get(base, quote)?
            .filter(TradingPair::is_tradable)
            .ok_or_else(|| ServiceError::InvalidTradingPair(TradingPair::key(base, quote)))?;
        if from_amount < pair.min_amount {
            return Err(ServiceError::AmountTooSmall(pair.min_amount));
        }
        if let Some(max) = pair.max_amount {
            if from_amount > max {
                return Err(ServiceError::AmountTooLarge(max));
            }
        }

        let fee_amount = (from_amount * pair.fee_percentage / Decimal::ONE_HUNDRED).normalize();
        let to_amount = ((from_amount - fee_amount) * pair.exchange_rate).normalize();
        let now = self.clock.now();
        let op = ExchangeOperation {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            from_wallet_id: from.id,
            to_wallet_id: to.id,
            base_symbol: base.to_string(),
            quote_symbol: quote.to_string(),
            from_amount,
            to_amount,
            exchange_rate: pair.exchange_rate,
            fee_percentage: pair.fee_percentage,
            fee_amount,
            status: ExchangeStatus::Pending,
            quote_expires_at: now + Duration::seconds(QUOTE_TTL_SECS),
            executed_at: None,
            from_transaction_id: None,
            to_transaction_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.ops().insert(&op)?;

        info!(operation_id = %op.id, user_id = %user_id, pair = %pair.symbol(), from_amount = %from_amount, to_amount = %to_amount, "Created swap quote");
        audit_log!(&self.dbs.audit, AuditEventType::QuoteCreated, user_id, "exchange_operation", op.id.as_str());
        Ok(op)
    }

    pub fn execute(&self, user_id: &str, operation_id: &str) -> ServiceResult<ExchangeOperation> {
        self.kyc.require(Some(user_id), KycLevel::Basic)?;
        let now = self.clock.now();

        let claimed = self.dbs.core.write(|txn| {
            let mut op = ExchangeRepository::load_in(txn, operation_id)?.verify_owner(
                user_id,
                "exchange operation",
                operation_id,
            )?;
            if !op.status.can_transition_to(ExchangeStatus::Processing) {
                return Err(ServiceError::invalid_status(op.status, ExchangeStatus::Processing));
            }
            if now > op.quote_expires_at {
                return Err(ServiceError::QuoteExpired);
            }
            op.status = ExchangeStatus::Processing;
            op.updated_at = now;
            ExchangeRepository::update_in(txn, &op)?;
            Ok(op)
        })?;

        match self.dbs.core.write(|txn| settle_in(txn, claimed.clone(), now)) {
            Ok(done) => {
                self.tx_cache.invalidate(&done.from_wallet_id);
                self.tx_cache.invalidate(&done.to_wallet_id);
                info!(
                    operation_id = %done.id,
                    user_id = %user_id,
                    from_amount = %done.from_amount,
                    to_amount = %done.to_amount,
                    "Swap executed"
                );
                audit_log!(
                    &self.dbs.audit,
                    AuditEvent::new(AuditEventType::ExchangeExecuted)
                        .with_user(user_id)
                        .with_resource("exchange_operation", done.id.as_str())
                        .with_details(serde_json::json!({
                            "pair": format!("{}/{}", done.base_symbol, done.quote_symbol),
                            "from_amount": done.from_amount,
                            "to_amount": done.to_amount,
                        }))
                );
                Ok(done)
            }
            Err(e) => {
                warn!(operation_id = %operation_id, error = %e, "Swap settlement failed");
                self.mark_failed(&claimed, &e.to_string());
                audit_log!(
                    &self.dbs.audit,
                    AuditEvent::new(AuditEventType::ExchangeFailed)
                        .with_user(user_id)
                        .with_resource("exchange_operation", operation_id)
                        .failed(e.to_string())
                );
                Err(e)
            }
        }
    }

    fn mark_failed(&self, op: &ExchangeOperation, reason: &str) {
        let now = self.clock.now();
        let result = self.dbs.core.write(|txn| {
            let Some(mut current) = ExchangeRepository::load_in(txn, &op.id)? else {
                return Ok(());
            };
            if !current.status.can_transition_to(ExchangeStatus::Failed) {
                return Ok(());
            }
            current.status = ExchangeStatus::Failed;
            current.error_message = Some(reason.to_string());
            current.updated_at = now;
            ExchangeRepository::update_in(txn, &current)
        });
        if let Err(e) = result {
            error!(operation_id = %op.id, error = %e, "Failed to mark swap as failed, operation left in processing");
        }
    }

    pub fn cancel(
        &self,
        user_id: &str,
        operation_id: &str,
        reason: Option<String>,
    ) -> ServiceResult<ExchangeOperation> {
        self.kyc.require(Some(user_id), KycLevel::Basic)?;
        let now = self.clock.now();
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "Cancelled by user".to_string());

        let op = self.dbs.core.write(|txn| {
            let mut op = ExchangeRepository::load_in(txn, operation_id)?.verify_owner(
                user_id,
                "exchange operation",
                operation_id,
            )?;
            if !op.status.can_transition_to(ExchangeStatus::Cancelled) {
                return Err(ServiceError::invalid_status(op.status, ExchangeStatus::Cancelled));
            }
            op.status = ExchangeStatus::Cancelled;
            op.error_message = Some(reason);
            op.updated_at = now;
            ExchangeRepository::update_in(txn, &op)?;
            Ok::<_, ServiceError>(op)
        })?;

        info!(operation_id = %op.id, user_id = %user_id, "Swap quote cancelled");
        audit_log!(&self.dbs.audit, AuditEventType::ExchangeCancelled, user_id, "exchange_operation", op.id.as_str());
        Ok(op)
    }

    /// Cancel every pending quote whose expiry is at or before now. Returns
    /// the number of operations cancelled by this call.
    pub fn expire_pending_quotes(&self) -> ServiceResult<usize> {
        let now = self.clock.now();
        let mut cancelled = 0;
        for id in self.ops().due_pending(now)? {
            let expired = self.dbs.core.write(|txn| {
                let Some(mut op) = ExchangeRepository::load_in(txn, &id)? else {
                    return Ok(false);
                };
                if op.status != ExchangeStatus::Pending || op.quote_expires_at > now {
                    return Ok(false);
                }
                op.status = ExchangeStatus::Cancelled;
                op.error_message = Some(QUOTE_EXPIRED_REASON.to_string());
                op.updated_at = now;
                ExchangeRepository::update_in(txn, &op)?;
                Ok::<_, ServiceError>(true)
            })?;
            if expired {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(count = cancelled, "Expired pending swap quotes");
        }
        Ok(cancelled)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn stats(&self, user_id: &str) -> ServiceResult<ExchangeStats> {
        Ok(self.ops().stats(user_id)?)
    }

    pub fn list_operations(&self, user_id: &str, page: Page) -> ServiceResult<(Vec<ExchangeOperation>, usize)> {
        Ok(self.ops().list_by_user(user_id, page.offset, page.limit)?)
    }

    pub fn get_operation(&self, user_id: &str, operation_id: &str) -> ServiceResult<ExchangeOperation> {
        Ok(self
            .ops()
            .get(operation_id)?
            .verify_owner(user_id, "exchange operation", operation_id)?)
    }

    pub fn get_rate(&self, base: &str, quote: &str) -> ServiceResult<TradingPair> {
        self.pairs()
            .get(base, quote)?
            .ok_or_else(|| ServiceError::NotFound(format!("trading pair {}", TradingPair::key(base, quote))))
    }

    pub fn list_pairs(&self) -> ServiceResult<Vec<TradingPair>> {
        Ok(self.pairs().list_active()?)
    }

    // =========================================================================
    // Administration
    // =========================================================================

    pub fn upsert_trading_pair(&self, admin_id: &str, input: TradingPairInput) -> ServiceResult<TradingPair> {
        let base: Chain = input.base_symbol.parse()?;
        let quote: Chain = input.quote_symbol.parse()?;
        if base == quote {
            return Err(ServiceError::validation("quote_symbol", "base and quote must differ"));
        }
        let rate = parse_positive("exchange_rate", &input.exchange_rate)?;
        let fee_percentage = parse_decimal("fee_percentage", &input.fee_percentage)?;
        if fee_percentage < Decimal::ZERO || fee_percentage >= Decimal::ONE_HUNDRED {
            return Err(ServiceError::validation(
                "fee_percentage",
                "fee_percentage must be in [0, 100)",
            ));
        }
        let min_amount = parse_decimal("min_amount", &input.min_amount)?;
        if min_amount < Decimal::ZERO {
            return Err(ServiceError::validation("min_amount", "min_amount must not be negative"));
        }
        let max_amount = match input.max_amount.as_deref() {
            Some(raw) => {
                let max = parse_positive("max_amount", raw)?;
                if max < min_amount {
                    return Err(ServiceError::validation("max_amount", "max_amount must be at least min_amount"));
                }
                Some(max)
            }
            None => None,
        };
        let inverse_rate = Decimal::ONE
            .checked_div(rate)
            .ok_or_else(|| ServiceError::validation("exchange_rate", "exchange_rate is out of range"))?;

        let now = self.clock.now();
        let pair = TradingPair {
            base_symbol: base.symbol().to_string(),
            quote_symbol: quote.symbol().to_string(),
            exchange_rate: rate,
            inverse_rate,
            fee_percentage,
            min_amount,
            max_amount,
            daily_volume: Decimal::ZERO,
            volume_date: now.date_naive(),
            is_active: input.is_active,
            has_liquidity: input.has_liquidity,
            last_updated: now,
        };
        let stored = self.pairs().upsert(&pair)?;

        info!(pair = %stored.symbol(), rate = %rate, "Trading pair upserted");
        audit_log!(&self.dbs.audit, AuditEventType::TradingPairUpserted, admin_id, "trading_pair", stored.symbol());
        Ok(stored)
    }
}

/// Balances, swap transactions, ledger rows, volume and completion in one
/// write transaction.
fn settle_in(
    txn: &WriteTransaction,
    mut op: ExchangeOperation,
    now: DateTime<Utc>,
) -> ServiceResult<ExchangeOperation> {
    let mut from = WalletRepository::load_in(txn, &op.from_wallet_id)?
        .ok_or_else(|| ServiceError::NotFound(format!("wallet {}", op.from_wallet_id)))?;
    let mut to = WalletRepository::load_in(txn, &op.to_wallet_id)?
        .ok_or_else(|| ServiceError::NotFound(format!("wallet {}", op.to_wallet_id)))?;
    if from.balance < op.from_amount {
        return Err(ServiceError::InsufficientBalance {
            available: from.balance,
            requested: op.from_amount,
        });
    }

    from.balance -= op.from_amount;
    from.balance_updated_at = Some(now);
    to.balance += op.to_amount;
    to.balance_updated_at = Some(now);
    let from = WalletRepository::update_in(txn, &from)?;
    let to = WalletRepository::update_in(txn, &to)?;

    let account = format!("exchange:{}/{}", op.base_symbol, op.quote_symbol);
    let out_tx = swap_transaction(&op, &from, TxType::SwapOut, &from.address, &account, op.from_amount, now);
    let in_tx = swap_transaction(&op, &to, TxType::SwapIn, &account, &to.address, op.to_amount, now);
    TransactionRepository::insert_in(txn, &out_tx)?;
    TransactionRepository::insert_in(txn, &in_tx)?;

    let description = format!("Swap {} {} → {} {}", op.from_amount, op.base_symbol, op.to_amount, op.quote_symbol);
    LedgerRepository::append_in(
        txn,
        &[
            LedgerEntry::new(&from.address, Some(out_tx.id.clone()), EntryType::Credit, op.from_amount, &op.base_symbol, &description, now)
                .with_balance_after(from.balance),
            LedgerEntry::new(&account, Some(out_tx.id.clone()), EntryType::Debit, op.from_amount, &op.base_symbol, &description, now),
            LedgerEntry::new(&account, Some(in_tx.id.clone()), EntryType::Credit, op.to_amount, &op.quote_symbol, &description, now),
            LedgerEntry::new(&to.address, Some(in_tx.id.clone()), EntryType::Debit, op.to_amount, &op.quote_symbol, &description, now)
                .with_balance_after(to.balance),
        ],
    )?;

    TradingPairRepository::add_volume_in(txn, &op.base_symbol, &op.quote_symbol, op.from_amount, now)?;

    op.status = ExchangeStatus::Completed;
    op.executed_at = Some(now);
    op.from_transaction_id = Some(out_tx.id);
    op.to_transaction_id = Some(in_tx.id);
    op.updated_at = now;
    ExchangeRepository::update_in(txn, &op)?;
    Ok(op)
}

fn swap_transaction(
    op: &ExchangeOperation,
    wallet: &Wallet,
    tx_type: TxType,
    from_address: &str,
    to_address: &str,
    amount: Decimal,
    now: DateTime<Utc>,
) -> TransactionRecord {
    let leg = if tx_type == TxType::SwapOut { "out" } else { "in" };
    let mut metadata = serde_json::Map::new();
    metadata.insert("exchange_operation_id".into(), op.id.clone().into());
    metadata.insert("fee_amount".into(), op.fee_amount.to_string().into());
    metadata.insert("exchange_rate".into(), op.exchange_rate.to_string().into());
    TransactionRecord {
        id: uuid::Uuid::new_v4().to_string(),
        wallet_id: wallet.id.clone(),
        user_id: op.user_id.clone(),
        chain: wallet.chain,
        tx_type,
        status: TxStatus::Confirmed,
        hash: Some(format!("swap:{}:{leg}", op.id)),
        from_address: from_address.to_string(),
        to_address: to_address.to_string(),
        amount,
        fee: Decimal::ZERO,
        memo: None,
        confirmations: 0,
        block_number: None,
        error_message: None,
        metadata,
        created_at: now,
        updated_at: now,
        confirmed_at: Some(now),
    }
}
