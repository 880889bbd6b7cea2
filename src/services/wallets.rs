// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet & key-custody engine.
//!
//! ## Send pipeline
//!
//! validate → load wallet → KYC gate and limits → create (retried) → sign
//! → broadcast (retried) → persist transaction → append ledger pair → audit.
//!
//! Nothing is persisted before a successful broadcast, so a failure in any
//! earlier step leaves no trace. A ledger append that fails after the
//! transaction was stored is recorded as a [`LedgerGap`] and reconciled by
//! the transaction monitor.
//!
//! Private keys are decrypted only inside [`WalletEngine::send_transaction`]
//! and held in zeroizing buffers; they are never logged or returned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::audit_log;
use crate::blockchain::{AdapterRegistry, Chain, ChainAdapter, FeeEstimate, Priority, TransferRequest};
use crate::clock::Clock;
use crate::crypto::KeyEncryptor;
use crate::retry::{retry, RetryPolicy};
use crate::storage::{
    AuditEvent, AuditEventType, Databases, EntryType, ExchangeRepository, KycLevel, KycProfile,
    LedgerEntry, LedgerGap, LedgerRepository, OwnershipCheck, RateRepository, TransactionRecord,
    TransactionRepository, TxCache, TxFilter, TxStatus, TxType, Wallet, WalletRepository,
    WalletStatus,
};

use super::kyc::KycEnforcer;
use super::{parse_decimal, parse_positive, Page, ServiceError, ServiceResult};

const TX_CACHE_CAPACITY: usize = 1_000;
const TX_CACHE_TTL: Duration = Duration::from_secs(30);

/// Send request as accepted by the API.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub wallet_id: String,
    pub chain: String,
    pub to_address: String,
    /// Decimal string
    pub amount: String,
    /// Decimal string; the adapter's estimate for `priority` when absent
    pub fee: Option<String>,
    pub memo: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, Default)]
pub struct WalletFilter {
    pub chain: Option<Chain>,
    pub status: Option<WalletStatus>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WalletSort {
    #[default]
    CreatedAsc,
    CreatedDesc,
    BalanceDesc,
    Label,
}

pub struct WalletEngine {
    dbs: Arc<Databases>,
    adapters: Arc<AdapterRegistry>,
    encryptor: Option<Arc<KeyEncryptor>>,
    kyc: KycEnforcer,
    clock: Arc<dyn Clock>,
    tx_cache: Arc<TxCache>,
    retry_policy: RetryPolicy,
    empty_balance_payloads: AtomicU64,
}

impl WalletEngine {
    pub fn new(
        dbs: Arc<Databases>,
        adapters: Arc<AdapterRegistry>,
        encryptor: Option<Arc<KeyEncryptor>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kyc: KycEnforcer::new(dbs.clone(), clock.clone()),
            dbs,
            adapters,
            encryptor,
            clock,
            tx_cache: Arc::new(TxCache::new(TX_CACHE_CAPACITY, TX_CACHE_TTL)),
            retry_policy: RetryPolicy::CHAIN,
            empty_balance_payloads: AtomicU64::new(0),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn tx_cache(&self) -> Arc<TxCache> {
        self.tx_cache.clone()
    }

    /// How many balance refreshes got an empty payload from the chain.
    pub fn empty_balance_payloads(&self) -> u64 {
        self.empty_balance_payloads.load(Ordering::Relaxed)
    }

    fn adapter(&self, chain: Chain) -> ServiceResult<Arc<dyn ChainAdapter>> {
        self.adapters
            .get(chain)
            .ok_or(ServiceError::AdapterNotRegistered(chain))
    }

    fn encryptor(&self) -> ServiceResult<&KeyEncryptor> {
        self.encryptor
            .as_deref()
            .ok_or(ServiceError::EncryptorNotConfigured)
    }

    fn wallets(&self) -> WalletRepository<'_> {
        WalletRepository::new(&self.dbs.core)
    }

    fn owned_wallet(&self, user_id: &str, wallet_id: &str) -> ServiceResult<Wallet> {
        Ok(self.wallets().get(wallet_id)?.verify_owner(user_id, "wallet", wallet_id)?)
    }

    // =========================================================================
    // Wallet lifecycle
    // =========================================================================

    pub fn create_wallet(&self, user_id: &str, chain: &str, label: Option<String>) -> ServiceResult<Wallet> {
        let chain: Chain = chain.parse()?;
        let adapter = self.adapter(chain)?;
        let encryptor = self.encryptor()?;

        let generated = adapter.generate_wallet()?;
        let encrypted_private_key = encryptor.encrypt_str(&generated.private_key, &generated.address)?;

        let now = self.clock.now();
        let label = label
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| format!("{chain} Wallet"));
        let wallet = Wallet {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            chain,
            address: generated.address.clone(),
            public_key: generated.public_key.clone(),
            encrypted_private_key,
            derivation_path: generated.derivation_path.clone(),
            label,
            balance: Decimal::ZERO,
            balance_updated_at: None,
            status: WalletStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.wallets().create(&wallet)?;

        info!(wallet_id = %wallet.id, user_id = %user_id, chain = %chain, address = %wallet.address, "Created wallet");
        audit_log!(&self.dbs.audit, AuditEventType::WalletCreated, user_id, "wallet", wallet.id.as_str());
        Ok(wallet)
    }

    /// One page of the user's wallets plus the total matching count.
    pub fn list_wallets(
        &self,
        user_id: &str,
        filter: &WalletFilter,
        sort: WalletSort,
        page: Page,
    ) -> ServiceResult<(Vec<Wallet>, usize)> {
        let mut wallets: Vec<Wallet> = self
            .wallets()
            .list_by_user(user_id)?
            .into_iter()
            .filter(|w| filter.chain.is_none_or(|c| c == w.chain))
            .filter(|w| filter.status.is_none_or(|s| s == w.status))
            .collect();
        match sort {
            WalletSort::CreatedAsc => {}
            WalletSort::CreatedDesc => wallets.reverse(),
            WalletSort::BalanceDesc => wallets.sort_by(|a, b| b.balance.cmp(&a.balance)),
            WalletSort::Label => wallets.sort_by(|a, b| a.label.to_lowercase().cmp(&b.label.to_lowercase())),
        }
        let total = wallets.len();
        let items = wallets.into_iter().skip(page.offset).take(page.limit).collect();
        Ok((items, total))
    }

    pub fn get_wallet(&self, user_id: &str, wallet_id: &str) -> ServiceResult<Wallet> {
        self.owned_wallet(user_id, wallet_id)
    }

    /// Archive a wallet. Refused while a quote or swap still references it.
    pub fn archive_wallet(&self, user_id: &str, wallet_id: &str) -> ServiceResult<Wallet> {
        let wallet = self.owned_wallet(user_id, wallet_id)?;
        if wallet.status == WalletStatus::Archived {
            return Ok(wallet);
        }
        if ExchangeRepository::new(&self.dbs.core).wallet_has_active_ops(user_id, wallet_id)? {
            return Err(ServiceError::Conflict(format!(
                "wallet {wallet_id} is referenced by a pending exchange operation"
            )));
        }
        let mut next = wallet;
        next.status = WalletStatus::Archived;
        let stored = self.wallets().update(&next)?;

        info!(wallet_id = %wallet_id, user_id = %user_id, "Archived wallet");
        audit_log!(&self.dbs.audit, AuditEventType::WalletArchived, user_id, "wallet", wallet_id);
        Ok(stored)
    }

    /// Query the chain and store the fresh balance.
    ///
    /// An empty payload leaves the stored balance untouched and is counted.
    pub async fn refresh_balance(
        &self,
        user_id: &str,
        wallet_id: &str,
        cancel: &CancellationToken,
    ) -> ServiceResult<Wallet> {
        let wallet = self.owned_wallet(user_id, wallet_id)?;
        let adapter = self.adapter(wallet.chain)?;

        let info = retry(self.retry_policy, cancel, "get_balance", || {
            adapter.get_balance(&wallet.address)
        })
        .await?;

        if info.balance.trim().is_empty() {
            self.empty_balance_payloads.fetch_add(1, Ordering::Relaxed);
            warn!(wallet_id = %wallet_id, chain = %wallet.chain, "Empty balance payload, keeping stored balance");
            return Ok(wallet);
        }
        let balance = parse_decimal("balance", &info.balance)
            .ok()
            .filter(|b| *b >= Decimal::ZERO)
            .ok_or_else(|| {
                crate::blockchain::ChainError::Rpc(format!("unusable balance '{}'", info.balance))
            })?;

        let now = self.clock.now();
        let stored = self.dbs.core.write(|txn| {
            let mut current = WalletRepository::load_in(txn, wallet_id)?
                .ok_or_else(|| ServiceError::NotFound(format!("wallet {wallet_id}")))?;
            current.balance = balance;
            current.balance_updated_at = Some(now);
            Ok::<_, ServiceError>(WalletRepository::update_in(txn, &current)?)
        })?;
        Ok(stored)
    }

    pub async fn estimate_fee(
        &self,
        user_id: &str,
        wallet_id: &str,
        to: &str,
        amount: &str,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> ServiceResult<FeeEstimate> {
        let wallet = self.owned_wallet(user_id, wallet_id)?;
        let amount = parse_positive("amount", amount)?;
        let adapter = self.adapter(wallet.chain)?;
        if !adapter.validate_address(to) {
            return Err(ServiceError::validation("to", format!("not a valid {} address", wallet.chain)));
        }
        Ok(retry(self.retry_policy, cancel, "estimate_fee", || {
            adapter.estimate_fee(&wallet.address, to, amount, priority)
        })
        .await?)
    }

    // =========================================================================
    // Send
    // =========================================================================

    pub async fn send_transaction(
        &self,
        user_id: &str,
        request: SendRequest,
        cancel: &CancellationToken,
    ) -> ServiceResult<TransactionRecord> {
        // 1. Validate
        if user_id.is_empty() {
            return Err(ServiceError::AuthRequired);
        }
        if request.wallet_id.trim().is_empty() {
            return Err(ServiceError::validation("walletId", "walletId is required"));
        }
        let chain: Chain = request.chain.parse()?;
        let to_address = request.to_address.trim().to_string();
        if to_address.is_empty() {
            return Err(ServiceError::validation("toAddress", "toAddress is required"));
        }
        let amount = parse_positive("amount", &request.amount)?;
        let requested_fee = match request.fee.as_deref() {
            Some(raw) => {
                let fee = parse_decimal("fee", raw)?;
                if fee < Decimal::ZERO {
                    return Err(ServiceError::validation("fee", "fee must not be negative"));
                }
                Some(fee)
            }
            None => None,
        };
        let priority = request.priority.unwrap_or_default();

        // 2. Wallet
        let wallet = self.owned_wallet(user_id, &request.wallet_id)?;
        if wallet.status != WalletStatus::Active {
            return Err(ServiceError::WalletInactive(wallet.id));
        }
        if wallet.chain != chain {
            return Err(ServiceError::ChainMismatch {
                wallet: wallet.chain,
                requested: chain,
            });
        }

        // 3. KYC
        let profile = self.kyc.require(Some(user_id), KycLevel::Basic)?;
        self.enforce_limits(user_id, &profile, chain, amount)?;

        // 4. Build
        let adapter = self.adapter(chain)?;
        if !adapter.validate_address(&to_address) {
            return Err(ServiceError::validation("toAddress", format!("not a valid {chain} address")));
        }
        let fee = match requested_fee {
            Some(fee) => fee,
            None => retry(self.retry_policy, cancel, "estimate_fee", || {
                adapter.estimate_fee(&wallet.address, &to_address, amount, priority)
            })
            .await?
            .for_priority(priority),
        };
        let outgoing = amount
            .checked_add(fee)
            .ok_or_else(|| ServiceError::validation("amount", "amount plus fee is out of range"))?;
        let transfer = TransferRequest {
            from: wallet.address.clone(),
            to: to_address.clone(),
            amount,
            fee: requested_fee,
            memo: request.memo.clone(),
            priority,
        };
        let unsigned = retry(self.retry_policy, cancel, "create_transaction", || {
            adapter.create_transaction(&transfer)
        })
        .await?;

        // 5. Sign
        let signed = {
            let private_key = self
                .encryptor()?
                .decrypt_str(&wallet.encrypted_private_key, &wallet.address)?;
            adapter.sign_transaction(&unsigned, &private_key)?
        };

        // 6. Broadcast
        let hash = retry(self.retry_policy, cancel, "broadcast_transaction", || {
            adapter.broadcast_transaction(&signed)
        })
        .await?;

        // 7. Record
        let mut metadata = unsigned.metadata.clone();
        metadata.extend(signed.metadata.clone());
        if let Some(memo) = &request.memo {
            metadata.insert("memo".into(), memo.clone().into());
        }
        if let Some(extra) = request.metadata {
            metadata.extend(extra);
        }
        let now = self.clock.now();
        let tx = TransactionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            wallet_id: wallet.id.clone(),
            user_id: user_id.to_string(),
            chain,
            tx_type: TxType::Send,
            status: TxStatus::Confirming,
            hash: Some(hash.clone()),
            from_address: wallet.address.clone(),
            to_address: to_address.clone(),
            amount,
            fee,
            memo: request.memo,
            confirmations: 0,
            block_number: None,
            error_message: None,
            metadata,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
        };

        // 8. Ledger pair: amount + fee leaves the source, amount reaches the destination
        let entries = vec![
            LedgerEntry::new(
                wallet.address.clone(),
                Some(tx.id.clone()),
                EntryType::Credit,
                outgoing,
                chain.symbol(),
                format!("Send to {to_address}"),
                now,
            )
            .with_balance_after(wallet.balance - outgoing),
            LedgerEntry::new(
                to_address.clone(),
                Some(tx.id.clone()),
                EntryType::Debit,
                amount,
                chain.symbol(),
                format!("Receive from {}", wallet.address),
                now,
            ),
        ];

        // 9. Persist
        TransactionRepository::new(&self.dbs.core).insert(&tx)?;
        self.tx_cache.invalidate(&wallet.id);
        self.append_ledger(&tx.id, entries);

        info!(
            tx_id = %tx.id,
            wallet_id = %wallet.id,
            chain = %chain,
            hash = %hash,
            amount = %amount,
            fee = %fee,
            "Transaction broadcast"
        );
        audit_log!(
            &self.dbs.audit,
            AuditEvent::new(AuditEventType::TransactionBroadcast)
                .with_user(user_id)
                .with_resource("transaction", tx.id.as_str())
                .with_details(serde_json::json!({
                    "wallet_id": wallet.id,
                    "chain": chain,
                    "hash": hash,
                    "amount": amount,
                }))
        );
        Ok(tx)
    }

    fn append_ledger(&self, tx_id: &str, entries: Vec<LedgerEntry>) {
        let ledger = LedgerRepository::new(&self.dbs.core);
        let Err(e) = ledger.append(&entries) else {
            return;
        };
        warn!(tx_id = %tx_id, error = %e, "Ledger append failed, recording gap for reconciliation");
        let gap = LedgerGap {
            transaction_id: tx_id.to_string(),
            entries,
            error: e.to_string(),
            recorded_at: self.clock.now(),
        };
        if let Err(e) = ledger.record_gap(&gap) {
            tracing::error!(tx_id = %tx_id, error = %e, "Failed to record ledger gap");
        }
    }

    /// Daily and monthly USD limits of the KYC profile. Skipped when no USD
    /// rate is known for the chain.
    fn enforce_limits(
        &self,
        user_id: &str,
        profile: &KycProfile,
        chain: Chain,
        amount: Decimal,
    ) -> ServiceResult<()> {
        let rates = RateRepository::new(&self.dbs.rates);
        let Some(rate) = rates.get(chain.symbol())? else {
            return Ok(());
        };
        let requested = amount
            .checked_mul(rate.price_usd)
            .ok_or_else(|| ServiceError::validation("amount", "amount is out of range"))?;

        let now = self.clock.now();
        let day_start = start_of_day(now);
        let month_start = start_of_month(now);

        let mut prices: HashMap<Chain, Option<Decimal>> = HashMap::new();
        prices.insert(chain, Some(rate.price_usd));
        let (mut daily, mut monthly) = (Decimal::ZERO, Decimal::ZERO);
        let txs = TransactionRepository::new(&self.dbs.core);
        for wallet in self.wallets().list_by_user(user_id)? {
            let price = match prices.get(&wallet.chain) {
                Some(p) => *p,
                None => {
                    let p = rates.get(wallet.chain.symbol())?.map(|r| r.price_usd);
                    prices.insert(wallet.chain, p);
                    p
                }
            };
            let Some(price) = price else { continue };
            for tx in txs.since(&wallet.id, month_start)? {
                if tx.tx_type != TxType::Send || matches!(tx.status, TxStatus::Failed | TxStatus::Cancelled) {
                    continue;
                }
                // Out-of-range history already exceeds any limit
                let usd = tx.amount.checked_mul(price).unwrap_or(Decimal::MAX);
                monthly = monthly.saturating_add(usd);
                if tx.created_at >= day_start {
                    daily = daily.saturating_add(usd);
                }
            }
        }

        let over = |spent: Decimal, limit: Decimal| spent.checked_add(requested).is_none_or(|total| total > limit);
        if over(daily, profile.daily_limit_usd) {
            return Err(ServiceError::LimitExceeded(format!(
                "daily limit of {} USD exceeded",
                profile.daily_limit_usd
            )));
        }
        if over(monthly, profile.monthly_limit_usd) {
            return Err(ServiceError::LimitExceeded(format!(
                "monthly limit of {} USD exceeded",
                profile.monthly_limit_usd
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Transaction queries
    // =========================================================================

    pub fn list_transactions(
        &self,
        user_id: &str,
        wallet_id: &str,
        filter: &TxFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> ServiceResult<(Vec<TransactionRecord>, Option<String>)> {
        self.owned_wallet(user_id, wallet_id)?;
        let cacheable = filter.is_empty() && cursor.is_none();
        if cacheable {
            if let Some(page) = self.tx_cache.get_first_page(wallet_id, limit) {
                return Ok(page);
            }
        }
        let page = TransactionRepository::new(&self.dbs.core).list_by_wallet(wallet_id, filter, cursor, limit)?;
        if cacheable {
            self.tx_cache.put_first_page(wallet_id, limit, page.clone());
        }
        Ok(page)
    }

    pub fn get_transaction(&self, user_id: &str, tx_id: &str) -> ServiceResult<TransactionRecord> {
        Ok(TransactionRepository::new(&self.dbs.core)
            .get(tx_id)?
            .verify_owner(user_id, "transaction", tx_id)?)
    }

    pub fn transaction_ledger(&self, user_id: &str, tx_id: &str) -> ServiceResult<Vec<LedgerEntry>> {
        self.get_transaction(user_id, tx_id)?;
        Ok(LedgerRepository::new(&self.dbs.core).by_transaction(tx_id)?)
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|d| Utc.from_utc_datetime(&d))
        .unwrap_or(now)
}

fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::blockchain::mock::MockAdapter;
    use crate::clock::ManualClock;
    use crate::services::kyc::tests::{png, submission};
    use crate::services::KycService;
    use crate::storage::test_support::databases;
    use crate::storage::ExchangeRate;
    use rust_decimal_macros::dec;

    struct Harness {
        engine: WalletEngine,
        kyc: KycService,
        eth: Arc<MockAdapter>,
        dbs: Arc<Databases>,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let (dbs, dir) = databases();
        let dbs = Arc::new(dbs);
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Utc::now()));
        let eth = Arc::new(MockAdapter::new(Chain::Eth));
        let adapters = AdapterRegistry::new()
            .with(eth.clone())
            .with(Arc::new(MockAdapter::new(Chain::Sol)));
        let encryptor = Arc::new(KeyEncryptor::ephemeral().unwrap());
        let engine = WalletEngine::new(dbs.clone(), Arc::new(adapters), Some(encryptor.clone()), clock.clone())
            .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1)));
        let kyc = KycService::new(dbs.clone(), encryptor, clock);
        Harness { engine, kyc, eth, dbs, _dir: dir }
    }

    fn approve(h: &Harness, user: &str) {
        h.kyc.add_document(user, png(8)).unwrap();
        h.kyc.submit(user, submission()).unwrap();
        h.kyc.start_review(user).unwrap();
        h.kyc.approve(user, KycLevel::Basic).unwrap();
    }

    fn send(wallet: &Wallet, amount: &str, fee: Option<&str>) -> SendRequest {
        SendRequest {
            wallet_id: wallet.id.clone(),
            chain: "ETH".into(),
            to_address: "0xabc0000000000000000000000000000000000001".into(),
            amount: amount.into(),
            fee: fee.map(str::to_string),
            memo: None,
            metadata: None,
            priority: None,
        }
    }

    #[test]
    fn create_wallet_encrypts_key_and_defaults_label() {
        let h = harness();
        let wallet = h.engine.create_wallet("u1", "eth", None).unwrap();
        assert!(wallet.address.starts_with("0x"));
        assert_eq!(wallet.label, "ETH Wallet");
        assert_eq!(wallet.balance, Decimal::ZERO);
        assert!(!wallet.encrypted_private_key.contains("secret"));

        let second = h.engine.create_wallet("u1", "ETH", Some("Trading".into())).unwrap();
        assert_ne!(wallet.address, second.address);
        assert_eq!(second.label, "Trading");
    }

    #[test]
    fn create_wallet_errors() {
        let h = harness();
        assert!(matches!(h.engine.create_wallet("u1", "DOGE", None), Err(ServiceError::UnsupportedChain(_))));
        assert!(matches!(
            h.engine.create_wallet("u1", "BTC", None),
            Err(ServiceError::AdapterNotRegistered(Chain::Btc))
        ));

        let no_key = WalletEngine::new(
            h.dbs.clone(),
            Arc::new(AdapterRegistry::new().with(h.eth.clone())),
            None,
            Arc::new(crate::clock::SystemClock),
        );
        assert!(matches!(no_key.create_wallet("u1", "ETH", None), Err(ServiceError::EncryptorNotConfigured)));
    }

    #[test]
    fn list_filters_and_ownership() {
        let h = harness();
        h.engine.create_wallet("u1", "ETH", Some("b".into())).unwrap();
        h.engine.create_wallet("u1", "SOL", Some("a".into())).unwrap();
        let foreign = h.engine.create_wallet("u2", "ETH", None).unwrap();

        let filter = WalletFilter { chain: Some(Chain::Sol), status: None };
        let (rows, total) = h.engine.list_wallets("u1", &filter, WalletSort::default(), Page::default()).unwrap();
        assert_eq!((rows.len(), total), (1, 1));

        let (rows, _) = h
            .engine
            .list_wallets("u1", &WalletFilter::default(), WalletSort::Label, Page::default())
            .unwrap();
        assert_eq!(rows[0].label, "a");

        assert!(matches!(h.engine.get_wallet("u1", &foreign.id), Err(ServiceError::Forbidden(_))));
        assert!(matches!(h.engine.get_wallet("u1", "nope"), Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn refresh_balance_updates_and_tolerates_empty_payload() {
        let h = harness();
        let wallet = h.engine.create_wallet("u1", "ETH", None).unwrap();
        let cancel = CancellationToken::new();

        h.eth.set_balance("1.5");
        let refreshed = h.engine.refresh_balance("u1", &wallet.id, &cancel).await.unwrap();
        assert_eq!(refreshed.balance, dec!(1.5));
        assert!(refreshed.balance_updated_at.is_some());

        h.eth.set_balance("");
        let kept = h.engine.refresh_balance("u1", &wallet.id, &cancel).await.unwrap();
        assert_eq!(kept.balance, dec!(1.5));
        assert_eq!(h.engine.empty_balance_payloads(), 1);
    }

    #[tokio::test]
    async fn send_requires_kyc_profile() {
        let h = harness();
        let wallet = h.engine.create_wallet("u2", "ETH", None).unwrap();
        let err = h
            .engine
            .send_transaction("u2", send(&wallet, "0.25", Some("0.001")), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ProfileRequired));
        assert_eq!(h.eth.broadcasts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn send_persists_transaction_and_balanced_ledger() {
        let h = harness();
        approve(&h, "u1");
        let wallet = h.engine.create_wallet("u1", "ETH", None).unwrap();
        h.eth.failing_broadcasts.store(2, Ordering::SeqCst);

        let tx = h
            .engine
            .send_transaction("u1", send(&wallet, "0.25", Some("0.001")), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(tx.status, TxStatus::Confirming);
        assert!(tx.hash.as_deref().is_some_and(|h| !h.is_empty()));
        assert_eq!(tx.from_address, wallet.address);
        assert_eq!(h.eth.broadcasts.load(Ordering::SeqCst), 3);

        let ledger = h.engine.transaction_ledger("u1", &tx.id).unwrap();
        assert_eq!(ledger.len(), 2);
        let credit = ledger.iter().find(|e| e.entry_type == EntryType::Credit).unwrap();
        let debit = ledger.iter().find(|e| e.entry_type == EntryType::Debit).unwrap();
        assert_eq!(credit.amount, dec!(0.251));
        assert_eq!(debit.amount, dec!(0.25));
        assert_eq!(credit.currency, "ETH");
        // stored balance was never refreshed, so the snapshot goes negative
        assert_eq!(credit.balance_after, Some(dec!(-0.251)));

        // send does not touch the stored balance
        assert_eq!(h.engine.get_wallet("u1", &wallet.id).unwrap().balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn send_validation() {
        let h = harness();
        approve(&h, "u1");
        let wallet = h.engine.create_wallet("u1", "ETH", None).unwrap();
        let cancel = CancellationToken::new();

        let zero_fee = h.engine.send_transaction("u1", send(&wallet, "0.1", Some("0")), &cancel).await;
        assert!(zero_fee.is_ok());

        let negative = h.engine.send_transaction("u1", send(&wallet, "0.1", Some("-0.01")), &cancel).await;
        assert!(matches!(negative, Err(ServiceError::Validation { field: "fee", .. })));

        let mut wrong_chain = send(&wallet, "0.1", None);
        wrong_chain.chain = "SOL".into();
        let err = h.engine.send_transaction("u1", wrong_chain, &cancel).await.unwrap_err();
        assert!(matches!(err, ServiceError::ChainMismatch { .. }));

        let mut bad_address = send(&wallet, "0.1", None);
        bad_address.to_address = "nope".into();
        let err = h.engine.send_transaction("u1", bad_address, &cancel).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation { field: "toAddress", .. }));
    }

    #[tokio::test]
    async fn send_without_fee_uses_estimate() {
        let h = harness();
        approve(&h, "u1");
        let wallet = h.engine.create_wallet("u1", "ETH", None).unwrap();
        let tx = h
            .engine
            .send_transaction("u1", send(&wallet, "0.1", None), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(tx.fee, dec!(0.001));
        assert_eq!(tx.metadata["signed"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn daily_limit_is_enforced_when_rate_known() {
        let h = harness();
        approve(&h, "u1");
        let wallet = h.engine.create_wallet("u1", "ETH", None).unwrap();
        RateRepository::new(&h.dbs.rates)
            .upsert(&ExchangeRate {
                symbol: "ETH".into(),
                price_usd: dec!(2000),
                price_change_24h: Decimal::ZERO,
                volume_24h: Decimal::ZERO,
                market_cap: Decimal::ZERO,
                last_updated: Utc::now(),
            })
            .unwrap();
        let cancel = CancellationToken::new();

        // 0.2 ETH = 400 USD, under the 500 USD default
        h.engine.send_transaction("u1", send(&wallet, "0.2", Some("0")), &cancel).await.unwrap();
        let err = h
            .engine
            .send_transaction("u1", send(&wallet, "0.1", Some("0")), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::LimitExceeded(_)));
    }

    #[tokio::test]
    async fn huge_amount_fails_validation_when_rate_known() {
        let h = harness();
        approve(&h, "u1");
        let wallet = h.engine.create_wallet("u1", "ETH", None).unwrap();
        RateRepository::new(&h.dbs.rates)
            .upsert(&ExchangeRate {
                symbol: "ETH".into(),
                price_usd: dec!(2000),
                price_change_24h: Decimal::ZERO,
                volume_24h: Decimal::ZERO,
                market_cap: Decimal::ZERO,
                last_updated: Utc::now(),
            })
            .unwrap();

        let err = h
            .engine
            .send_transaction("u1", send(&wallet, "70000000000000000000000000000", Some("0")), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { field: "amount", .. }));
        assert_eq!(h.eth.broadcasts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn amount_plus_fee_out_of_range_is_rejected_before_broadcast() {
        let h = harness();
        approve(&h, "u1");
        let wallet = h.engine.create_wallet("u1", "ETH", None).unwrap();
        let huge = "70000000000000000000000000000";

        let err = h
            .engine
            .send_transaction("u1", send(&wallet, huge, Some(huge)), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { field: "amount", .. }));
        assert_eq!(h.eth.broadcasts.load(Ordering::SeqCst), 0);

        let (rows, _) = h.engine.list_transactions("u1", &wallet.id, &TxFilter::default(), None, 20).unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn archived_wallet_cannot_send() {
        let h = harness();
        approve(&h, "u1");
        let wallet = h.engine.create_wallet("u1", "ETH", None).unwrap();
        h.engine.archive_wallet("u1", &wallet.id).unwrap();
        let err = h
            .engine
            .send_transaction("u1", send(&wallet, "0.1", None), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::WalletInactive(_)));
    }

    #[tokio::test]
    async fn transaction_listing_is_cached_and_invalidated() {
        let h = harness();
        approve(&h, "u1");
        let wallet = h.engine.create_wallet("u1", "ETH", None).unwrap();
        let cancel = CancellationToken::new();
        let filter = TxFilter::default();

        let (empty, _) = h.engine.list_transactions("u1", &wallet.id, &filter, None, 20).unwrap();
        assert!(empty.is_empty());

        h.engine.send_transaction("u1", send(&wallet, "0.1", None), &cancel).await.unwrap();
        let (rows, _) = h.engine.list_transactions("u1", &wallet.id, &filter, None, 20).unwrap();
        assert_eq!(rows.len(), 1);

        assert!(matches!(
            h.engine.list_transactions("u2", &wallet.id, &filter, None, 20),
            Err(ServiceError::Forbidden(_))
        ));
    }
}
