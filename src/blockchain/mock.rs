// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory adapter for engine tests.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use zeroize::Zeroizing;

use super::*;

pub struct MockAdapter {
    chain: Chain,
    threshold: u64,
    counter: AtomicU64,
    pub balance: Mutex<String>,
    pub status: Mutex<TxStatusReport>,
    /// Broadcast attempts that fail with a retryable error before succeeding
    pub failing_broadcasts: AtomicU32,
    pub broadcasts: AtomicU32,
}

impl MockAdapter {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            threshold: 3,
            counter: AtomicU64::new(0),
            balance: Mutex::new("0".into()),
            status: Mutex::new(TxStatusReport::pending(0)),
            failing_broadcasts: AtomicU32::new(0),
            broadcasts: AtomicU32::new(0),
        }
    }

    pub fn set_balance(&self, balance: &str) {
        *self.balance.lock().unwrap() = balance.to_string();
    }

    pub fn set_status(&self, report: TxStatusReport) {
        *self.status.lock().unwrap() = report;
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl ChainAdapter for MockAdapter {
    fn chain(&self) -> Chain {
        self.chain
    }

    fn chain_id(&self) -> String {
        format!("mock-{}", self.chain)
    }

    fn confirmation_threshold(&self) -> u64 {
        self.threshold
    }

    fn generate_wallet(&self) -> Result<GeneratedWallet, ChainError> {
        let n = self.next();
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let address = match self.chain {
            Chain::Eth => format!("0x{:0>8x}{}", n, &nonce[..32]),
            other => format!("{other}-{n}-{nonce}"),
        };
        Ok(GeneratedWallet {
            chain: self.chain,
            address,
            public_key: format!("pub-{n}"),
            private_key: Zeroizing::new(format!("secret-{n}")),
            derivation_path: self.chain.derivation_path().to_string(),
        })
    }

    fn validate_address(&self, address: &str) -> bool {
        let ok = !address.is_empty() && !address.contains(char::is_whitespace);
        match self.chain {
            Chain::Eth => ok && address.starts_with("0x"),
            _ => ok,
        }
    }

    async fn get_balance(&self, _address: &str) -> Result<BalanceInfo, ChainError> {
        Ok(BalanceInfo {
            balance: self.balance.lock().unwrap().clone(),
            confirmations: 0,
            last_updated: Utc::now(),
        })
    }

    async fn estimate_fee(
        &self,
        _from: &str,
        _to: &str,
        _amount: Decimal,
        _priority: Priority,
    ) -> Result<FeeEstimate, ChainError> {
        Ok(FeeEstimate {
            chain: self.chain,
            slow: dec!(0.0005),
            standard: dec!(0.001),
            fast: dec!(0.002),
        })
    }

    async fn create_transaction(
        &self,
        request: &TransferRequest,
    ) -> Result<UnsignedTransaction, ChainError> {
        let mut metadata = serde_json::Map::new();
        metadata.insert("mock_nonce".into(), self.next().into());
        Ok(UnsignedTransaction {
            chain: self.chain,
            payload: format!("{}->{}:{}", request.from, request.to, request.amount).into_bytes(),
            hash_hint: None,
            metadata,
        })
    }

    fn sign_transaction(
        &self,
        unsigned: &UnsignedTransaction,
        private_key: &str,
    ) -> Result<SignedTransaction, ChainError> {
        if !private_key.starts_with("secret-") {
            return Err(ChainError::InvalidKey);
        }
        let mut metadata = unsigned.metadata.clone();
        metadata.insert("signed".into(), true.into());
        Ok(SignedTransaction {
            chain: self.chain,
            payload: unsigned.payload.clone(),
            hash: None,
            metadata,
        })
    }

    async fn broadcast_transaction(&self, _signed: &SignedTransaction) -> Result<String, ChainError> {
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_broadcasts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_broadcasts.store(remaining - 1, Ordering::SeqCst);
            return Err(ChainError::Rpc("node unavailable".into()));
        }
        Ok(format!("0xhash{}", uuid::Uuid::new_v4().simple()))
    }

    async fn get_transaction_status(&self, _hash: &str) -> Result<TxStatusReport, ChainError> {
        Ok(self.status.lock().unwrap().clone())
    }

    async fn get_block_number(&self) -> Result<u64, ChainError> {
        Ok(100)
    }

    async fn get_network_info(&self) -> Result<NetworkInfo, ChainError> {
        Ok(NetworkInfo {
            chain: self.chain,
            network: Network::Testnet,
            chain_id: self.chain_id(),
            block_height: 100,
            confirmation_threshold: self.threshold,
        })
    }
}
