// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chain adapters.
//!
//! Every supported chain implements [`ChainAdapter`]; the engines only see
//! the trait and look adapters up by [`Chain`] in an [`AdapterRegistry`]
//! that is built once at startup and never mutated afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

pub mod amounts;
pub mod bitcoin;
pub mod ethereum;
pub mod http;
pub mod keys;
#[cfg(test)]
pub(crate) mod mock;
pub mod solana;
pub mod stellar;
pub mod types;

pub use types::*;

use crate::config::ChainConfig;

/// Uniform capability set of a chain.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain(&self) -> Chain;

    /// Network identifier (EVM chain id, genesis label, passphrase...).
    fn chain_id(&self) -> String;

    /// Confirmations after which a transaction is considered final.
    fn confirmation_threshold(&self) -> u64;

    fn generate_wallet(&self) -> Result<GeneratedWallet, ChainError>;

    fn validate_address(&self, address: &str) -> bool;

    async fn get_balance(&self, address: &str) -> Result<BalanceInfo, ChainError>;

    async fn estimate_fee(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
        priority: Priority,
    ) -> Result<FeeEstimate, ChainError>;

    async fn create_transaction(
        &self,
        request: &TransferRequest,
    ) -> Result<UnsignedTransaction, ChainError>;

    fn sign_transaction(
        &self,
        unsigned: &UnsignedTransaction,
        private_key: &str,
    ) -> Result<SignedTransaction, ChainError>;

    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String, ChainError>;

    async fn get_transaction_status(&self, hash: &str) -> Result<TxStatusReport, ChainError>;

    async fn get_block_number(&self) -> Result<u64, ChainError>;

    async fn get_network_info(&self) -> Result<NetworkInfo, ChainError>;
}

/// Chain → adapter map.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Chain, Arc<dyn ChainAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the four production adapters from per-chain configuration.
    pub fn from_config(configs: &HashMap<Chain, ChainConfig>) -> Result<Self, ChainError> {
        let mut registry = Self::new();
        for (chain, config) in configs {
            let adapter: Arc<dyn ChainAdapter> = match chain {
                Chain::Btc => Arc::new(bitcoin::BitcoinAdapter::new(config)?),
                Chain::Eth => Arc::new(ethereum::EthereumAdapter::new(config)?),
                Chain::Sol => Arc::new(solana::SolanaAdapter::new(config)?),
                Chain::Xlm => Arc::new(stellar::StellarAdapter::new(config)?),
            };
            registry.register(adapter);
        }
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>) {
        self.adapters.insert(adapter.chain(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn ChainAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, chain: Chain) -> Option<Arc<dyn ChainAdapter>> {
        self.adapters.get(&chain).cloned()
    }

    /// Registered chains in a stable order.
    pub fn chains(&self) -> Vec<Chain> {
        let mut chains: Vec<Chain> = self.adapters.keys().copied().collect();
        chains.sort();
        chains
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("chains", &self.chains())
            .finish()
    }
}
