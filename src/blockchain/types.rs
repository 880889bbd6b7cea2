// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chain-neutral types exchanged between the engines and the adapters.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use zeroize::Zeroizing;

use crate::retry::Retryable;

/// Supported blockchains.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Chain {
    Btc,
    Eth,
    Sol,
    Xlm,
}

impl Chain {
    pub const ALL: [Chain; 4] = [Chain::Btc, Chain::Eth, Chain::Sol, Chain::Xlm];

    /// Native asset ticker, also used as the ledger currency.
    pub fn symbol(&self) -> &'static str {
        match self {
            Chain::Btc => "BTC",
            Chain::Eth => "ETH",
            Chain::Sol => "SOL",
            Chain::Xlm => "XLM",
        }
    }

    /// Decimal places of the smallest on-chain unit.
    pub fn decimals(&self) -> u32 {
        match self {
            Chain::Btc => 8,
            Chain::Eth => 18,
            Chain::Sol => 9,
            Chain::Xlm => 7,
        }
    }

    /// Recorded derivation path label for generated keys.
    pub fn derivation_path(&self) -> &'static str {
        match self {
            Chain::Btc => "m/44'/0'/0'/0/0",
            Chain::Eth => "m/44'/60'/0'/0/0",
            Chain::Sol => "m/44'/501'/0'/0'",
            Chain::Xlm => "m/44'/148'/0'",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Parse error for [`Chain`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported chain: {0}")]
pub struct UnsupportedChain(pub String);

impl FromStr for Chain {
    type Err = UnsupportedChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BTC" => Ok(Chain::Btc),
            "ETH" => Ok(Chain::Eth),
            "SOL" => Ok(Chain::Sol),
            "XLM" => Ok(Chain::Xlm),
            _ => Err(UnsupportedChain(s.to_string())),
        }
    }
}

/// Mainnet or public test network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" | "devnet" | "sepolia" => Ok(Network::Testnet),
            other => Err(format!("unknown network `{other}`")),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => f.write_str("mainnet"),
            Network::Testnet => f.write_str("testnet"),
        }
    }
}

/// Fee tier requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Slow,
    #[default]
    Standard,
    Fast,
}

/// Freshly generated key material. The private key never leaves the
/// wallet engine unencrypted.
pub struct GeneratedWallet {
    pub chain: Chain,
    pub address: String,
    pub public_key: String,
    pub private_key: Zeroizing<String>,
    pub derivation_path: String,
}

impl fmt::Debug for GeneratedWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedWallet")
            .field("chain", &self.chain)
            .field("address", &self.address)
            .field("public_key", &self.public_key)
            .field("derivation_path", &self.derivation_path)
            .finish_non_exhaustive()
    }
}

/// Balance as reported by the chain. An empty `balance` means the provider
/// returned nothing usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub balance: String,
    pub confirmations: u64,
    pub last_updated: DateTime<Utc>,
}

/// Three-tier fee estimate in the chain's native unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FeeEstimate {
    pub chain: Chain,
    pub slow: Decimal,
    pub standard: Decimal,
    pub fast: Decimal,
}

impl FeeEstimate {
    pub fn for_priority(&self, priority: Priority) -> Decimal {
        match priority {
            Priority::Slow => self.slow,
            Priority::Standard => self.standard,
            Priority::Fast => self.fast,
        }
    }
}

/// Input to `create_transaction`.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub from: String,
    pub to: String,
    pub amount: Decimal,
    pub fee: Option<Decimal>,
    pub memo: Option<String>,
    pub priority: Priority,
}

/// Chain-opaque unsigned payload.
#[derive(Debug, Clone)]
pub struct UnsignedTransaction {
    pub chain: Chain,
    pub payload: Vec<u8>,
    pub hash_hint: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Chain-opaque signed payload, ready for broadcast.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub chain: Chain,
    pub payload: Vec<u8>,
    pub hash: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainTxStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatusReport {
    pub status: ChainTxStatus,
    pub confirmations: u64,
    pub block_number: Option<u64>,
    pub error: Option<String>,
}

impl TxStatusReport {
    pub fn pending(confirmations: u64) -> Self {
        Self {
            status: ChainTxStatus::Pending,
            confirmations,
            block_number: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NetworkInfo {
    pub chain: Chain,
    pub network: Network,
    pub chain_id: String,
    pub block_height: u64,
    pub confirmation_threshold: u64,
}

/// Adapter failures.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid private key")]
    InvalidKey,

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("malformed transaction payload: {0}")]
    MalformedPayload(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl Retryable for ChainError {
    fn is_retryable(&self) -> bool {
        matches!(self, ChainError::Rpc(_) | ChainError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_parses_case_insensitively() {
        assert_eq!("eth".parse::<Chain>().unwrap(), Chain::Eth);
        assert_eq!(" XLM ".parse::<Chain>().unwrap(), Chain::Xlm);
        assert!("DOGE".parse::<Chain>().is_err());
    }

    #[test]
    fn chain_serializes_as_ticker() {
        assert_eq!(serde_json::to_string(&Chain::Sol).unwrap(), "\"SOL\"");
        let parsed: Chain = serde_json::from_str("\"BTC\"").unwrap();
        assert_eq!(parsed, Chain::Btc);
    }

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(ChainError::Rpc("timeout".into()).is_retryable());
        assert!(ChainError::Transport("reset".into()).is_retryable());
        assert!(!ChainError::InvalidAddress("x".into()).is_retryable());
        assert!(!ChainError::Rejected("nonce too low".into()).is_retryable());
    }
}
