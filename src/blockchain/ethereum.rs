// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ethereum adapter backed by an alloy HTTP provider.
//!
//! Transfers are legacy (EIP-155) native-value transactions signed locally
//! with the wallet's secp256k1 key.

use std::str::FromStr;

use alloy::{
    consensus::{SignableTransaction, TxEnvelope, TxLegacy},
    eips::eip2718::Encodable2718,
    network::{Ethereum, ReceiptResponse, TxSignerSync},
    primitives::{keccak256, Address, Bytes, TxKind, B256, U256},
    providers::{
        fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller},
        Identity, Provider, ProviderBuilder, RootProvider,
    },
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::amounts::{from_base_units, parse_base_units, to_base_units};
use super::keys::{generate_secp256k1, secp256k1_from_pem};
use super::types::*;
use super::ChainAdapter;
use crate::config::ChainConfig;

/// HTTP provider type (with all fillers).
type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

const MAINNET_CHAIN_ID: u64 = 1;
const SEPOLIA_CHAIN_ID: u64 = 11_155_111;
const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Serialized unsigned transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EthUnsigned {
    chain_id: u64,
    nonce: u64,
    gas_price: String,
    gas_limit: u64,
    to: String,
    value: String,
}

pub struct EthereumAdapter {
    provider: HttpProvider,
    network: Network,
    chain_id: u64,
    confirmations: u64,
}

impl EthereumAdapter {
    pub fn new(config: &ChainConfig) -> Result<Self, ChainError> {
        let url: url::Url = config
            .rpc_url
            .parse()
            .map_err(|e: url::ParseError| ChainError::Transport(format!("invalid rpc url: {e}")))?;
        let provider = ProviderBuilder::new().connect_http(url);
        let chain_id = match config.network {
            Network::Mainnet => MAINNET_CHAIN_ID,
            Network::Testnet => SEPOLIA_CHAIN_ID,
        };
        Ok(Self {
            provider,
            network: config.network,
            chain_id,
            confirmations: config.confirmations,
        })
    }

    fn parse_address(address: &str) -> Result<Address, ChainError> {
        if !address.starts_with("0x") {
            return Err(ChainError::InvalidAddress(address.to_string()));
        }
        Address::from_str(address).map_err(|e| ChainError::InvalidAddress(e.to_string()))
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| ChainError::Rpc(format!("failed to get gas price: {e}")))
    }

    fn tiered_gas_prices(base: u128) -> [u128; 3] {
        [base * 9 / 10, base, base * 5 / 4]
    }
}

/// `0x` + EIP-55 checksummed last 20 bytes of keccak256(uncompressed pubkey).
fn address_from_key(key: &k256::ecdsa::SigningKey) -> String {
    let point = key.verifying_key().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..]).to_checksum(None)
}

#[async_trait]
impl ChainAdapter for EthereumAdapter {
    fn chain(&self) -> Chain {
        Chain::Eth
    }

    fn chain_id(&self) -> String {
        self.chain_id.to_string()
    }

    fn confirmation_threshold(&self) -> u64 {
        self.confirmations
    }

    fn generate_wallet(&self) -> Result<GeneratedWallet, ChainError> {
        let (signing_key, pem) = generate_secp256k1()?;
        let public_key = signing_key.verifying_key().to_encoded_point(true);
        Ok(GeneratedWallet {
            chain: Chain::Eth,
            address: address_from_key(&signing_key),
            public_key: format!("0x{}", alloy::hex::encode(public_key.as_bytes())),
            private_key: pem,
            derivation_path: Chain::Eth.derivation_path().to_string(),
        })
    }

    fn validate_address(&self, address: &str) -> bool {
        Self::parse_address(address).is_ok()
    }

    async fn get_balance(&self, address: &str) -> Result<BalanceInfo, ChainError> {
        let addr = Self::parse_address(address)?;
        let balance: U256 = self
            .provider
            .get_balance(addr)
            .await
            .map_err(|e| ChainError::Rpc(format!("failed to get balance: {e}")))?;
        let value = parse_base_units(&balance.to_string(), Chain::Eth.decimals())?;
        Ok(BalanceInfo {
            balance: value.to_string(),
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
        let base = self.gas_price().await?;
        let [slow, standard, fast] = Self::tiered_gas_prices(base);
        let gas = u128::from(TRANSFER_GAS_LIMIT);
        Ok(FeeEstimate {
            chain: Chain::Eth,
            slow: from_base_units(slow * gas, Chain::Eth.decimals())?,
            standard: from_base_units(standard * gas, Chain::Eth.decimals())?,
            fast: from_base_units(fast * gas, Chain::Eth.decimals())?,
        })
    }

    async fn create_transaction(
        &self,
        request: &TransferRequest,
    ) -> Result<UnsignedTransaction, ChainError> {
        let from = Self::parse_address(&request.from)?;
        let to = Self::parse_address(&request.to)?;
        let value = to_base_units(request.amount, Chain::Eth.decimals())?;

        let gas_price = match request.fee {
            Some(fee) => to_base_units(fee, Chain::Eth.decimals())? / u128::from(TRANSFER_GAS_LIMIT),
            None => {
                let [slow, standard, fast] = Self::tiered_gas_prices(self.gas_price().await?);
                match request.priority {
                    Priority::Slow => slow,
                    Priority::Standard => standard,
                    Priority::Fast => fast,
                }
            }
        };

        let nonce = self
            .provider
            .get_transaction_count(from)
            .await
            .map_err(|e| ChainError::Rpc(format!("failed to get nonce: {e}")))?;

        let unsigned = EthUnsigned {
            chain_id: self.chain_id,
            nonce,
            gas_price: gas_price.to_string(),
            gas_limit: TRANSFER_GAS_LIMIT,
            to: to.to_checksum(None),
            value: value.to_string(),
        };

        let mut metadata = serde_json::Map::new();
        metadata.insert("nonce".into(), nonce.into());
        metadata.insert("gas_price_wei".into(), unsigned.gas_price.clone().into());
        metadata.insert("gas_limit".into(), TRANSFER_GAS_LIMIT.into());
        metadata.insert("chain_id".into(), self.chain_id.into());

        Ok(UnsignedTransaction {
            chain: Chain::Eth,
            payload: serde_json::to_vec(&unsigned)
                .map_err(|e| ChainError::MalformedPayload(e.to_string()))?,
            hash_hint: None,
            metadata,
        })
    }

    fn sign_transaction(
        &self,
        unsigned: &UnsignedTransaction,
        private_key: &str,
    ) -> Result<SignedTransaction, ChainError> {
        let parsed: EthUnsigned = serde_json::from_slice(&unsigned.payload)
            .map_err(|e| ChainError::MalformedPayload(e.to_string()))?;

        let secret = Zeroizing::new(secp256k1_from_pem(private_key)?.to_bytes());
        let signer =
            PrivateKeySigner::from_slice(secret.as_slice()).map_err(|_| ChainError::InvalidKey)?;

        let gas_price = u128::from_str(&parsed.gas_price)
            .map_err(|e| ChainError::MalformedPayload(format!("gas price: {e}")))?;
        let value = U256::from_str(&parsed.value)
            .map_err(|e| ChainError::MalformedPayload(format!("value: {e}")))?;

        let mut tx = TxLegacy {
            chain_id: Some(parsed.chain_id),
            nonce: parsed.nonce,
            gas_price,
            gas_limit: parsed.gas_limit,
            to: TxKind::Call(Self::parse_address(&parsed.to)?),
            value,
            input: Bytes::new(),
        };

        let signature = signer
            .sign_transaction_sync(&mut tx)
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        let signed = tx.into_signed(signature);
        let hash: B256 = *signed.hash();
        let envelope = TxEnvelope::Legacy(signed);

        Ok(SignedTransaction {
            chain: Chain::Eth,
            payload: envelope.encoded_2718(),
            hash: Some(format!("{hash:#x}")),
            metadata: unsigned.metadata.clone(),
        })
    }

    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String, ChainError> {
        let pending = self
            .provider
            .send_raw_transaction(&signed.payload)
            .await
            .map_err(|e| ChainError::Rejected(format!("failed to broadcast: {e}")))?;
        Ok(format!("{:#x}", pending.tx_hash()))
    }

    async fn get_transaction_status(&self, hash: &str) -> Result<TxStatusReport, ChainError> {
        let tx_hash = B256::from_str(hash)
            .map_err(|e| ChainError::InvalidAddress(format!("invalid tx hash: {e}")))?;

        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| ChainError::Rpc(format!("failed to get receipt: {e}")))?;

        let Some(receipt) = receipt else {
            return Ok(TxStatusReport::pending(0));
        };

        let block_number = ReceiptResponse::block_number(&receipt);
        let confirmations = match block_number {
            Some(mined) => {
                let head = self.get_block_number().await?;
                head.saturating_sub(mined) + 1
            }
            None => 0,
        };

        if !ReceiptResponse::status(&receipt) {
            return Ok(TxStatusReport {
                status: ChainTxStatus::Failed,
                confirmations,
                block_number,
                error: Some("execution reverted".to_string()),
            });
        }

        Ok(TxStatusReport {
            status: if block_number.is_some() {
                ChainTxStatus::Confirmed
            } else {
                ChainTxStatus::Pending
            },
            confirmations,
            block_number,
            error: None,
        })
    }

    async fn get_block_number(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::Rpc(format!("failed to get block number: {e}")))
    }

    async fn get_network_info(&self) -> Result<NetworkInfo, ChainError> {
        Ok(NetworkInfo {
            chain: Chain::Eth,
            network: self.network,
            chain_id: self.chain_id(),
            block_height: self.get_block_number().await?,
            confirmation_threshold: self.confirmations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> EthereumAdapter {
        EthereumAdapter::new(&ChainConfig {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            confirmations: 12,
            network: Network::Testnet,
        })
        .unwrap()
    }

    #[test]
    fn generates_checksummed_address() {
        let eth = adapter();
        let a = eth.generate_wallet().unwrap();
        let b = eth.generate_wallet().unwrap();

        assert!(a.address.starts_with("0x"));
        assert_eq!(a.address.len(), 42);
        assert!(eth.validate_address(&a.address));
        assert_ne!(a.address, b.address);
        assert!(a.private_key.contains("PRIVATE KEY"));
    }

    #[test]
    fn validates_addresses() {
        let eth = adapter();
        assert!(eth.validate_address("0x742d35Cc6634C0532925a3b844Bc9e7595f4aB12"));
        assert!(!eth.validate_address("742d35Cc6634C0532925a3b844Bc9e7595f4aB12"));
        assert!(!eth.validate_address("0x1234"));
        assert!(!eth.validate_address(""));
    }

    #[test]
    fn signs_legacy_transfer() {
        let eth = adapter();
        let wallet = eth.generate_wallet().unwrap();
        let payload = EthUnsigned {
            chain_id: SEPOLIA_CHAIN_ID,
            nonce: 0,
            gas_price: "1000000000".to_string(),
            gas_limit: TRANSFER_GAS_LIMIT,
            to: "0x742d35Cc6634C0532925a3b844Bc9e7595f4aB12".to_string(),
            value: "250000000000000000".to_string(),
        };
        let unsigned = UnsignedTransaction {
            chain: Chain::Eth,
            payload: serde_json::to_vec(&payload).unwrap(),
            hash_hint: None,
            metadata: serde_json::Map::new(),
        };

        let signed = eth.sign_transaction(&unsigned, &wallet.private_key).unwrap();
        let hash = signed.hash.unwrap();
        assert!(hash.starts_with("0x"));
        assert_eq!(hash.len(), 66);
        assert!(!signed.payload.is_empty());
    }

    #[test]
    fn signing_with_wrong_key_format_fails() {
        let eth = adapter();
        let unsigned = UnsignedTransaction {
            chain: Chain::Eth,
            payload: b"{}".to_vec(),
            hash_hint: None,
            metadata: serde_json::Map::new(),
        };
        assert!(eth.sign_transaction(&unsigned, "nope").is_err());
    }
}
