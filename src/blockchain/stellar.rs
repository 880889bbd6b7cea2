// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Stellar adapter over Horizon.
//!
//! Builds v1 transaction envelopes carrying one native `Payment` (or
//! `CreateAccount` when the destination does not exist yet), encoded as XDR
//! and signed with ed25519 over the network-bound signature base.

use std::str::FromStr;

use alloy::hex;
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::amounts::{from_base_units, to_base_units};
use super::http::HttpClient;
use super::keys::generate_ed25519;
use super::types::*;
use super::ChainAdapter;
use crate::config::ChainConfig;
use crate::crypto::base32;

const MAINNET_PASSPHRASE: &str = "Public Global Stellar Network ; September 2015";
const TESTNET_PASSPHRASE: &str = "Test SDF Network ; September 2015";

const VERSION_ACCOUNT_ID: u8 = 6 << 3;
const VERSION_SEED: u8 = 18 << 3;

const ENVELOPE_TYPE_TX: i32 = 2;
const KEY_TYPE_ED25519: i32 = 0;
const PRECOND_NONE: i32 = 0;
const MEMO_NONE: i32 = 0;
const MEMO_TEXT: i32 = 1;
const MEMO_TEXT_MAX: usize = 28;
const OP_CREATE_ACCOUNT: i32 = 0;
const OP_PAYMENT: i32 = 1;
const ASSET_TYPE_NATIVE: i32 = 0;
const BASE_FEE_STROOPS: u64 = 100;

/// CRC16-XModem (poly 0x1021, init 0).
fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= u16::from(*byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}

fn encode_strkey(version: u8, key: &[u8; 32]) -> String {
    let mut payload = Vec::with_capacity(35);
    payload.push(version);
    payload.extend_from_slice(key);
    let crc = crc16_xmodem(&payload);
    payload.extend_from_slice(&crc.to_le_bytes());
    base32::encode(&payload)
}

fn decode_strkey(version: u8, encoded: &str) -> Option<[u8; 32]> {
    if encoded.len() != 56 {
        return None;
    }
    let raw = Zeroizing::new(base32::decode(encoded)?);
    if raw.len() != 35 || raw[0] != version {
        return None;
    }
    let (body, checksum) = raw.split_at(33);
    if crc16_xmodem(body).to_le_bytes() != checksum {
        return None;
    }
    body[1..].try_into().ok()
}

/// Minimal big-endian XDR writer.
#[derive(Default)]
struct Xdr(Vec<u8>);

impl Xdr {
    fn int32(&mut self, v: i32) -> &mut Self {
        self.0.extend_from_slice(&v.to_be_bytes());
        self
    }

    fn uint32(&mut self, v: u32) -> &mut Self {
        self.0.extend_from_slice(&v.to_be_bytes());
        self
    }

    fn int64(&mut self, v: i64) -> &mut Self {
        self.0.extend_from_slice(&v.to_be_bytes());
        self
    }

    fn fixed(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.extend_from_slice(bytes);
        let pad = (4 - bytes.len() % 4) % 4;
        self.0.extend(std::iter::repeat(0).take(pad));
        self
    }

    fn var(&mut self, bytes: &[u8]) -> &mut Self {
        self.uint32(bytes.len() as u32);
        self.fixed(bytes)
    }

    fn ed25519_key(&mut self, key: &[u8; 32]) -> &mut Self {
        self.int32(KEY_TYPE_ED25519).fixed(key)
    }
}

#[derive(Debug, Deserialize)]
struct HorizonBalance {
    balance: String,
    asset_type: String,
}

#[derive(Debug, Deserialize)]
struct HorizonAccount {
    sequence: String,
    balances: Vec<HorizonBalance>,
}

#[derive(Debug, Deserialize)]
struct FeeCharged {
    p10: String,
    p50: String,
    p99: String,
}

#[derive(Debug, Deserialize)]
struct FeeStats {
    fee_charged: FeeCharged,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct HorizonTransaction {
    successful: bool,
    ledger: u64,
}

#[derive(Debug, Deserialize)]
struct HorizonRoot {
    history_latest_ledger: u64,
}

pub struct StellarAdapter {
    http: HttpClient,
    network: Network,
    network_id: [u8; 32],
    confirmations: u64,
}

impl StellarAdapter {
    pub fn new(config: &ChainConfig) -> Result<Self, ChainError> {
        let passphrase = match config.network {
            Network::Mainnet => MAINNET_PASSPHRASE,
            Network::Testnet => TESTNET_PASSPHRASE,
        };
        Ok(Self {
            http: HttpClient::new(&config.rpc_url)?,
            network: config.network,
            network_id: Sha256::digest(passphrase.as_bytes()).into(),
            confirmations: config.confirmations,
        })
    }

    fn passphrase(&self) -> &'static str {
        match self.network {
            Network::Mainnet => MAINNET_PASSPHRASE,
            Network::Testnet => TESTNET_PASSPHRASE,
        }
    }

    /// sha256(network id || ENVELOPE_TYPE_TX || tx)
    fn signature_base_hash(&self, tx: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.network_id);
        hasher.update(ENVELOPE_TYPE_TX.to_be_bytes());
        hasher.update(tx);
        hasher.finalize().into()
    }

    async fn account(&self, address: &str) -> Result<Option<HorizonAccount>, ChainError> {
        self.http.get_json(&format!("/accounts/{address}")).await
    }

    async fn latest_ledger(&self) -> Result<u64, ChainError> {
        let root: HorizonRoot = self
            .http
            .get_json("/")
            .await?
            .ok_or_else(|| ChainError::Rpc("horizon root not found".into()))?;
        Ok(root.history_latest_ledger)
    }

    /// Per-operation fee in stroops for (slow, standard, fast).
    async fn fee_tiers(&self) -> Result<[u64; 3], ChainError> {
        let stats: Option<FeeStats> = self.http.get_json("/fee_stats").await?;
        let parse = |raw: &str| raw.parse::<u64>().unwrap_or(BASE_FEE_STROOPS).max(BASE_FEE_STROOPS);
        Ok(match stats {
            Some(s) => [
                parse(&s.fee_charged.p10),
                parse(&s.fee_charged.p50),
                parse(&s.fee_charged.p99),
            ],
            None => [BASE_FEE_STROOPS; 3],
        })
    }
}

fn keypair_from_seed(seed: &str) -> Result<SigningKey, ChainError> {
    let secret = decode_strkey(VERSION_SEED, seed.trim()).ok_or(ChainError::InvalidKey)?;
    Ok(SigningKey::from_bytes(&secret))
}

#[async_trait]
impl ChainAdapter for StellarAdapter {
    fn chain(&self) -> Chain {
        Chain::Xlm
    }

    fn chain_id(&self) -> String {
        self.passphrase().to_string()
    }

    fn confirmation_threshold(&self) -> u64 {
        self.confirmations
    }

    fn generate_wallet(&self) -> Result<GeneratedWallet, ChainError> {
        let key = generate_ed25519();
        let address = encode_strkey(VERSION_ACCOUNT_ID, key.verifying_key().as_bytes());
        let secret = Zeroizing::new(key.to_bytes());
        Ok(GeneratedWallet {
            chain: Chain::Xlm,
            public_key: address.clone(),
            address,
            private_key: Zeroizing::new(encode_strkey(VERSION_SEED, &secret)),
            derivation_path: Chain::Xlm.derivation_path().to_string(),
        })
    }

    fn validate_address(&self, address: &str) -> bool {
        decode_strkey(VERSION_ACCOUNT_ID, address).is_some()
    }

    async fn get_balance(&self, address: &str) -> Result<BalanceInfo, ChainError> {
        if !self.validate_address(address) {
            return Err(ChainError::InvalidAddress(address.to_string()));
        }
        let balance = match self.account(address).await? {
            // unfunded accounts do not exist on the ledger
            None => "0".to_string(),
            Some(account) => match account.balances.iter().find(|b| b.asset_type == "native") {
                Some(native) => Decimal::from_str(&native.balance)
                    .map_err(|_| ChainError::Rpc(format!("bad balance `{}`", native.balance)))?
                    .normalize()
                    .to_string(),
                None => String::new(),
            },
        };
        Ok(BalanceInfo {
            balance,
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
        let tiers = self.fee_tiers().await?;
        let xlm = |stroops: u64| from_base_units(u128::from(stroops), Chain::Xlm.decimals());
        Ok(FeeEstimate {
            chain: Chain::Xlm,
            slow: xlm(tiers[0])?,
            standard: xlm(tiers[1])?,
            fast: xlm(tiers[2])?,
        })
    }

    async fn create_transaction(
        &self,
        request: &TransferRequest,
    ) -> Result<UnsignedTransaction, ChainError> {
        let source = decode_strkey(VERSION_ACCOUNT_ID, &request.from)
            .ok_or_else(|| ChainError::InvalidAddress(request.from.clone()))?;
        let destination = decode_strkey(VERSION_ACCOUNT_ID, &request.to)
            .ok_or_else(|| ChainError::InvalidAddress(request.to.clone()))?;
        let stroops = i64::try_from(to_base_units(request.amount, Chain::Xlm.decimals())?)
            .map_err(|_| ChainError::InvalidAmount(request.amount.to_string()))?;
        if stroops <= 0 {
            return Err(ChainError::InvalidAmount(request.amount.to_string()));
        }
        let memo = request.memo.as_deref().unwrap_or_default();
        if memo.len() > MEMO_TEXT_MAX {
            return Err(ChainError::MalformedPayload(format!(
                "memo exceeds {MEMO_TEXT_MAX} bytes"
            )));
        }

        let account = self.account(&request.from).await?.ok_or_else(|| {
            ChainError::InsufficientFunds(format!("source account {} is not funded", request.from))
        })?;
        let sequence: i64 = account
            .sequence
            .parse()
            .map_err(|_| ChainError::Rpc(format!("bad sequence `{}`", account.sequence)))?;

        let create_destination = self.account(&request.to).await?.is_none();
        if create_destination && request.amount < Decimal::ONE {
            return Err(ChainError::InvalidAmount(
                "destination does not exist; at least 1 XLM is required to create it".into(),
            ));
        }

        let fee = match request.fee {
            Some(fee) => u32::try_from(to_base_units(fee, Chain::Xlm.decimals())?)
                .map_err(|_| ChainError::InvalidAmount(fee.to_string()))?,
            None => {
                let tiers = self.fee_tiers().await?;
                let per_op = match request.priority {
                    Priority::Slow => tiers[0],
                    Priority::Standard => tiers[1],
                    Priority::Fast => tiers[2],
                };
                u32::try_from(per_op).unwrap_or(u32::MAX)
            }
        };

        let mut tx = Xdr::default();
        tx.ed25519_key(&source)
            .uint32(fee)
            .int64(sequence + 1)
            .int32(PRECOND_NONE);
        if memo.is_empty() {
            tx.int32(MEMO_NONE);
        } else {
            tx.int32(MEMO_TEXT).var(memo.as_bytes());
        }
        tx.uint32(1).uint32(0);
        if create_destination {
            tx.int32(OP_CREATE_ACCOUNT).ed25519_key(&destination).int64(stroops);
        } else {
            tx.int32(OP_PAYMENT)
                .ed25519_key(&destination)
                .int32(ASSET_TYPE_NATIVE)
                .int64(stroops);
        }
        tx.int32(0);

        let hash = self.signature_base_hash(&tx.0);
        let mut metadata = serde_json::Map::new();
        metadata.insert("sequence".into(), (sequence + 1).to_string().into());
        metadata.insert("fee_stroops".into(), fee.into());
        metadata.insert(
            "operation".into(),
            (if create_destination { "create_account" } else { "payment" }).into(),
        );

        Ok(UnsignedTransaction {
            chain: Chain::Xlm,
            payload: tx.0,
            hash_hint: Some(hex::encode(hash)),
            metadata,
        })
    }

    fn sign_transaction(
        &self,
        unsigned: &UnsignedTransaction,
        private_key: &str,
    ) -> Result<SignedTransaction, ChainError> {
        let key = keypair_from_seed(private_key)?;
        let public = key.verifying_key().to_bytes();
        let source = unsigned
            .payload
            .get(4..36)
            .ok_or_else(|| ChainError::MalformedPayload("transaction too short".into()))?;
        if source != public {
            return Err(ChainError::Signing("key does not match the source account".into()));
        }

        let hash = self.signature_base_hash(&unsigned.payload);
        let signature = key.sign(&hash).to_bytes();

        let mut envelope = Xdr::default();
        envelope.int32(ENVELOPE_TYPE_TX).fixed(&unsigned.payload).uint32(1);
        envelope.fixed(&public[28..]).var(&signature);

        Ok(SignedTransaction {
            chain: Chain::Xlm,
            payload: envelope.0,
            hash: Some(hex::encode(hash)),
            metadata: unsigned.metadata.clone(),
        })
    }

    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String, ChainError> {
        let envelope = Base64::encode_string(&signed.payload);
        let response: SubmitResponse = self
            .http
            .post_form("/transactions", &[("tx", envelope.as_str())])
            .await?;
        Ok(response.hash)
    }

    async fn get_transaction_status(&self, hash: &str) -> Result<TxStatusReport, ChainError> {
        let Some(tx) = self
            .http
            .get_json::<HorizonTransaction>(&format!("/transactions/{hash}"))
            .await?
        else {
            return Ok(TxStatusReport::pending(0));
        };
        if !tx.successful {
            return Ok(TxStatusReport {
                status: ChainTxStatus::Failed,
                confirmations: 0,
                block_number: Some(tx.ledger),
                error: Some("transaction failed on ledger".into()),
            });
        }
        let confirmations = self.latest_ledger().await?.saturating_sub(tx.ledger) + 1;
        if confirmations >= self.confirmations {
            Ok(TxStatusReport {
                status: ChainTxStatus::Confirmed,
                confirmations,
                block_number: Some(tx.ledger),
                error: None,
            })
        } else {
            Ok(TxStatusReport::pending(confirmations))
        }
    }

    async fn get_block_number(&self) -> Result<u64, ChainError> {
        self.latest_ledger().await
    }

    async fn get_network_info(&self) -> Result<NetworkInfo, ChainError> {
        Ok(NetworkInfo {
            chain: Chain::Xlm,
            network: self.network,
            chain_id: self.chain_id(),
            block_height: self.latest_ledger().await?,
            confirmation_threshold: self.confirmations,
        })
    }
}
