// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Solana adapter over JSON-RPC.
//!
//! Transfers are single System Program `Transfer` instructions in a legacy
//! message. Keys are stored as base58 of the 64-byte keypair
//! (secret || public), the format used by the Solana CLI.

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use zeroize::Zeroizing;

use super::amounts::{from_base_units, to_base_units};
use super::http::HttpClient;
use super::keys::generate_ed25519;
use super::types::*;
use super::ChainAdapter;
use crate::config::ChainConfig;

const LAMPORTS_PER_SIGNATURE: u128 = 5_000;
const SYSTEM_PROGRAM_ID: [u8; 32] = [0u8; 32];
const SYSTEM_TRANSFER_INSTRUCTION: u32 = 2;

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct LatestBlockhash {
    blockhash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    slot: u64,
    confirmations: Option<u64>,
    err: Option<Value>,
    confirmation_status: Option<String>,
}

pub struct SolanaAdapter {
    http: HttpClient,
    network: Network,
    confirmations: u64,
}

fn decode_pubkey(address: &str) -> Option<[u8; 32]> {
    let bytes = bs58::decode(address).into_vec().ok()?;
    bytes.try_into().ok()
}

fn write_compact_u16(buf: &mut Vec<u8>, mut value: u16) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        byte |= 0x80;
        buf.push(byte);
    }
}

/// Legacy message carrying one System Program transfer.
fn transfer_message(from: &[u8; 32], to: &[u8; 32], blockhash: &[u8; 32], lamports: u64) -> Vec<u8> {
    let mut msg = Vec::with_capacity(150);
    // 1 signer, 0 readonly signed, 1 readonly unsigned (the program)
    msg.extend_from_slice(&[1, 0, 1]);
    write_compact_u16(&mut msg, 3);
    msg.extend_from_slice(from);
    msg.extend_from_slice(to);
    msg.extend_from_slice(&SYSTEM_PROGRAM_ID);
    msg.extend_from_slice(blockhash);

    write_compact_u16(&mut msg, 1);
    msg.push(2);
    write_compact_u16(&mut msg, 2);
    msg.extend_from_slice(&[0, 1]);
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&SYSTEM_TRANSFER_INSTRUCTION.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());
    write_compact_u16(&mut msg, data.len() as u16);
    msg.extend_from_slice(&data);
    msg
}

fn keypair_from_base58(secret: &str) -> Result<SigningKey, ChainError> {
    let bytes = Zeroizing::new(
        bs58::decode(secret.trim())
            .into_vec()
            .map_err(|_| ChainError::InvalidKey)?,
    );
    let keypair: &[u8; 64] = bytes.as_slice().try_into().map_err(|_| ChainError::InvalidKey)?;
    SigningKey::from_keypair_bytes(keypair).map_err(|_| ChainError::InvalidKey)
}

impl SolanaAdapter {
    pub fn new(config: &ChainConfig) -> Result<Self, ChainError> {
        Ok(Self {
            http: HttpClient::new(&config.rpc_url)?,
            network: config.network,
            confirmations: config.confirmations,
        })
    }

    async fn slot(&self) -> Result<u64, ChainError> {
        self.http
            .rpc("getSlot", json!([{"commitment": "confirmed"}]))
            .await
    }
}

#[async_trait]
impl ChainAdapter for SolanaAdapter {
    fn chain(&self) -> Chain {
        Chain::Sol
    }

    fn chain_id(&self) -> String {
        match self.network {
            Network::Mainnet => "mainnet-beta".to_string(),
            Network::Testnet => "devnet".to_string(),
        }
    }

    fn confirmation_threshold(&self) -> u64 {
        self.confirmations
    }

    fn generate_wallet(&self) -> Result<GeneratedWallet, ChainError> {
        let key = generate_ed25519();
        let keypair = Zeroizing::new(key.to_keypair_bytes());
        let address = bs58::encode(key.verifying_key().as_bytes()).into_string();
        Ok(GeneratedWallet {
            chain: Chain::Sol,
            public_key: address.clone(),
            address,
            private_key: Zeroizing::new(bs58::encode(keypair.as_slice()).into_string()),
            derivation_path: Chain::Sol.derivation_path().to_string(),
        })
    }

    fn validate_address(&self, address: &str) -> bool {
        decode_pubkey(address).is_some()
    }

    async fn get_balance(&self, address: &str) -> Result<BalanceInfo, ChainError> {
        if !self.validate_address(address) {
            return Err(ChainError::InvalidAddress(address.to_string()));
        }
        let lamports: WithContext<Option<u64>> = self
            .http
            .rpc("getBalance", json!([address, {"commitment": "confirmed"}]))
            .await?;
        let balance = match lamports.value {
            Some(l) => from_base_units(u128::from(l), Chain::Sol.decimals())?.to_string(),
            None => String::new(),
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
        let fee = from_base_units(LAMPORTS_PER_SIGNATURE, Chain::Sol.decimals())?;
        Ok(FeeEstimate {
            chain: Chain::Sol,
            slow: fee,
            standard: fee,
            fast: fee,
        })
    }

    async fn create_transaction(
        &self,
        request: &TransferRequest,
    ) -> Result<UnsignedTransaction, ChainError> {
        let from = decode_pubkey(&request.from)
            .ok_or_else(|| ChainError::InvalidAddress(request.from.clone()))?;
        let to = decode_pubkey(&request.to)
            .ok_or_else(|| ChainError::InvalidAddress(request.to.clone()))?;
        if from == to {
            return Err(ChainError::InvalidAddress("source and destination are identical".into()));
        }
        let lamports = u64::try_from(to_base_units(request.amount, Chain::Sol.decimals())?)
            .map_err(|_| ChainError::InvalidAmount(request.amount.to_string()))?;
        if lamports == 0 {
            return Err(ChainError::InvalidAmount(request.amount.to_string()));
        }

        let latest: WithContext<LatestBlockhash> = self
            .http
            .rpc("getLatestBlockhash", json!([{"commitment": "finalized"}]))
            .await?;
        let blockhash: [u8; 32] = bs58::decode(&latest.value.blockhash)
            .into_vec()
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| ChainError::Rpc("malformed blockhash".into()))?;

        let mut metadata = serde_json::Map::new();
        metadata.insert("lamports".into(), lamports.into());
        metadata.insert("recent_blockhash".into(), latest.value.blockhash.into());
        if let Some(memo) = &request.memo {
            metadata.insert("memo".into(), memo.clone().into());
        }

        Ok(UnsignedTransaction {
            chain: Chain::Sol,
            payload: transfer_message(&from, &to, &blockhash, lamports),
            hash_hint: None,
            metadata,
        })
    }

    fn sign_transaction(
        &self,
        unsigned: &UnsignedTransaction,
        private_key: &str,
    ) -> Result<SignedTransaction, ChainError> {
        let key = keypair_from_base58(private_key)?;
        let message = &unsigned.payload;
        // header (3) + account count (1) then the fee payer
        let payer = message
            .get(4..36)
            .ok_or_else(|| ChainError::MalformedPayload("message too short".into()))?;
        if payer != key.verifying_key().as_bytes() {
            return Err(ChainError::Signing("key does not match the fee payer".into()));
        }

        let signature = key.sign(message).to_bytes();
        let mut wire = Vec::with_capacity(1 + 64 + message.len());
        write_compact_u16(&mut wire, 1);
        wire.extend_from_slice(&signature);
        wire.extend_from_slice(message);

        Ok(SignedTransaction {
            chain: Chain::Sol,
            payload: wire,
            hash: Some(bs58::encode(signature).into_string()),
            metadata: unsigned.metadata.clone(),
        })
    }

    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String, ChainError> {
        self.http
            .rpc(
                "sendTransaction",
                json!([Base64::encode_string(&signed.payload), {"encoding": "base64"}]),
            )
            .await
    }

    async fn get_transaction_status(&self, hash: &str) -> Result<TxStatusReport, ChainError> {
        let statuses: WithContext<Vec<Option<SignatureStatus>>> = self
            .http
            .rpc(
                "getSignatureStatuses",
                json!([[hash], {"searchTransactionHistory": true}]),
            )
            .await?;
        let Some(Some(status)) = statuses.value.into_iter().next() else {
            return Ok(TxStatusReport::pending(0));
        };

        if let Some(err) = status.err {
            return Ok(TxStatusReport {
                status: ChainTxStatus::Failed,
                confirmations: 0,
                block_number: Some(status.slot),
                error: Some(err.to_string()),
            });
        }

        let confirmations = match status.confirmations {
            Some(c) => c,
            // null confirmations means the slot is rooted
            None => self.slot().await?.saturating_sub(status.slot) + 1,
        };
        let finalized = status.confirmation_status.as_deref() == Some("finalized");
        if finalized || confirmations >= self.confirmations {
            Ok(TxStatusReport {
                status: ChainTxStatus::Confirmed,
                confirmations: confirmations.max(self.confirmations),
                block_number: Some(status.slot),
                error: None,
            })
        } else {
            Ok(TxStatusReport::pending(confirmations))
        }
    }

    async fn get_block_number(&self) -> Result<u64, ChainError> {
        self.slot().await
    }

    async fn get_network_info(&self) -> Result<NetworkInfo, ChainError> {
        Ok(NetworkInfo {
            chain: Chain::Sol,
            network: self.network,
            chain_id: self.chain_id(),
            block_height: self.slot().await?,
            confirmation_threshold: self.confirmations,
        })
    }
}
