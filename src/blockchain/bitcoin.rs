// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bitcoin adapter over an Esplora REST endpoint.
//!
//! Wallets are legacy P2PKH (compressed key). Transfers spend the wallet's
//! UTXOs largest-first, add a change output back to the sender when it is
//! above dust, and sign each input with SIGHASH_ALL.

use std::collections::HashMap;
use std::str::FromStr;

use alloy::hex;
use async_trait::async_trait;
use chrono::Utc;
use k256::ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey};
use ripemd::Ripemd160;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::amounts::{from_base_units, to_base_units};
use super::http::HttpClient;
use super::keys::{generate_secp256k1, secp256k1_from_pem};
use super::types::*;
use super::ChainAdapter;
use crate::config::ChainConfig;

const DUST_LIMIT_SATS: u64 = 546;
const SIGHASH_ALL: u32 = 1;
const TX_OVERHEAD_VBYTES: u64 = 10;
const P2PKH_INPUT_VBYTES: u64 = 148;
const OUTPUT_VBYTES: u64 = 34;

#[derive(Debug, Clone, Copy)]
struct AddressVersions {
    p2pkh: u8,
    p2sh: u8,
}

const MAINNET_VERSIONS: AddressVersions = AddressVersions { p2pkh: 0x00, p2sh: 0x05 };
const TESTNET_VERSIONS: AddressVersions = AddressVersions { p2pkh: 0x6f, p2sh: 0xc4 };

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Utxo {
    txid: String,
    vout: u32,
    value: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BtcOutput {
    script_hex: String,
    value: u64,
}

/// Serialized unsigned spend.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BtcUnsigned {
    from: String,
    inputs: Vec<Utxo>,
    outputs: Vec<BtcOutput>,
    fee_sats: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraStats {
    funded_txo_sum: u64,
    spent_txo_sum: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraAddress {
    chain_stats: EsploraStats,
}

#[derive(Debug, Deserialize)]
struct EsploraTxStatus {
    confirmed: bool,
    #[serde(default)]
    block_height: Option<u64>,
}

pub struct BitcoinAdapter {
    http: HttpClient,
    network: Network,
    versions: AddressVersions,
    confirmations: u64,
}

fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

fn p2pkh_script(pubkey_hash: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xa9, 0x14]);
    script.extend_from_slice(pubkey_hash);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

fn p2sh_script(script_hash: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(23);
    script.extend_from_slice(&[0xa9, 0x14]);
    script.extend_from_slice(script_hash);
    script.push(0x87);
    script
}

fn write_varint(buf: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => buf.push(n as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&n.to_le_bytes());
        }
    }
}

fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    // Signatures and compressed keys are always below OP_PUSHDATA1.
    script.push(data.len() as u8);
    script.extend_from_slice(data);
}

/// Legacy serialization with one script per input.
fn serialize_tx(
    inputs: &[Utxo],
    scripts: &[Vec<u8>],
    outputs: &[(u64, Vec<u8>)],
) -> Result<Vec<u8>, ChainError> {
    let mut buf = Vec::with_capacity(10 + inputs.len() * 150 + outputs.len() * 34);
    buf.extend_from_slice(&1u32.to_le_bytes());
    write_varint(&mut buf, inputs.len() as u64);
    for (input, script) in inputs.iter().zip(scripts) {
        let mut txid = hex::decode(&input.txid)
            .map_err(|e| ChainError::MalformedPayload(format!("txid: {e}")))?;
        if txid.len() != 32 {
            return Err(ChainError::MalformedPayload("txid must be 32 bytes".into()));
        }
        txid.reverse();
        buf.extend_from_slice(&txid);
        buf.extend_from_slice(&input.vout.to_le_bytes());
        write_varint(&mut buf, script.len() as u64);
        buf.extend_from_slice(script);
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
    }
    write_varint(&mut buf, outputs.len() as u64);
    for (value, script) in outputs {
        buf.extend_from_slice(&value.to_le_bytes());
        write_varint(&mut buf, script.len() as u64);
        buf.extend_from_slice(script);
    }
    buf.extend_from_slice(&0u32.to_le_bytes());
    Ok(buf)
}

fn estimate_vbytes(inputs: usize, outputs: usize) -> u64 {
    TX_OVERHEAD_VBYTES + P2PKH_INPUT_VBYTES * inputs as u64 + OUTPUT_VBYTES * outputs as u64
}

impl BitcoinAdapter {
    pub fn new(config: &ChainConfig) -> Result<Self, ChainError> {
        Ok(Self {
            http: HttpClient::new(&config.rpc_url)?,
            network: config.network,
            versions: match config.network {
                Network::Mainnet => MAINNET_VERSIONS,
                Network::Testnet => TESTNET_VERSIONS,
            },
            confirmations: config.confirmations,
        })
    }

    fn encode_address(&self, pubkey_hash: &[u8; 20]) -> String {
        let mut payload = Vec::with_capacity(21);
        payload.push(self.versions.p2pkh);
        payload.extend_from_slice(pubkey_hash);
        bs58::encode(payload).with_check().into_string()
    }

    /// Output script for a base58check destination.
    fn script_for(&self, address: &str) -> Result<Vec<u8>, ChainError> {
        let payload = bs58::decode(address)
            .with_check(None)
            .into_vec()
            .map_err(|_| ChainError::InvalidAddress(address.to_string()))?;
        if payload.len() != 21 {
            return Err(ChainError::InvalidAddress(address.to_string()));
        }
        match payload[0] {
            v if v == self.versions.p2pkh => Ok(p2pkh_script(&payload[1..])),
            v if v == self.versions.p2sh => Ok(p2sh_script(&payload[1..])),
            _ => Err(ChainError::InvalidAddress(address.to_string())),
        }
    }

    /// sat/vB for (slow, standard, fast) confirmation targets.
    async fn fee_rates(&self) -> Result<[u64; 3], ChainError> {
        let estimates: HashMap<String, serde_json::Number> = self
            .http
            .get_json("/fee-estimates")
            .await?
            .unwrap_or_default();
        let rate = |target: &str| -> u64 {
            estimates
                .get(target)
                .and_then(|n| Decimal::from_str(&n.to_string()).ok())
                .and_then(|d| d.ceil().to_u64())
                .unwrap_or(1)
                .max(1)
        };
        Ok([rate("144"), rate("6"), rate("2")])
    }

    async fn tip_height(&self) -> Result<u64, ChainError> {
        let text = self.http.get_text("/blocks/tip/height").await?;
        text.trim()
            .parse()
            .map_err(|_| ChainError::Rpc(format!("unexpected tip height `{text}`")))
    }
}

#[async_trait]
impl ChainAdapter for BitcoinAdapter {
    fn chain(&self) -> Chain {
        Chain::Btc
    }

    fn chain_id(&self) -> String {
        match self.network {
            Network::Mainnet => "bitcoin".to_string(),
            Network::Testnet => "testnet".to_string(),
        }
    }

    fn confirmation_threshold(&self) -> u64 {
        self.confirmations
    }

    fn generate_wallet(&self) -> Result<GeneratedWallet, ChainError> {
        let (signing_key, pem) = generate_secp256k1()?;
        let public_key = signing_key.verifying_key().to_encoded_point(true);
        Ok(GeneratedWallet {
            chain: Chain::Btc,
            address: self.encode_address(&hash160(public_key.as_bytes())),
            public_key: hex::encode(public_key.as_bytes()),
            private_key: pem,
            derivation_path: Chain::Btc.derivation_path().to_string(),
        })
    }

    fn validate_address(&self, address: &str) -> bool {
        self.script_for(address).is_ok()
    }

    async fn get_balance(&self, address: &str) -> Result<BalanceInfo, ChainError> {
        if !self.validate_address(address) {
            return Err(ChainError::InvalidAddress(address.to_string()));
        }
        let info: Option<EsploraAddress> = self.http.get_json(&format!("/address/{address}")).await?;
        let balance = match info {
            Some(info) => {
                let sats = info
                    .chain_stats
                    .funded_txo_sum
                    .saturating_sub(info.chain_stats.spent_txo_sum);
                from_base_units(u128::from(sats), Chain::Btc.decimals())?.to_string()
            }
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
        let rates = self.fee_rates().await?;
        let size = estimate_vbytes(1, 2);
        let to_btc = |rate: u64| from_base_units(u128::from(rate * size), Chain::Btc.decimals());
        Ok(FeeEstimate {
            chain: Chain::Btc,
            slow: to_btc(rates[0])?,
            standard: to_btc(rates[1])?,
            fast: to_btc(rates[2])?,
        })
    }

    async fn create_transaction(
        &self,
        request: &TransferRequest,
    ) -> Result<UnsignedTransaction, ChainError> {
        let change_script = self.script_for(&request.from)?;
        let destination_script = self.script_for(&request.to)?;
        let amount = u64::try_from(to_base_units(request.amount, Chain::Btc.decimals())?)
            .map_err(|_| ChainError::InvalidAmount(request.amount.to_string()))?;
        if amount < DUST_LIMIT_SATS {
            return Err(ChainError::InvalidAmount(format!(
                "{} is below the dust limit",
                request.amount
            )));
        }

        let fixed_fee = match request.fee {
            Some(fee) => Some(
                u64::try_from(to_base_units(fee, Chain::Btc.decimals())?)
                    .map_err(|_| ChainError::InvalidAmount(fee.to_string()))?,
            ),
            None => None,
        };
        let fee_rate = match fixed_fee {
            Some(_) => 0,
            None => {
                let rates = self.fee_rates().await?;
                match request.priority {
                    Priority::Slow => rates[0],
                    Priority::Standard => rates[1],
                    Priority::Fast => rates[2],
                }
            }
        };

        let mut utxos: Vec<EsploraUtxo> = self
            .http
            .get_json(&format!("/address/{}/utxo", request.from))
            .await?
            .unwrap_or_default();
        utxos.sort_by(|a, b| b.value.cmp(&a.value));

        let mut selected = Vec::new();
        let mut total: u64 = 0;
        let mut fee = 0;
        for utxo in utxos {
            total += utxo.value;
            selected.push(Utxo {
                txid: utxo.txid,
                vout: utxo.vout,
                value: utxo.value,
            });
            fee = fixed_fee.unwrap_or(fee_rate * estimate_vbytes(selected.len(), 2));
            if total >= amount + fee {
                break;
            }
        }
        if selected.is_empty() || total < amount + fee {
            return Err(ChainError::InsufficientFunds(format!(
                "need {} sats plus fee, wallet holds {total}",
                amount
            )));
        }

        let mut outputs = vec![BtcOutput {
            script_hex: hex::encode(&destination_script),
            value: amount,
        }];
        let change = total - amount - fee;
        if change >= DUST_LIMIT_SATS {
            outputs.push(BtcOutput {
                script_hex: hex::encode(&change_script),
                value: change,
            });
        } else {
            fee += change;
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("inputs".into(), selected.len().into());
        metadata.insert("fee_sats".into(), fee.into());
        metadata.insert("change_sats".into(), (if outputs.len() > 1 { change } else { 0 }).into());

        let unsigned = BtcUnsigned {
            from: request.from.clone(),
            inputs: selected,
            outputs,
            fee_sats: fee,
        };
        Ok(UnsignedTransaction {
            chain: Chain::Btc,
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
        let parsed: BtcUnsigned = serde_json::from_slice(&unsigned.payload)
            .map_err(|e| ChainError::MalformedPayload(e.to_string()))?;
        let signing_key: SigningKey = secp256k1_from_pem(private_key)?;
        let public_key = signing_key.verifying_key().to_encoded_point(true);
        let prev_script = p2pkh_script(&hash160(public_key.as_bytes()));
        if prev_script != self.script_for(&parsed.from)? {
            return Err(ChainError::Signing("key does not match the source address".into()));
        }

        let outputs = parsed
            .outputs
            .iter()
            .map(|o| {
                hex::decode(&o.script_hex)
                    .map(|script| (o.value, script))
                    .map_err(|e| ChainError::MalformedPayload(format!("script: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut script_sigs = Vec::with_capacity(parsed.inputs.len());
        for index in 0..parsed.inputs.len() {
            let scripts: Vec<Vec<u8>> = (0..parsed.inputs.len())
                .map(|i| if i == index { prev_script.clone() } else { Vec::new() })
                .collect();
            let mut preimage = serialize_tx(&parsed.inputs, &scripts, &outputs)?;
            preimage.extend_from_slice(&SIGHASH_ALL.to_le_bytes());
            let digest = sha256d(&preimage);

            let signature: Signature = signing_key
                .sign_prehash(&digest)
                .map_err(|e| ChainError::Signing(e.to_string()))?;
            let signature = signature.normalize_s().unwrap_or(signature);
            let mut sig_bytes = signature.to_der().as_bytes().to_vec();
            sig_bytes.push(SIGHASH_ALL as u8);

            let mut script_sig = Vec::with_capacity(sig_bytes.len() + public_key.len() + 2);
            push_data(&mut script_sig, &sig_bytes);
            push_data(&mut script_sig, public_key.as_bytes());
            script_sigs.push(script_sig);
        }

        let raw = serialize_tx(&parsed.inputs, &script_sigs, &outputs)?;
        let mut txid = sha256d(&raw);
        txid.reverse();

        Ok(SignedTransaction {
            chain: Chain::Btc,
            payload: raw,
            hash: Some(hex::encode(txid)),
            metadata: unsigned.metadata.clone(),
        })
    }

    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String, ChainError> {
        let txid = self.http.post_text("/tx", hex::encode(&signed.payload)).await?;
        Ok(txid.trim().to_string())
    }

    async fn get_transaction_status(&self, hash: &str) -> Result<TxStatusReport, ChainError> {
        let status: Option<EsploraTxStatus> =
            self.http.get_json(&format!("/tx/{hash}/status")).await?;
        match status {
            Some(EsploraTxStatus {
                confirmed: true,
                block_height: Some(height),
            }) => {
                let tip = self.tip_height().await?;
                Ok(TxStatusReport {
                    status: ChainTxStatus::Confirmed,
                    confirmations: tip.saturating_sub(height) + 1,
                    block_number: Some(height),
                    error: None,
                })
            }
            _ => Ok(TxStatusReport::pending(0)),
        }
    }

    async fn get_block_number(&self) -> Result<u64, ChainError> {
        self.tip_height().await
    }

    async fn get_network_info(&self) -> Result<NetworkInfo, ChainError> {
        Ok(NetworkInfo {
            chain: Chain::Btc,
            network: self.network,
            chain_id: self.chain_id(),
            block_height: self.tip_height().await?,
            confirmation_threshold: self.confirmations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::pkcs8::{EncodePrivateKey, LineEnding};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(url: &str, network: Network) -> BitcoinAdapter {
        BitcoinAdapter::new(&ChainConfig {
            rpc_url: url.to_string(),
            confirmations: 3,
            network,
        })
        .unwrap()
    }

    #[test]
    fn private_key_one_maps_to_known_address() {
        let mut secret = [0u8; 32];
        secret[31] = 1;
        let key = SigningKey::from_slice(&secret).unwrap();
        let pubkey = key.verifying_key().to_encoded_point(true);
        let btc = adapter("http://localhost", Network::Mainnet);
        assert_eq!(
            btc.encode_address(&hash160(pubkey.as_bytes())),
            "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH"
        );
    }

    #[test]
    fn generated_testnet_address_validates() {
        let btc = adapter("http://localhost", Network::Testnet);
        let wallet = btc.generate_wallet().unwrap();
        assert!(wallet.address.starts_with('m') || wallet.address.starts_with('n'));
        assert!(btc.validate_address(&wallet.address));

        let mainnet = adapter("http://localhost", Network::Mainnet);
        assert!(!mainnet.validate_address(&wallet.address));
        assert!(!btc.validate_address("bc1qxyz"));
    }

    #[tokio::test]
    async fn balance_sums_chain_stats() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/address/1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "chain_stats": {"funded_txo_sum": 250_000_000u64, "spent_txo_sum": 100_000_000u64},
                "mempool_stats": {"funded_txo_sum": 0, "spent_txo_sum": 0}
            })))
            .mount(&server)
            .await;

        let btc = adapter(&server.uri(), Network::Mainnet);
        let balance = btc
            .get_balance("1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH")
            .await
            .unwrap();
        assert_eq!(balance.balance, "1.5");
    }

    #[tokio::test]
    async fn creates_and_signs_spend_with_change() {
        let server = MockServer::start().await;
        let btc = adapter(&server.uri(), Network::Mainnet);

        let mut secret = [0u8; 32];
        secret[31] = 1;
        let key = SigningKey::from_slice(&secret).unwrap();
        let pem = key.to_pkcs8_pem(LineEnding::LF).unwrap();
        let from = "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH";

        Mock::given(method("GET"))
            .and(path(format!("/address/{from}/utxo")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"txid": "aa".repeat(32), "vout": 0, "value": 100_000u64, "status": {"confirmed": true}}
            ])))
            .mount(&server)
            .await;

        let unsigned = btc
            .create_transaction(&TransferRequest {
                from: from.to_string(),
                to: "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2".to_string(),
                amount: dec!(0.0005),
                fee: Some(dec!(0.00001)),
                memo: None,
                priority: Priority::Standard,
            })
            .await
            .unwrap();
        assert_eq!(unsigned.metadata["fee_sats"], json!(1000));
        assert_eq!(unsigned.metadata["change_sats"], json!(49_000));

        let signed = btc.sign_transaction(&unsigned, &pem).unwrap();
        assert_eq!(&signed.payload[..4], &[1, 0, 0, 0]);
        assert_eq!(signed.hash.unwrap().len(), 64);
    }

    #[tokio::test]
    async fn insufficient_utxos_are_reported() {
        let server = MockServer::start().await;
        let btc = adapter(&server.uri(), Network::Mainnet);
        let from = "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH";
        Mock::given(method("GET"))
            .and(path(format!("/address/{from}/utxo")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let err = btc
            .create_transaction(&TransferRequest {
                from: from.to_string(),
                to: "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2".to_string(),
                amount: dec!(0.001),
                fee: Some(dec!(0.00001)),
                memo: None,
                priority: Priority::Standard,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::InsufficientFunds(_)));
    }
}
