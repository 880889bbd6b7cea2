// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared harness for the HTTP scenarios: an in-memory chain adapter, a
//! manual clock and helpers that drive the router with `oneshot`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use zeroize::Zeroizing;

use custodial_wallet_server::{
    api::router,
    auth::{Role, TokenService},
    blockchain::{
        AdapterRegistry, BalanceInfo, Chain, ChainAdapter, ChainError, ChainTxStatus, FeeEstimate,
        GeneratedWallet, Network, NetworkInfo, Priority, SignedTransaction, TransferRequest,
        TxStatusReport, UnsignedTransaction,
    },
    clock::{Clock, ManualClock},
    config::{JwtConfig, RateLimitConfig},
    crypto::KeyEncryptor,
    state::AppState,
    storage::Databases,
};

pub const PASSWORD: &str = "correct-horse-battery";

/// Chain stand-in with per-address balances and instant broadcasts.
pub struct TestAdapter {
    chain: Chain,
    counter: AtomicU64,
    balances: Mutex<HashMap<String, String>>,
    status: Mutex<TxStatusReport>,
}

impl TestAdapter {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            counter: AtomicU64::new(0),
            balances: Mutex::new(HashMap::new()),
            status: Mutex::new(TxStatusReport::pending(0)),
        }
    }

    pub fn set_balance(&self, address: &str, balance: &str) {
        self.balances.lock().unwrap().insert(address.to_string(), balance.to_string());
    }

    pub fn set_status(&self, status: ChainTxStatus, confirmations: u64) {
        *self.status.lock().unwrap() = TxStatusReport {
            status,
            confirmations,
            block_number: Some(100),
            error: None,
        };
    }
}

#[async_trait]
impl ChainAdapter for TestAdapter {
    fn chain(&self) -> Chain {
        self.chain
    }

    fn chain_id(&self) -> String {
        format!("test-{}", self.chain)
    }

    fn confirmation_threshold(&self) -> u64 {
        3
    }

    fn generate_wallet(&self) -> Result<GeneratedWallet, ChainError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let address = match self.chain {
            Chain::Eth => format!("0x{n:08x}{}", &suffix[..32]),
            other => format!("{}{n}{suffix}", other.symbol().to_lowercase()),
        };
        Ok(GeneratedWallet {
            chain: self.chain,
            address,
            public_key: format!("pub{n}"),
            private_key: Zeroizing::new(format!("key{n}")),
            derivation_path: self.chain.derivation_path().to_string(),
        })
    }

    fn validate_address(&self, address: &str) -> bool {
        match self.chain {
            Chain::Eth => address.starts_with("0x") && address.len() > 2,
            _ => !address.trim().is_empty(),
        }
    }

    async fn get_balance(&self, address: &str) -> Result<BalanceInfo, ChainError> {
        let balance = self.balances.lock().unwrap().get(address).cloned().unwrap_or_else(|| "0".into());
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
        Ok(FeeEstimate {
            chain: self.chain,
            slow: Decimal::new(5, 4),
            standard: Decimal::new(1, 3),
            fast: Decimal::new(2, 3),
        })
    }

    async fn create_transaction(&self, request: &TransferRequest) -> Result<UnsignedTransaction, ChainError> {
        Ok(UnsignedTransaction {
            chain: self.chain,
            payload: format!("{}:{}:{}", request.from, request.to, request.amount).into_bytes(),
            hash_hint: None,
            metadata: serde_json::Map::new(),
        })
    }

    fn sign_transaction(
        &self,
        unsigned: &UnsignedTransaction,
        private_key: &str,
    ) -> Result<SignedTransaction, ChainError> {
        if !private_key.starts_with("key") {
            return Err(ChainError::InvalidKey);
        }
        Ok(SignedTransaction {
            chain: self.chain,
            payload: unsigned.payload.clone(),
            hash: None,
            metadata: unsigned.metadata.clone(),
        })
    }

    async fn broadcast_transaction(&self, _signed: &SignedTransaction) -> Result<String, ChainError> {
        Ok(format!("0x{}", uuid::Uuid::new_v4().simple()))
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
            confirmation_threshold: 3,
        })
    }
}

/// A fully wired server over temporary databases.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub adapters: HashMap<Chain, Arc<TestAdapter>>,
    _dir: TempDir,
}

/// A registered user and their bearer token.
pub struct TestUser {
    pub id: String,
    pub token: String,
}

impl TestApp {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let dbs = Arc::new(Databases::open_in(dir.path()).unwrap());

        let mut registry = AdapterRegistry::new();
        let mut adapters = HashMap::new();
        for chain in Chain::ALL {
            let adapter = Arc::new(TestAdapter::new(chain));
            registry.register(adapter.clone());
            adapters.insert(chain, adapter);
        }

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tokens = TokenService::new(&JwtConfig {
            secret: "scenario-secret-scenario-secret-xx".into(),
            issuer: "crypto-wallet".into(),
            audience: None,
            leeway: Duration::from_secs(30),
        });
        let state = AppState::new(
            dbs,
            Arc::new(registry),
            Arc::new(KeyEncryptor::ephemeral().unwrap()),
            Arc::new(KeyEncryptor::ephemeral().unwrap()),
            tokens,
            clock.clone(),
            RateLimitConfig {
                enabled: false,
                requests: 100,
                window: Duration::from_secs(60),
            },
        );

        Self {
            router: router(state.clone()),
            state,
            clock,
            adapters,
            _dir: dir,
        }
    }

    pub fn adapter(&self, chain: Chain) -> &TestAdapter {
        &self.adapters[&chain]
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, body)
    }

    pub async fn call(&self, method: Method, path: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(format!("/api/v1{path}"));
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn get(&self, path: &str, token: &str) -> (StatusCode, Value) {
        self.call(Method::GET, path, Some(token), None).await
    }

    pub async fn post(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, path, Some(token), Some(body)).await
    }

    pub async fn register(&self, email: &str) -> TestUser {
        let (status, profile) = self
            .call(
                Method::POST,
                "/auth/register",
                None,
                Some(json!({ "email": email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{profile}");

        let (status, login) = self
            .call(
                Method::POST,
                "/auth/login",
                None,
                Some(json!({ "email": email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{login}");
        TestUser {
            id: profile["id"].as_str().unwrap().to_string(),
            token: login["token"].as_str().unwrap().to_string(),
        }
    }

    pub fn admin_token(&self) -> String {
        self.state
            .tokens
            .issue("admin-1", "ops@example.com", Role::Admin, self.clock.now())
            .unwrap()
    }

    /// Upload a document, submit PII and have an admin approve at `basic`.
    pub async fn verify_kyc(&self, user: &TestUser) {
        let boundary = "scenario-boundary";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"document_type\"\r\n\r\npassport\r\n\
             --{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"passport.png\"\r\n\
             Content-Type: image/png\r\n\r\n\x7fPNG-bytes\r\n--{boundary}--\r\n"
        );
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/kyc/documents")
            .header(header::AUTHORIZATION, format!("Bearer {}", user.token))
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();
        let (status, doc) = self.send(request).await;
        assert_eq!(status, StatusCode::CREATED, "{doc}");

        let (status, submitted) = self
            .post(
                "/kyc/submit",
                &user.token,
                json!({
                    "first_name": "Ada",
                    "last_name": "Lovelace",
                    "date_of_birth": "1990-12-10",
                    "nationality": "GB",
                    "document_number": "P1234567",
                    "address": "12 St James's Square, London"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{submitted}");

        let admin = self.admin_token();
        let (status, body) = self
            .post(&format!("/admin/kyc/{}/review", user.id), &admin, json!({}))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let (status, body) = self
            .post(&format!("/admin/kyc/{}/approve", user.id), &admin, json!({ "level": "basic" }))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    pub async fn create_wallet(&self, user: &TestUser, chain: &str) -> Value {
        let (status, wallet) = self.post("/wallets", &user.token, json!({ "chain": chain })).await;
        assert_eq!(status, StatusCode::CREATED, "{wallet}");
        wallet
    }

    /// Put `balance` on chain for the wallet and refresh the stored copy.
    pub async fn fund(&self, user: &TestUser, wallet: &Value, balance: &str) {
        let chain: Chain = wallet["chain"].as_str().unwrap().parse().unwrap();
        self.adapter(chain).set_balance(wallet["address"].as_str().unwrap(), balance);
        let (status, body) = self
            .get(&format!("/wallets/{}/balance", wallet["id"].as_str().unwrap()), &user.token)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    pub async fn wallet_balance(&self, user: &TestUser, wallet_id: &str) -> Decimal {
        let (status, wallet) = self.get(&format!("/wallets/{wallet_id}"), &user.token).await;
        assert_eq!(status, StatusCode::OK, "{wallet}");
        decimal(&wallet["balance"])
    }

    pub async fn upsert_pair(&self, base: &str, quote: &str, rate: &str, fee: &str, min: &str) -> Value {
        let (status, pair) = self
            .call(
                Method::PUT,
                "/admin/trading-pairs",
                Some(&self.admin_token()),
                Some(json!({
                    "base_symbol": base,
                    "quote_symbol": quote,
                    "exchange_rate": rate,
                    "fee_percentage": fee,
                    "min_amount": min
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{pair}");
        pair
    }
}

/// Parse a decimal rendered as a JSON string.
pub fn decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .unwrap_or_else(|| panic!("expected decimal string, got {value}"))
        .parse()
        .unwrap()
}
