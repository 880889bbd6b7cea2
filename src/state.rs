// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use axum::extract::FromRef;
use tokio_util::sync::CancellationToken;

use crate::auth::TokenService;
use crate::blockchain::AdapterRegistry;
use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::crypto::KeyEncryptor;
use crate::pubsub::{PriceMessage, PubSub};
use crate::services::{AnalyticsService, ExchangeEngine, KycService, UserService, WalletEngine};
use crate::storage::Databases;

/// Shared handles for every request handler.
#[derive(Clone)]
pub struct AppState {
    pub dbs: Arc<Databases>,
    pub tokens: TokenService,
    pub clock: Arc<dyn Clock>,
    pub adapters: Arc<AdapterRegistry>,
    pub users: Arc<UserService>,
    pub wallets: Arc<WalletEngine>,
    pub exchange: Arc<ExchangeEngine>,
    pub kyc: Arc<KycService>,
    pub analytics: Arc<AnalyticsService>,
    pub prices: Arc<PubSub<PriceMessage>>,
    pub rate_limit: RateLimitConfig,
    pub cors_origins: Vec<String>,
    /// Cancelled on shutdown; handlers hand child tokens to chain calls.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the services over opened databases and adapters.
    ///
    /// `wallet_key` encrypts wallet private keys; `kyc_key` encrypts KYC PII
    /// and TOTP secrets.
    pub fn new(
        dbs: Arc<Databases>,
        adapters: Arc<AdapterRegistry>,
        wallet_key: Arc<KeyEncryptor>,
        kyc_key: Arc<KeyEncryptor>,
        tokens: TokenService,
        clock: Arc<dyn Clock>,
        rate_limit: RateLimitConfig,
    ) -> Self {
        let wallets = Arc::new(WalletEngine::new(
            dbs.clone(),
            adapters.clone(),
            Some(wallet_key),
            clock.clone(),
        ));
        let exchange = Arc::new(ExchangeEngine::new(dbs.clone(), wallets.tx_cache(), clock.clone()));

        Self {
            users: Arc::new(UserService::new(dbs.clone(), tokens.clone(), kyc_key.clone(), clock.clone())),
            kyc: Arc::new(KycService::new(dbs.clone(), kyc_key, clock.clone())),
            analytics: Arc::new(AnalyticsService::new(dbs.clone(), clock.clone())),
            prices: Arc::new(PubSub::default()),
            wallets,
            exchange,
            dbs,
            tokens,
            clock,
            adapters,
            rate_limit,
            cors_origins: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    /// Replace the wallet engine, e.g. one with a faster retry policy.
    pub fn with_wallet_engine(mut self, engine: WalletEngine) -> Self {
        let engine = Arc::new(engine);
        self.exchange = Arc::new(ExchangeEngine::new(
            self.dbs.clone(),
            engine.tx_cache(),
            self.clock.clone(),
        ));
        self.wallets = engine;
        self
    }
}

impl FromRef<AppState> for TokenService {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}
