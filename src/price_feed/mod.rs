// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Price Feed Worker
//!
//! Background task that keeps `exchange_rates` current and fans ticks out
//! over the pub/sub bus.
//!
//! ## Per tick
//!
//! 1. Fetch all configured symbols from the [`PriceProvider`] with bounded
//!    retry (3 attempts, 2 s linear backoff).
//! 2. For each symbol: upsert the rate, merge it into the OHLCV candles and
//!    publish a [`PriceUpdate`] on `prices:<SYMBOL>`. A failed write is
//!    logged and does not stop the publish.
//! 3. Publish one batch message on `prices:batch`.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`. Cancellation interrupts an
//! in-flight fetch; a fetched batch is always written and published before
//! the loop exits.

pub mod provider;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{PriceFeedConfig, PRICE_STALE_AFTER};
use crate::pubsub::{price_channel, PriceMessage, PriceUpdate, PubSub, PRICES_BATCH_CHANNEL};
use crate::retry::{retry, RetryError, RetryPolicy};
use crate::storage::{Databases, ExchangeRate, RateRepository};

pub use provider::{CoinGeckoProvider, PriceProvider, PriceProviderError, PriceQuote};

/// `true` when `last_updated` is more than `threshold` behind `now`.
pub fn is_stale_at(now: DateTime<Utc>, last_updated: DateTime<Utc>, threshold: Duration) -> bool {
    match (now - last_updated).to_std() {
        Ok(age) => age > threshold,
        // last_updated in the future
        Err(_) => false,
    }
}

pub struct PriceFeedWorker {
    provider: Arc<dyn PriceProvider>,
    dbs: Arc<Databases>,
    bus: Arc<PubSub<PriceMessage>>,
    clock: Arc<dyn Clock>,
    symbols: Vec<String>,
    interval: Duration,
    retry: RetryPolicy,
    stale_after: Duration,
}

impl PriceFeedWorker {
    pub fn new(
        provider: Arc<dyn PriceProvider>,
        dbs: Arc<Databases>,
        bus: Arc<PubSub<PriceMessage>>,
        clock: Arc<dyn Clock>,
        config: &PriceFeedConfig,
    ) -> Self {
        Self {
            provider,
            dbs,
            bus,
            clock,
            symbols: config.symbols.clone(),
            interval: config.interval,
            retry: RetryPolicy::PRICE_FEED,
            stale_after: PRICE_STALE_AFTER,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn is_stale(&self, last_updated: DateTime<Utc>) -> bool {
        is_stale_at(self.clock.now(), last_updated, self.stale_after)
    }

    /// Run the feed until the cancellation token is triggered.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            provider = self.provider.name(),
            symbols = ?self.symbols,
            interval_secs = self.interval.as_secs(),
            "Price feed starting"
        );

        loop {
            match self.tick(&shutdown).await {
                Ok(count) => debug!(count, "Price tick published"),
                Err(RetryError::Cancelled) => {}
                Err(RetryError::Failed(e)) => {
                    warn!(provider = self.provider.name(), error = %e, "Price fetch failed, skipping tick");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Price feed shutting down");
                    return;
                }
            }
        }
    }

    /// One fetch, persist and publish cycle. Returns the number of symbols
    /// published.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<usize, RetryError<PriceProviderError>> {
        let provider = &self.provider;
        let symbols = &self.symbols;
        let quotes = retry(self.retry, cancel, "price_feed.fetch", || provider.fetch(symbols)).await?;

        let now = self.clock.now();
        let rates = RateRepository::new(&self.dbs.rates);
        let mut batch = Vec::with_capacity(quotes.len());
        for quote in quotes {
            let rate = ExchangeRate {
                symbol: quote.symbol.to_uppercase(),
                price_usd: quote.price_usd,
                price_change_24h: quote.price_change_24h,
                volume_24h: quote.volume_24h,
                market_cap: quote.market_cap,
                last_updated: now,
            };
            if let Err(e) = rates.upsert(&rate) {
                warn!(symbol = %rate.symbol, error = %e, "Failed to store exchange rate");
            } else if let Err(e) = rates.merge_tick(&rate) {
                warn!(symbol = %rate.symbol, error = %e, "Failed to update price history");
            }

            let update = PriceUpdate::from(&rate);
            self.bus
                .publish(&price_channel(&rate.symbol), PriceMessage::Update(update.clone()));
            batch.push(update);
        }

        let count = batch.len();
        self.bus
            .publish(PRICES_BATCH_CHANNEL, PriceMessage::Batch(Arc::new(batch)));
        Ok(count)
    }
}
