// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Named-channel fan-out
//!
//! Publishers push a message to a channel name; every current subscriber of
//! that channel receives a clone. Each subscription owns a bounded queue:
//!
//! - `publish` never waits. A full queue drops the message for that
//!   subscriber only and bumps its `dropped` counter.
//! - A subscription whose receiver was dropped is pruned on the next publish.
//! - Messages from one publisher on one channel arrive in publish order.
//!
//! One subscription may listen on several channels (e.g. `prices:BTC` and
//! `prices:ETH`) through the same queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::storage::ExchangeRate;

/// Default per-subscription queue depth.
pub const DEFAULT_BUFFER: usize = 64;

pub const PRICES_BATCH_CHANNEL: &str = "prices:batch";

/// Channel carrying ticks of one symbol.
pub fn price_channel(symbol: &str) -> String {
    format!("prices:{}", symbol.to_uppercase())
}

/// Single-symbol price tick as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PriceUpdate {
    pub symbol: String,
    #[schema(value_type = String)]
    pub price_usd: Decimal,
    #[schema(value_type = String)]
    pub price_change_24h: Decimal,
    #[schema(value_type = String)]
    pub volume_24h: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl From<&ExchangeRate> for PriceUpdate {
    fn from(rate: &ExchangeRate) -> Self {
        Self {
            symbol: rate.symbol.clone(),
            price_usd: rate.price_usd,
            price_change_24h: rate.price_change_24h,
            volume_24h: rate.volume_24h,
            timestamp: rate.last_updated,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PriceMessage {
    Update(PriceUpdate),
    Batch(Arc<Vec<PriceUpdate>>),
}

struct Subscriber<M> {
    id: u64,
    tx: mpsc::Sender<M>,
    dropped: Arc<AtomicU64>,
}

/// Receiving end of a subscription.
pub struct Subscription<M> {
    pub id: u64,
    pub channels: Vec<String>,
    rx: mpsc::Receiver<M>,
    dropped: Arc<AtomicU64>,
}

impl<M> Subscription<M> {
    pub async fn recv(&mut self) -> Option<M> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<M> {
        self.rx.try_recv().ok()
    }

    /// Messages discarded because this subscription's queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct PubSub<M> {
    channels: Mutex<HashMap<String, Vec<Subscriber<M>>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl<M: Clone + Send + 'static> PubSub<M> {
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Subscriber<M>>>> {
        // Subscriber state stays consistent even if a holder panicked
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe<I, S>(&self, channels: I) -> Subscription<M>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut names: Vec<String> = channels.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();

        let mut map = self.lock();
        for name in &names {
            map.entry(name.clone()).or_default().push(Subscriber {
                id,
                tx: tx.clone(),
                dropped: dropped.clone(),
            });
        }
        debug!(subscription_id = id, channels = ?names, "Subscribed");

        Subscription {
            id,
            channels: names,
            rx,
            dropped,
        }
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut map = self.lock();
        for subscribers in map.values_mut() {
            subscribers.retain(|s| s.id != id);
        }
        map.retain(|_, subscribers| !subscribers.is_empty());
    }

    /// Deliver `message` to every live subscriber of `channel`. Returns the
    /// number of queues that accepted it.
    pub fn publish(&self, channel: &str, message: M) -> usize {
        let mut map = self.lock();
        let Some(subscribers) = map.get_mut(channel) else {
            return 0;
        };

        let mut delivered = 0;
        subscribers.retain(|sub| match sub.tx.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let total = sub.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(channel, subscription_id = sub.id, dropped = total, "Subscriber queue full, message dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if subscribers.is_empty() {
            map.remove(channel);
        }
        delivered
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock().get(channel).map_or(0, Vec::len)
    }
}

impl<M: Clone + Send + 'static> Default for PubSub<M> {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}
