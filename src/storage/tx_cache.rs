// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache for transaction history first-page lookups.
//!
//! Caches the unfiltered first page of transactions per wallet to avoid
//! repeated redb reads for the most common query pattern. Any write that
//! touches a wallet's transactions must call [`TxCache::invalidate`].

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use super::repository::transactions::TransactionRecord;

/// A cached page: rows, next cursor and insertion time.
struct CacheEntry {
    page: (Vec<TransactionRecord>, Option<String>),
    inserted_at: Instant,
}

/// In-process LRU cache for hot wallet transaction lookups.
pub struct TxCache {
    cache: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl TxCache {
    /// - `capacity`: max number of wallets cached (at least 1).
    /// - `ttl`: time-to-live for each entry.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))),
            ttl,
        }
    }

    /// Cached first page for `(wallet_id, limit)`, or `None` if absent or expired.
    pub fn get_first_page(
        &self,
        wallet_id: &str,
        limit: usize,
    ) -> Option<(Vec<TransactionRecord>, Option<String>)> {
        let key = cache_key(wallet_id, limit);
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(&key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.page.clone());
            }
            cache.pop(&key);
        }
        None
    }

    pub fn put_first_page(
        &self,
        wallet_id: &str,
        limit: usize,
        page: (Vec<TransactionRecord>, Option<String>),
    ) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                cache_key(wallet_id, limit),
                CacheEntry {
                    page,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    /// Drop every cached page of a wallet.
    pub fn invalidate(&self, wallet_id: &str) {
        let prefix = format!("{wallet_id}|");
        if let Ok(mut cache) = self.cache.lock() {
            let stale: Vec<String> = cache
                .iter()
                .filter(|(k, _)| k.starts_with(&prefix))
                .map(|(k, _)| k.clone())
                .collect();
            for key in stale {
                cache.pop(&key);
            }
        }
    }
}

fn cache_key(wallet_id: &str, limit: usize) -> String {
    format!("{wallet_id}|{limit}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Chain;
    use crate::storage::test_support::sample_tx;

    fn page() -> (Vec<TransactionRecord>, Option<String>) {
        (vec![sample_tx("t1", "w1", Chain::Eth, Some("0xabc"))], None)
    }

    #[test]
    fn cache_put_and_get() {
        let cache = TxCache::new(10, Duration::from_secs(300));
        assert!(cache.get_first_page("w1", 20).is_none());

        cache.put_first_page("w1", 20, page());
        let (rows, cursor) = cache.get_first_page("w1", 20).unwrap();
        assert_eq!(rows[0].hash.as_deref(), Some("0xabc"));
        assert!(cursor.is_none());
        assert!(cache.get_first_page("w1", 50).is_none());
    }

    #[test]
    fn cache_invalidate_drops_all_limits() {
        let cache = TxCache::new(10, Duration::from_secs(300));
        cache.put_first_page("w1", 20, page());
        cache.put_first_page("w1", 50, page());
        cache.put_first_page("w10", 20, page());

        cache.invalidate("w1");
        assert!(cache.get_first_page("w1", 20).is_none());
        assert!(cache.get_first_page("w1", 50).is_none());
        assert!(cache.get_first_page("w10", 20).is_some());
    }

    #[test]
    fn cache_ttl_expiry() {
        let cache = TxCache::new(10, Duration::from_millis(1));
        cache.put_first_page("w1", 20, page());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get_first_page("w1", 20).is_none());
    }
}
