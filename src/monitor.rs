// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Background Workers
//!
//! Tasks that keep persisted state in step with the outside world:
//!
//! - [`TransactionMonitor`] polls chain adapters for the status of open
//!   (pending/confirming) transactions, oldest first in bounded batches, and
//!   replays ledger rows that could not be written at send time.
//! - [`QuoteSweeper`] cancels exchange quotes whose expiry has passed.
//!
//! ## Shutdown
//!
//! Every loop takes a `tokio_util::sync::CancellationToken` and exits at its
//! next suspension point once it fires.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blockchain::{AdapterRegistry, ChainTxStatus, TxStatusReport};
use crate::clock::Clock;
use crate::services::ExchangeEngine;
use crate::storage::{Databases, LedgerRepository, TransactionRecord, TransactionRepository, TxCache, TxStatus};

/// Open transactions examined per chain per tick.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Counters of one monitor pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub checked: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub updated: usize,
    pub errors: usize,
}

/// New state of `tx` given a chain report, or `None` when nothing changed.
pub fn apply_status(
    tx: &TransactionRecord,
    report: &TxStatusReport,
    threshold: u64,
    now: DateTime<Utc>,
) -> Option<TransactionRecord> {
    let mut next = tx.clone();
    match report.status {
        ChainTxStatus::Failed => {
            if !tx.status.can_transition_to(TxStatus::Failed) {
                return None;
            }
            next.status = TxStatus::Failed;
            next.error_message = Some(
                report
                    .error
                    .clone()
                    .unwrap_or_else(|| "transaction failed on chain".to_string()),
            );
        }
        _ if report.confirmations >= threshold => {
            if !tx.status.can_transition_to(TxStatus::Confirmed) {
                return None;
            }
            next.status = TxStatus::Confirmed;
            next.confirmations = report.confirmations;
            next.confirmed_at = Some(now);
            next.block_number = report.block_number.or(tx.block_number);
        }
        _ => {
            if report.confirmations > 0 && tx.status == TxStatus::Pending {
                next.status = TxStatus::Confirming;
            }
            next.confirmations = report.confirmations.max(tx.confirmations);
            next.block_number = report.block_number.or(tx.block_number);
        }
    }

    if next == *tx {
        return None;
    }
    next.updated_at = now;
    Some(next)
}

pub struct TransactionMonitor {
    dbs: Arc<Databases>,
    adapters: Arc<AdapterRegistry>,
    tx_cache: Arc<TxCache>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    batch_size: usize,
}

impl TransactionMonitor {
    pub fn new(
        dbs: Arc<Databases>,
        adapters: Arc<AdapterRegistry>,
        tx_cache: Arc<TxCache>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            dbs,
            adapters,
            tx_cache,
            clock,
            interval,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run the monitor loop until the cancellation token is triggered.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Transaction monitor starting");

        loop {
            let report = self.poll_once(&shutdown).await;
            if report.checked > 0 {
                info!(
                    checked = report.checked,
                    confirmed = report.confirmed,
                    failed = report.failed,
                    updated = report.updated,
                    errors = report.errors,
                    "Transaction monitor pass complete"
                );
            }
            match self.reconcile_ledger() {
                Ok(0) => {}
                Ok(resolved) => info!(resolved, "Ledger gaps reconciled"),
                Err(e) => warn!(error = %e, "Ledger reconciliation failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Transaction monitor shutting down");
                    return;
                }
            }
        }
    }

    /// One pass over the open transactions of every registered chain.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> MonitorReport {
        let mut report = MonitorReport::default();
        let transactions = TransactionRepository::new(&self.dbs.core);

        for chain in self.adapters.chains() {
            let Some(adapter) = self.adapters.get(chain) else {
                continue;
            };
            let open = match transactions.list_open(chain, self.batch_size) {
                Ok(open) => open,
                Err(e) => {
                    warn!(%chain, error = %e, "Failed to list open transactions");
                    report.errors += 1;
                    continue;
                }
            };
            let threshold = adapter.confirmation_threshold();

            for tx in open {
                if cancel.is_cancelled() {
                    return report;
                }
                let Some(hash) = tx.hash.as_deref() else {
                    continue;
                };
                report.checked += 1;

                let status = tokio::select! {
                    status = adapter.get_transaction_status(hash) => status,
                    _ = cancel.cancelled() => return report,
                };
                let status = match status {
                    Ok(status) => status,
                    Err(e) => {
                        // Transient; the record is retried next tick
                        debug!(tx_id = %tx.id, %chain, error = %e, "Status lookup failed");
                        report.errors += 1;
                        continue;
                    }
                };

                let Some(next) = apply_status(&tx, &status, threshold, self.clock.now()) else {
                    continue;
                };
                if let Err(e) = transactions.update(&next) {
                    warn!(tx_id = %tx.id, error = %e, "Failed to persist transaction status");
                    report.errors += 1;
                    continue;
                }
                self.tx_cache.invalidate(&next.wallet_id);

                match next.status {
                    TxStatus::Confirmed => {
                        info!(tx_id = %next.id, %chain, confirmations = next.confirmations, "Transaction confirmed");
                        report.confirmed += 1;
                    }
                    TxStatus::Failed => {
                        warn!(tx_id = %next.id, %chain, error = ?next.error_message, "Transaction failed");
                        report.failed += 1;
                    }
                    _ => report.updated += 1,
                }
            }
        }
        report
    }

    /// Replay ledger rows recorded as gaps at send time. Returns the number
    /// of gaps resolved.
    pub fn reconcile_ledger(&self) -> Result<usize, crate::storage::DbError> {
        let ledger = LedgerRepository::new(&self.dbs.core);
        let mut resolved = 0;
        for gap in ledger.gaps()? {
            match ledger.resolve_gap(&gap) {
                Ok(written) => {
                    debug!(tx_id = %gap.transaction_id, written, "Ledger gap resolved");
                    resolved += 1;
                }
                Err(e) => warn!(tx_id = %gap.transaction_id, error = %e, "Ledger gap still unresolved"),
            }
        }
        Ok(resolved)
    }
}

/// Periodic sweep of expired exchange quotes.
pub struct QuoteSweeper {
    engine: Arc<ExchangeEngine>,
    interval: Duration,
}

impl QuoteSweeper {
    pub fn new(engine: Arc<ExchangeEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Quote sweeper starting");

        loop {
            match self.engine.expire_pending_quotes() {
                Ok(0) => {}
                Ok(expired) => info!(expired, "Expired exchange quotes cancelled"),
                Err(e) => warn!(error = %e, "Quote sweep failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Quote sweeper shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::mock::MockAdapter;
    use crate::blockchain::Chain;
    use crate::clock::ManualClock;
    use crate::storage::test_support::{databases, sample_tx};
    use crate::storage::{EntryType, LedgerEntry, LedgerGap, TxFilter};
    use rust_decimal_macros::dec;

    struct Fixture {
        monitor: TransactionMonitor,
        adapter: Arc<MockAdapter>,
        dbs: Arc<Databases>,
        cache: Arc<TxCache>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let (dbs, dir) = databases();
        let dbs = Arc::new(dbs);
        let adapter = Arc::new(MockAdapter::new(Chain::Eth));
        let adapters = Arc::new(AdapterRegistry::new().with(adapter.clone()));
        let cache = Arc::new(TxCache::new(16, Duration::from_secs(30)));
        let monitor = TransactionMonitor::new(
            dbs.clone(),
            adapters,
            cache.clone(),
            Arc::new(ManualClock::new(Utc::now())),
            Duration::from_millis(10),
        );
        Fixture {
            monitor,
            adapter,
            dbs,
            cache,
            _dir: dir,
        }
    }

    fn report(status: ChainTxStatus, confirmations: u64) -> TxStatusReport {
        TxStatusReport {
            status,
            confirmations,
            block_number: Some(1234),
            error: None,
        }
    }

    #[test]
    fn status_rules() {
        let tx = sample_tx("t1", "w1", Chain::Eth, Some("0xabc"));
        let now = Utc::now();

        let next = apply_status(&tx, &report(ChainTxStatus::Pending, 1), 3, now).unwrap();
        assert_eq!(next.status, TxStatus::Confirming);
        assert_eq!(next.confirmations, 1);

        let next = apply_status(&next, &report(ChainTxStatus::Confirmed, 3), 3, now).unwrap();
        assert_eq!(next.status, TxStatus::Confirmed);
        assert_eq!(next.confirmed_at, Some(now));
        assert_eq!(next.block_number, Some(1234));

        // terminal records never move again
        assert!(apply_status(&next, &report(ChainTxStatus::Failed, 0), 3, now).is_none());

        let mut failed = TxStatusReport::pending(0);
        failed.status = ChainTxStatus::Failed;
        failed.error = Some("out of gas".into());
        let next = apply_status(&tx, &failed, 3, now).unwrap();
        assert_eq!(next.status, TxStatus::Failed);
        assert_eq!(next.error_message.as_deref(), Some("out of gas"));
    }

    #[test]
    fn unchanged_report_is_a_no_op() {
        let tx = sample_tx("t1", "w1", Chain::Eth, Some("0xabc"));
        assert!(apply_status(&tx, &TxStatusReport::pending(0), 3, Utc::now()).is_none());
    }

    #[tokio::test]
    async fn poll_confirms_open_transactions() {
        let fx = fixture();
        let repo = TransactionRepository::new(&fx.dbs.core);
        repo.insert(&sample_tx("t1", "w1", Chain::Eth, Some("0xabc"))).unwrap();
        repo.insert(&sample_tx("t2", "w1", Chain::Eth, None)).unwrap();
        fx.cache.put_first_page("w1", 20, (Vec::new(), None));

        fx.adapter.set_status(report(ChainTxStatus::Confirmed, 12));
        let cancel = CancellationToken::new();
        let first = fx.monitor.poll_once(&cancel).await;
        assert_eq!(first.checked, 1);
        assert_eq!(first.confirmed, 1);
        assert!(fx.cache.get_first_page("w1", 20).is_none());

        let tx = repo.get("t1").unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Confirmed);
        assert!(tx.confirmed_at.is_some());
        assert_eq!(repo.list_open(Chain::Eth, 10).unwrap().len(), 1);

        // second pass has nothing left with a hash to check
        let second = fx.monitor.poll_once(&cancel).await;
        assert_eq!(second.checked, 0);
        let listed = repo.list_by_wallet("w1", &TxFilter::default(), None, 10).unwrap();
        assert_eq!(listed.0.len(), 2);
    }

    #[tokio::test]
    async fn reconcile_replays_gaps_once() {
        let fx = fixture();
        let ledger = LedgerRepository::new(&fx.dbs.core);
        let now = Utc::now();
        let entries = vec![
            LedgerEntry::new("0xfrom", Some("t1".into()), EntryType::Credit, dec!(0.251), "ETH", "send", now),
            LedgerEntry::new("0xto", Some("t1".into()), EntryType::Debit, dec!(0.25), "ETH", "send", now),
        ];
        ledger
            .record_gap(&LedgerGap {
                transaction_id: "t1".into(),
                entries,
                error: "disk full".into(),
                recorded_at: now,
            })
            .unwrap();

        assert_eq!(fx.monitor.reconcile_ledger().unwrap(), 1);
        assert_eq!(ledger.by_transaction("t1").unwrap().len(), 2);
        assert!(ledger.gaps().unwrap().is_empty());
        assert_eq!(fx.monitor.reconcile_ledger().unwrap(), 0);
    }

    #[tokio::test]
    async fn run_exits_on_cancel() {
        let fx = fixture();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(fx.monitor.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
