// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Administered trading pairs, keyed `BASE/QUOTE`.

use chrono::{DateTime, NaiveDate, Utc};
use redb::{ReadableTable, TableDefinition, WriteTransaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::database::{all_json, get_json, put_json, Database, DbError, DbResult, JsonTable};

pub(crate) const TRADING_PAIRS: JsonTable = TableDefinition::new("trading_pairs");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TradingPair {
    pub base_symbol: String,
    pub quote_symbol: String,
    /// Units of quote per unit of base
    #[schema(value_type = String)]
    pub exchange_rate: Decimal,
    #[schema(value_type = String)]
    pub inverse_rate: Decimal,
    #[schema(value_type = String)]
    pub fee_percentage: Decimal,
    #[schema(value_type = String)]
    pub min_amount: Decimal,
    #[schema(value_type = Option<String>)]
    pub max_amount: Option<Decimal>,
    #[schema(value_type = String)]
    pub daily_volume: Decimal,
    /// UTC day `daily_volume` accumulates for
    #[schema(value_type = String)]
    pub volume_date: NaiveDate,
    pub is_active: bool,
    pub has_liquidity: bool,
    pub last_updated: DateTime<Utc>,
}

impl TradingPair {
    pub fn key(base: &str, quote: &str) -> String {
        format!("{}/{}", base.to_uppercase(), quote.to_uppercase())
    }

    pub fn symbol(&self) -> String {
        Self::key(&self.base_symbol, &self.quote_symbol)
    }

    pub fn is_tradable(&self) -> bool {
        self.is_active && self.has_liquidity
    }

    /// Add to the running daily volume, restarting it on a new UTC day.
    pub fn add_volume(&mut self, amount: Decimal, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.volume_date != today {
            self.volume_date = today;
            self.daily_volume = Decimal::ZERO;
        }
        self.daily_volume += amount;
        self.last_updated = now;
    }
}

pub struct TradingPairRepository<'a> {
    db: &'a Database,
}

impl<'a> TradingPairRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn get(&self, base: &str, quote: &str) -> DbResult<Option<TradingPair>> {
        self.db
            .read(|txn| get_json(&txn.open_table(TRADING_PAIRS)?, &TradingPair::key(base, quote)))
    }

    pub fn list(&self) -> DbResult<Vec<TradingPair>> {
        self.db.read(|txn| all_json(&txn.open_table(TRADING_PAIRS)?))
    }

    pub fn list_active(&self) -> DbResult<Vec<TradingPair>> {
        Ok(self.list()?.into_iter().filter(|p| p.is_active).collect())
    }

    /// Insert or replace by `BASE/QUOTE`. The running volume of an existing
    /// pair is preserved.
    pub fn upsert(&self, pair: &TradingPair) -> DbResult<TradingPair> {
        self.db.write(|txn| {
            let mut table = txn.open_table(TRADING_PAIRS)?;
            let key = pair.symbol();
            let mut next = pair.clone();
            if let Some(existing) = get_json::<TradingPair, _>(&table, &key)? {
                next.daily_volume = existing.daily_volume;
                next.volume_date = existing.volume_date;
            }
            put_json(&mut table, &key, &next)?;
            Ok(next)
        })
    }

    pub(crate) fn add_volume_in(
        txn: &WriteTransaction,
        base: &str,
        quote: &str,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> DbResult<TradingPair> {
        let mut table = txn.open_table(TRADING_PAIRS)?;
        let key = TradingPair::key(base, quote);
        let mut pair: TradingPair = get_json(&table, &key)?
            .ok_or_else(|| DbError::NotFound(format!("Trading pair {key}")))?;
        pair.add_volume(amount, now);
        put_json(&mut table, &key, &pair)?;
        Ok(pair)
    }

    pub fn exists(&self, base: &str, quote: &str) -> DbResult<bool> {
        self.db.read(|txn| {
            Ok::<_, DbError>(
                txn.open_table(TRADING_PAIRS)?
                    .get(TradingPair::key(base, quote).as_str())?
                    .is_some(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{core_db, sample_pair};
    use rust_decimal_macros::dec;

    #[test]
    fn upsert_preserves_volume() {
        let (db, _dir) = core_db();
        let repo = TradingPairRepository::new(&db);
        let mut pair = sample_pair("ETH", "SOL", dec!(50));
        pair.daily_volume = dec!(3);
        repo.upsert(&pair).unwrap();

        let mut changed = sample_pair("eth", "sol", dec!(55));
        changed.daily_volume = Decimal::ZERO;
        let stored = repo.upsert(&changed).unwrap();
        assert_eq!(stored.daily_volume, dec!(3));
        assert_eq!(repo.get("ETH", "SOL").unwrap().unwrap().exchange_rate, dec!(55));
        assert!(repo.exists("ETH", "SOL").unwrap());
        assert!(!repo.exists("SOL", "ETH").unwrap());
    }

    #[test]
    fn volume_resets_on_new_day() {
        let mut pair = sample_pair("ETH", "SOL", dec!(50));
        let day1 = pair.last_updated;
        pair.add_volume(dec!(1), day1);
        pair.add_volume(dec!(2), day1);
        assert_eq!(pair.daily_volume, dec!(3));

        pair.add_volume(dec!(1), day1 + chrono::Duration::days(1));
        assert_eq!(pair.daily_volume, dec!(1));
    }

    #[test]
    fn list_active_skips_disabled_pairs() {
        let (db, _dir) = core_db();
        let repo = TradingPairRepository::new(&db);
        repo.upsert(&sample_pair("ETH", "SOL", dec!(50))).unwrap();
        let mut off = sample_pair("BTC", "ETH", dec!(15));
        off.is_active = false;
        repo.upsert(&off).unwrap();
        assert_eq!(repo.list().unwrap().len(), 2);
        assert_eq!(repo.list_active().unwrap().len(), 1);
    }
}
