// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Current exchange rates and OHLCV history (rates database).
//!
//! ## Table Layout
//!
//! - `exchange_rates`: SYMBOL → JSON [`ExchangeRate`]
//! - `price_history`: `SYMBOL|interval|bucket_ts` → JSON [`PriceCandle`]

use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use redb::{ReadableTable, TableDefinition};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::database::{all_json, get_json, put_json, ts_key, Database, DbError, DbResult, JsonTable};

pub(crate) const EXCHANGE_RATES: JsonTable = TableDefinition::new("exchange_rates");
pub(crate) const PRICE_HISTORY: JsonTable = TableDefinition::new("price_history");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExchangeRate {
    pub symbol: String,
    #[schema(value_type = String)]
    pub price_usd: Decimal,
    /// Percent change over 24h, signed
    #[schema(value_type = String)]
    pub price_change_24h: Decimal,
    #[schema(value_type = String)]
    pub volume_24h: Decimal,
    #[schema(value_type = String)]
    pub market_cap: Decimal,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum CandleInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
}

impl CandleInterval {
    pub const ALL: [CandleInterval; 7] = [
        CandleInterval::OneMinute,
        CandleInterval::FiveMinutes,
        CandleInterval::FifteenMinutes,
        CandleInterval::OneHour,
        CandleInterval::FourHours,
        CandleInterval::OneDay,
        CandleInterval::OneWeek,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "1m",
            CandleInterval::FiveMinutes => "5m",
            CandleInterval::FifteenMinutes => "15m",
            CandleInterval::OneHour => "1h",
            CandleInterval::FourHours => "4h",
            CandleInterval::OneDay => "1d",
            CandleInterval::OneWeek => "1w",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            CandleInterval::OneMinute => Duration::minutes(1),
            CandleInterval::FiveMinutes => Duration::minutes(5),
            CandleInterval::FifteenMinutes => Duration::minutes(15),
            CandleInterval::OneHour => Duration::hours(1),
            CandleInterval::FourHours => Duration::hours(4),
            CandleInterval::OneDay => Duration::days(1),
            CandleInterval::OneWeek => Duration::weeks(1),
        }
    }

    /// Start of the bucket containing `at`, aligned to the Unix epoch.
    pub fn bucket_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let width = self.duration().num_seconds();
        let secs = at.timestamp();
        let start = secs - secs.rem_euclid(width);
        Utc.timestamp_opt(start, 0).single().unwrap_or(at)
    }
}

impl FromStr for CandleInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CandleInterval::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| format!("unknown interval '{s}', expected one of 1m,5m,15m,1h,4h,1d,1w"))
    }
}

impl std::fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PriceCandle {
    pub symbol: String,
    pub interval: CandleInterval,
    /// Bucket start
    pub timestamp: DateTime<Utc>,
    #[schema(value_type = String)]
    pub open: Decimal,
    #[schema(value_type = String)]
    pub high: Decimal,
    #[schema(value_type = String)]
    pub low: Decimal,
    #[schema(value_type = String)]
    pub close: Decimal,
    #[schema(value_type = String)]
    pub volume: Decimal,
}

fn candle_key(symbol: &str, interval: CandleInterval, bucket: DateTime<Utc>) -> String {
    format!(
        "{symbol}|{interval}|{}",
        ts_key(bucket.timestamp_nanos_opt().unwrap_or_default())
    )
}

pub struct RateRepository<'a> {
    db: &'a Database,
}

impl<'a> RateRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert or replace the current rate of a symbol.
    pub fn upsert(&self, rate: &ExchangeRate) -> DbResult<()> {
        if rate.price_usd <= Decimal::ZERO {
            return Err(DbError::Conflict(format!(
                "rate for {} must be positive",
                rate.symbol
            )));
        }
        self.db.write(|txn| {
            put_json(&mut txn.open_table(EXCHANGE_RATES)?, &rate.symbol, rate)
        })
    }

    pub fn get(&self, symbol: &str) -> DbResult<Option<ExchangeRate>> {
        self.db
            .read(|txn| get_json(&txn.open_table(EXCHANGE_RATES)?, &symbol.to_uppercase()))
    }

    pub fn list(&self) -> DbResult<Vec<ExchangeRate>> {
        self.db.read(|txn| all_json(&txn.open_table(EXCHANGE_RATES)?))
    }

    /// Fold a tick into the candle of every interval in one write.
    pub fn merge_tick(&self, rate: &ExchangeRate) -> DbResult<()> {
        self.db.write(|txn| {
            let mut history = txn.open_table(PRICE_HISTORY)?;
            for interval in CandleInterval::ALL {
                let bucket = interval.bucket_start(rate.last_updated);
                let key = candle_key(&rate.symbol, interval, bucket);
                let candle = match get_json::<PriceCandle, _>(&history, &key)? {
                    Some(mut c) => {
                        c.high = c.high.max(rate.price_usd);
                        c.low = c.low.min(rate.price_usd);
                        c.close = rate.price_usd;
                        c.volume = rate.volume_24h;
                        c
                    }
                    None => PriceCandle {
                        symbol: rate.symbol.clone(),
                        interval,
                        timestamp: bucket,
                        open: rate.price_usd,
                        high: rate.price_usd,
                        low: rate.price_usd,
                        close: rate.price_usd,
                        volume: rate.volume_24h,
                    },
                };
                put_json(&mut history, &key, &candle)?;
            }
            Ok(())
        })
    }

    /// Candles of one symbol and interval with bucket start in `[from, to]`,
    /// oldest first.
    pub fn history(
        &self,
        symbol: &str,
        interval: CandleInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<PriceCandle>> {
        if from > to {
            return Ok(Vec::new());
        }
        let symbol = symbol.to_uppercase();
        let start = candle_key(&symbol, interval, from);
        let end = candle_key(&symbol, interval, to);
        self.db.read(|txn| {
            let history = txn.open_table(PRICE_HISTORY)?;
            let mut out = Vec::new();
            for entry in history.range(start.as_str()..=end.as_str())? {
                let (_, value) = entry?;
                out.push(serde_json::from_slice(value.value())?);
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::rates_db;
    use rust_decimal_macros::dec;

    fn tick(symbol: &str, price: Decimal, at: DateTime<Utc>) -> ExchangeRate {
        ExchangeRate {
            symbol: symbol.into(),
            price_usd: price,
            price_change_24h: dec!(-1.5),
            volume_24h: dec!(1000),
            market_cap: dec!(5000000),
            last_updated: at,
        }
    }

    #[test]
    fn upsert_is_idempotent() {
        let (db, _dir) = rates_db();
        let repo = RateRepository::new(&db);
        let at = Utc::now();
        repo.upsert(&tick("BTC", dec!(30000.00), at)).unwrap();
        repo.upsert(&tick("BTC", dec!(30000.00), at)).unwrap();
        let rows = repo.list().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price_usd, dec!(30000.00));
        assert_eq!(repo.get("btc").unwrap().unwrap().last_updated, at);
    }

    #[test]
    fn non_positive_price_is_rejected() {
        let (db, _dir) = rates_db();
        let repo = RateRepository::new(&db);
        assert!(repo.upsert(&tick("BTC", Decimal::ZERO, Utc::now())).is_err());
    }

    #[test]
    fn ticks_merge_into_candles() {
        let (db, _dir) = rates_db();
        let repo = RateRepository::new(&db);
        let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 5).unwrap();
        repo.merge_tick(&tick("ETH", dec!(2000), t0)).unwrap();
        repo.merge_tick(&tick("ETH", dec!(2100), t0 + Duration::seconds(10))).unwrap();
        repo.merge_tick(&tick("ETH", dec!(1950), t0 + Duration::seconds(20))).unwrap();

        let hour = repo
            .history("ETH", CandleInterval::OneHour, t0 - Duration::hours(1), t0)
            .unwrap();
        assert_eq!(hour.len(), 1);
        let c = &hour[0];
        assert_eq!(c.timestamp, Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap());
        assert_eq!((c.open, c.high, c.low, c.close), (dec!(2000), dec!(2100), dec!(1950), dec!(1950)));

        // A new minute bucket opens at 10:01
        repo.merge_tick(&tick("ETH", dec!(2010), t0 + Duration::seconds(60))).unwrap();
        let minutes = repo
            .history("ETH", CandleInterval::OneMinute, t0 - Duration::hours(1), t0 + Duration::hours(1))
            .unwrap();
        assert_eq!(minutes.len(), 2);
        assert_eq!(minutes[1].open, dec!(2010));
    }

    #[test]
    fn interval_parsing() {
        assert_eq!("4h".parse::<CandleInterval>(), Ok(CandleInterval::FourHours));
        assert!("2h".parse::<CandleInterval>().is_err());
    }
}
