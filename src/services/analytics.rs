// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Portfolio valuation and historical performance in USD.
//!
//! Everything is computed with decimals from stored balances, current rates
//! and OHLCV closes. A chain without a known price contributes zero value.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::Chain;
use crate::clock::Clock;
use crate::storage::{CandleInterval, Databases, RateRepository, WalletRepository, WalletStatus};

use super::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum PerformancePeriod {
    #[serde(rename = "24h")]
    Day,
    #[default]
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
    #[serde(rename = "1y")]
    Year,
    #[serde(rename = "all")]
    All,
}

impl PerformancePeriod {
    /// Candle interval used for the series.
    pub fn interval(&self) -> CandleInterval {
        match self {
            PerformancePeriod::Day => CandleInterval::OneHour,
            PerformancePeriod::Week => CandleInterval::FourHours,
            PerformancePeriod::Month | PerformancePeriod::Quarter => CandleInterval::OneDay,
            PerformancePeriod::Year | PerformancePeriod::All => CandleInterval::OneWeek,
        }
    }

    fn lookback(&self) -> Option<Duration> {
        match self {
            PerformancePeriod::Day => Some(Duration::hours(24)),
            PerformancePeriod::Week => Some(Duration::days(7)),
            PerformancePeriod::Month => Some(Duration::days(30)),
            PerformancePeriod::Quarter => Some(Duration::days(90)),
            PerformancePeriod::Year => Some(Duration::days(365)),
            PerformancePeriod::All => None,
        }
    }
}

impl FromStr for PerformancePeriod {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24h" => Ok(PerformancePeriod::Day),
            "7d" => Ok(PerformancePeriod::Week),
            "30d" => Ok(PerformancePeriod::Month),
            "90d" => Ok(PerformancePeriod::Quarter),
            "1y" => Ok(PerformancePeriod::Year),
            "all" => Ok(PerformancePeriod::All),
            other => Err(ServiceError::validation(
                "period",
                format!("unknown period '{other}', expected one of 24h,7d,30d,90d,1y,all"),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WalletValuation {
    pub wallet_id: String,
    pub chain: Chain,
    pub label: String,
    #[schema(value_type = String)]
    pub balance: Decimal,
    #[schema(value_type = Option<String>)]
    pub price_usd: Option<Decimal>,
    #[schema(value_type = String)]
    pub value_usd: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChainAllocation {
    pub chain: Chain,
    #[schema(value_type = String)]
    pub balance: Decimal,
    #[schema(value_type = String)]
    pub value_usd: Decimal,
    /// Share of the total portfolio value, 0-100
    #[schema(value_type = String)]
    pub percentage: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PortfolioSummary {
    #[schema(value_type = String)]
    pub total_value_usd: Decimal,
    #[schema(value_type = String)]
    pub change_24h_usd: Decimal,
    #[schema(value_type = String)]
    pub change_24h_percent: Decimal,
    pub wallet_count: usize,
    pub wallets: Vec<WalletValuation>,
    pub allocation: Vec<ChainAllocation>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PerformancePoint {
    pub timestamp: DateTime<Utc>,
    #[schema(value_type = String)]
    pub value_usd: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PerformanceReport {
    pub period: PerformancePeriod,
    pub interval: CandleInterval,
    pub points: Vec<PerformancePoint>,
    #[schema(value_type = String)]
    pub start_value_usd: Decimal,
    #[schema(value_type = String)]
    pub end_value_usd: Decimal,
    #[schema(value_type = String)]
    pub change_usd: Decimal,
    #[schema(value_type = String)]
    pub change_percent: Decimal,
}

pub struct AnalyticsService {
    dbs: Arc<Databases>,
    clock: Arc<dyn Clock>,
}

impl AnalyticsService {
    pub fn new(dbs: Arc<Databases>, clock: Arc<dyn Clock>) -> Self {
        Self { dbs, clock }
    }

    /// Current balance per chain over the user's active wallets.
    fn holdings(&self, user_id: &str) -> ServiceResult<BTreeMap<Chain, Decimal>> {
        let mut holdings = BTreeMap::new();
        for wallet in WalletRepository::new(&self.dbs.core).list_by_user(user_id)? {
            if wallet.status == WalletStatus::Active {
                *holdings.entry(wallet.chain).or_insert(Decimal::ZERO) += wallet.balance;
            }
        }
        Ok(holdings)
    }

    pub fn portfolio(&self, user_id: &str) -> ServiceResult<PortfolioSummary> {
        let rates = RateRepository::new(&self.dbs.rates);
        let mut prices = HashMap::new();
        let mut wallets = Vec::new();
        let mut by_chain: BTreeMap<Chain, (Decimal, Decimal)> = BTreeMap::new();
        let (mut total, mut previous_total) = (Decimal::ZERO, Decimal::ZERO);

        for wallet in WalletRepository::new(&self.dbs.core).list_by_user(user_id)? {
            if wallet.status != WalletStatus::Active {
                continue;
            }
            let rate = match prices.get(&wallet.chain) {
                Some(rate) => Option::clone(rate),
                None => {
                    let rate = rates.get(wallet.chain.symbol())?;
                    prices.insert(wallet.chain, rate.clone());
                    rate
                }
            };
            let value = rate.as_ref().map_or(Decimal::ZERO, |r| wallet.balance * r.price_usd);
            total += value;
            previous_total += rate
                .as_ref()
                .and_then(|r| value_24h_ago(value, r.price_change_24h))
                .unwrap_or(value);

            let slot = by_chain.entry(wallet.chain).or_insert((Decimal::ZERO, Decimal::ZERO));
            slot.0 += wallet.balance;
            slot.1 += value;
            wallets.push(WalletValuation {
                wallet_id: wallet.id,
                chain: wallet.chain,
                label: wallet.label,
                balance: wallet.balance,
                price_usd: rate.map(|r| r.price_usd),
                value_usd: value,
            });
        }

        let allocation = by_chain
            .into_iter()
            .map(|(chain, (balance, value_usd))| ChainAllocation {
                chain,
                balance,
                value_usd,
                percentage: percent_of(value_usd, total),
            })
            .collect();
        let change = total - previous_total;
        Ok(PortfolioSummary {
            total_value_usd: total,
            change_24h_usd: change,
            change_24h_percent: percent_of(change, previous_total),
            wallet_count: wallets.len(),
            wallets,
            allocation,
            updated_at: self.clock.now(),
        })
    }

    /// Value of the current holdings priced at each historical close.
    pub fn performance(&self, user_id: &str, period: PerformancePeriod) -> ServiceResult<PerformanceReport> {
        let now = self.clock.now();
        let from = period
            .lookback()
            .map(|d| now - d)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let interval = period.interval();
        let rates = RateRepository::new(&self.dbs.rates);

        let mut timestamps = BTreeSet::new();
        let mut series = Vec::new();
        for (chain, amount) in self.holdings(user_id)? {
            if amount.is_zero() {
                continue;
            }
            let closes: BTreeMap<DateTime<Utc>, Decimal> = rates
                .history(chain.symbol(), interval, interval.bucket_start(from), now)?
                .into_iter()
                .map(|c| (c.timestamp, c.close))
                .collect();
            timestamps.extend(closes.keys().copied());
            series.push((amount, closes));
        }

        let points: Vec<PerformancePoint> = timestamps
            .into_iter()
            .map(|timestamp| {
                let value_usd: Decimal = series
                    .iter()
                    .filter_map(|(amount, closes)| {
                        closes.range(..=timestamp).next_back().map(|(_, close)| *amount * *close)
                    })
                    .sum();
                PerformancePoint { timestamp, value_usd }
            })
            .collect();

        let start = points.first().map_or(Decimal::ZERO, |p| p.value_usd);
        let end = points.last().map_or(Decimal::ZERO, |p| p.value_usd);
        Ok(PerformanceReport {
            period,
            interval,
            points,
            start_value_usd: start,
            end_value_usd: end,
            change_usd: end - start,
            change_percent: percent_of(end - start, start),
        })
    }
}

/// Value before a `change_pct` % move that produced `value`.
fn value_24h_ago(value: Decimal, change_pct: Decimal) -> Option<Decimal> {
    let factor = Decimal::ONE_HUNDRED + change_pct;
    if factor <= Decimal::ZERO {
        return None;
    }
    value.checked_mul(Decimal::ONE_HUNDRED)?.checked_div(factor)
}

fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        return Decimal::ZERO;
    }
    (part * Decimal::ONE_HUNDRED / whole).round_dp(4).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::test_support::{databases, sample_wallet};
    use crate::storage::ExchangeRate;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn rate(symbol: &str, price: Decimal, change: Decimal, at: DateTime<Utc>) -> ExchangeRate {
        ExchangeRate {
            symbol: symbol.into(),
            price_usd: price,
            price_change_24h: change,
            volume_24h: Decimal::ZERO,
            market_cap: Decimal::ZERO,
            last_updated: at,
        }
    }

    fn setup(now: DateTime<Utc>) -> (AnalyticsService, Arc<Databases>, tempfile::TempDir) {
        let (dbs, dir) = databases();
        let dbs = Arc::new(dbs);
        let wallets = WalletRepository::new(&dbs.core);
        let mut eth = sample_wallet("w1", "u1", Chain::Eth, "0x1");
        eth.balance = dec!(2);
        let mut sol = sample_wallet("w2", "u1", Chain::Sol, "So1");
        sol.balance = dec!(10);
        let mut xlm = sample_wallet("w3", "u1", Chain::Xlm, "GXLM");
        xlm.balance = dec!(100);
        for w in [&eth, &sol, &xlm] {
            wallets.create(w).unwrap();
        }
        let service = AnalyticsService::new(dbs.clone(), Arc::new(ManualClock::new(now)));
        (service, dbs, dir)
    }

    #[test]
    fn portfolio_values_and_allocates() {
        let now = Utc::now();
        let (service, dbs, _dir) = setup(now);
        let rates = RateRepository::new(&dbs.rates);
        rates.upsert(&rate("ETH", dec!(2000), dec!(0), now)).unwrap();
        rates.upsert(&rate("SOL", dec!(100), dec!(0), now)).unwrap();

        let summary = service.portfolio("u1").unwrap();
        assert_eq!(summary.wallet_count, 3);
        assert_eq!(summary.total_value_usd, dec!(5000));
        let xlm = summary.wallets.iter().find(|w| w.chain == Chain::Xlm).unwrap();
        assert_eq!(xlm.value_usd, Decimal::ZERO);
        assert!(xlm.price_usd.is_none());
        let eth = summary.allocation.iter().find(|a| a.chain == Chain::Eth).unwrap();
        assert_eq!(eth.percentage, dec!(80));
        assert_eq!(summary.change_24h_usd, Decimal::ZERO);
    }

    #[test]
    fn portfolio_change_is_value_weighted() {
        let now = Utc::now();
        let (service, dbs, _dir) = setup(now);
        let rates = RateRepository::new(&dbs.rates);
        // 4000 now after +25 %, i.e. 3200 a day ago
        rates.upsert(&rate("ETH", dec!(2000), dec!(25), now)).unwrap();
        let summary = service.portfolio("u1").unwrap();
        assert_eq!(summary.total_value_usd, dec!(4000));
        assert_eq!(summary.change_24h_usd, dec!(800));
        assert_eq!(summary.change_24h_percent, dec!(25));
    }

    #[test]
    fn performance_prices_holdings_at_closes() {
        let now = Utc.with_ymd_and_hms(2026, 5, 10, 12, 30, 0).unwrap();
        let (service, dbs, _dir) = setup(now);
        let rates = RateRepository::new(&dbs.rates);
        for (hours_ago, price) in [(3, dec!(1000)), (2, dec!(1100)), (1, dec!(1200))] {
            rates
                .merge_tick(&rate("ETH", price, Decimal::ZERO, now - Duration::hours(hours_ago)))
                .unwrap();
        }

        let report = service.performance("u1", PerformancePeriod::Day).unwrap();
        assert_eq!(report.interval, CandleInterval::OneHour);
        assert_eq!(report.points.len(), 3);
        assert_eq!(report.start_value_usd, dec!(2000));
        assert_eq!(report.end_value_usd, dec!(2400));
        assert_eq!(report.change_usd, dec!(400));
        assert_eq!(report.change_percent, dec!(20));
    }

    #[test]
    fn periods_parse() {
        assert_eq!("24h".parse::<PerformancePeriod>().unwrap(), PerformancePeriod::Day);
        assert_eq!("all".parse::<PerformancePeriod>().unwrap().interval(), CandleInterval::OneWeek);
        assert!("2d".parse::<PerformancePeriod>().is_err());
    }
}
