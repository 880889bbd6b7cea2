// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Upstream USD price sources.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::retry::Retryable;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum PriceProviderError {
    #[error("price provider unreachable: {0}")]
    Transport(String),

    #[error("price provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected price payload: {0}")]
    Payload(String),

    #[error("unsupported symbol {0}")]
    UnsupportedSymbol(String),
}

impl Retryable for PriceProviderError {
    fn is_retryable(&self) -> bool {
        match self {
            PriceProviderError::Transport(_) => true,
            PriceProviderError::Status { status, .. } => *status >= 500 || *status == 429,
            PriceProviderError::Payload(_) | PriceProviderError::UnsupportedSymbol(_) => false,
        }
    }
}

/// One symbol's market data at fetch time.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    pub symbol: String,
    pub price_usd: Decimal,
    pub price_change_24h: Decimal,
    pub volume_24h: Decimal,
    pub market_cap: Decimal,
}

#[async_trait]
pub trait PriceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Quotes for the requested symbols. Symbols the upstream does not
    /// report are omitted from the result.
    async fn fetch(&self, symbols: &[String]) -> Result<Vec<PriceQuote>, PriceProviderError>;
}

/// CoinGecko `simple/price` endpoint.
#[derive(Debug, Clone)]
pub struct CoinGeckoProvider {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SimplePrice {
    usd: Option<Decimal>,
    #[serde(default)]
    usd_24h_change: Option<Decimal>,
    #[serde(default)]
    usd_24h_vol: Option<Decimal>,
    #[serde(default)]
    usd_market_cap: Option<Decimal>,
}

fn coin_id(symbol: &str) -> Option<&'static str> {
    match symbol {
        "BTC" => Some("bitcoin"),
        "ETH" => Some("ethereum"),
        "SOL" => Some("solana"),
        "XLM" => Some("stellar"),
        _ => None,
    }
}

impl CoinGeckoProvider {
    pub fn new(base_url: &str) -> Result<Self, PriceProviderError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PriceProviderError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PriceProvider for CoinGeckoProvider {
    fn name(&self) -> &'static str {
        "coingecko"
    }

    async fn fetch(&self, symbols: &[String]) -> Result<Vec<PriceQuote>, PriceProviderError> {
        let mut ids = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let id = coin_id(symbol).ok_or_else(|| PriceProviderError::UnsupportedSymbol(symbol.clone()))?;
            ids.push((symbol.as_str(), id));
        }
        let joined = ids.iter().map(|(_, id)| *id).collect::<Vec<_>>().join(",");

        let response = self
            .client
            .get(format!("{}/simple/price", self.base_url))
            .query(&[
                ("ids", joined.as_str()),
                ("vs_currencies", "usd"),
                ("include_24hr_change", "true"),
                ("include_24hr_vol", "true"),
                ("include_market_cap", "true"),
            ])
            .send()
            .await
            .map_err(|e| PriceProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(PriceProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let mut payload: HashMap<String, SimplePrice> = response
            .json()
            .await
            .map_err(|e| PriceProviderError::Payload(e.to_string()))?;

        Ok(ids
            .into_iter()
            .filter_map(|(symbol, id)| {
                let entry = payload.remove(id)?;
                Some(PriceQuote {
                    symbol: symbol.to_string(),
                    price_usd: entry.usd?,
                    price_change_24h: entry.usd_24h_change.unwrap_or_default().round_dp(8),
                    volume_24h: entry.usd_24h_vol.unwrap_or_default(),
                    market_cap: entry.usd_market_cap.unwrap_or_default(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn parses_simple_price_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .and(query_param("ids", "bitcoin,stellar"))
            .and(query_param("vs_currencies", "usd"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bitcoin": {
                    "usd": 30000.5,
                    "usd_24h_change": -1.25,
                    "usd_24h_vol": 1500000000,
                    "usd_market_cap": 600000000000u64
                },
                "stellar": { "usd": 0.12 }
            })))
            .mount(&server)
            .await;

        let provider = CoinGeckoProvider::new(&server.uri()).unwrap();
        let quotes = provider.fetch(&symbols(&["BTC", "XLM"])).await.unwrap();
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].symbol, "BTC");
        assert_eq!(quotes[0].price_usd, dec!(30000.5));
        assert_eq!(quotes[0].price_change_24h, dec!(-1.25));
        assert_eq!(quotes[1].symbol, "XLM");
        assert_eq!(quotes[1].price_usd, dec!(0.12));
        assert_eq!(quotes[1].volume_24h, Decimal::ZERO);
    }

    #[tokio::test]
    async fn missing_coin_is_omitted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ethereum": { "usd": 2000 }
            })))
            .mount(&server)
            .await;

        let provider = CoinGeckoProvider::new(&server.uri()).unwrap();
        let quotes = provider.fetch(&symbols(&["ETH", "SOL"])).await.unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, "ETH");
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let provider = CoinGeckoProvider::new(&server.uri()).unwrap();
        let err = provider.fetch(&symbols(&["BTC"])).await.unwrap_err();
        assert!(matches!(err, PriceProviderError::Status { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unknown_symbol_is_rejected_locally() {
        let provider = CoinGeckoProvider::new("http://127.0.0.1:9").unwrap();
        let err = provider.fetch(&symbols(&["DOGE"])).await.unwrap_err();
        assert!(matches!(err, PriceProviderError::UnsupportedSymbol(_)));
        assert!(!err.is_retryable());
    }
}
