// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the [`AppConfig`] parsed from
//! them once at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SERVER_HOST` | Server bind address | `0.0.0.0` |
//! | `SERVER_PORT` | Server bind port | `8080` |
//! | `JWT_SECRET` | HS256 signing secret | Required |
//! | `JWT_ISSUER` | Issuer claim set and expected on tokens | `crypto-wallet` |
//! | `JWT_AUDIENCE` | Audience claim | Optional |
//! | `JWT_LEEWAY` | Clock skew tolerated on `exp`/`iat` | `30s` |
//! | `DATA_DIR` | Directory for database files without an explicit DSN | `./data` |
//! | `CORE_DB_DSN` | Wallets, transactions, ledger, exchange, users | `$DATA_DIR/core.redb` |
//! | `KYC_DB_DSN` | KYC profiles, documents, risk scores | `$DATA_DIR/kyc.redb` |
//! | `RATES_DB_DSN` | Current rates and OHLCV history | `$DATA_DIR/rates.redb` |
//! | `AUDIT_DB_DSN` | Audit events | `$DATA_DIR/audit.redb` |
//! | `WALLET_ENCRYPTION_KEY` | base64 32-byte key for wallet private keys | Ephemeral |
//! | `KYC_ENCRYPTION_KEY` | base64 32-byte key for KYC PII | Required |
//! | `{BTC,ETH,SOL,XLM}_RPC_URL` | Chain endpoint | Public endpoint per network |
//! | `{BTC,ETH,SOL,XLM}_CONFIRMATIONS` | Finality threshold | 3 / 12 / 32 / 1 |
//! | `{BTC,ETH,SOL,XLM}_NETWORK` | `mainnet` or `testnet` | `testnet` |
//! | `RATE_LIMIT_ENABLED` | Per IP+path limiter | `true` |
//! | `RATE_LIMIT_REQUESTS` | Requests per window | `100` |
//! | `RATE_LIMIT_WINDOW` | Window (`1m`, `60s`, `500ms`) | `1m` |
//! | `PRICE_API_URL` | Upstream price provider | `https://api.coingecko.com/api/v3` |
//! | `PRICE_FEED_SYMBOLS` | Comma-separated symbols | `BTC,ETH,SOL,XLM` |
//! | `PRICE_FEED_INTERVAL_SECS` | Price tick interval | `5` |
//! | `MONITOR_INTERVAL_SECS` | Transaction monitor interval | `10` |
//! | `QUOTE_SWEEP_INTERVAL_SECS` | Expired quote sweep interval | `30` |
//! | `CORS_ALLOWED_ORIGINS` | Comma-separated origins | Permissive |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::blockchain::{Chain, Network};
use crate::crypto::{CryptoError, KeyEncryptor};

pub const SERVER_HOST_ENV: &str = "SERVER_HOST";
pub const SERVER_PORT_ENV: &str = "SERVER_PORT";
pub const JWT_SECRET_ENV: &str = "JWT_SECRET";
pub const JWT_ISSUER_ENV: &str = "JWT_ISSUER";
pub const JWT_AUDIENCE_ENV: &str = "JWT_AUDIENCE";
pub const JWT_LEEWAY_ENV: &str = "JWT_LEEWAY";

/// Environment variable name for the database directory.
///
/// Used only for databases whose `*_DB_DSN` is unset.
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const DEFAULT_DATA_DIR: &str = "./data";

pub const WALLET_ENCRYPTION_KEY_ENV: &str = "WALLET_ENCRYPTION_KEY";
pub const KYC_ENCRYPTION_KEY_ENV: &str = "KYC_ENCRYPTION_KEY";

pub const RATE_LIMIT_ENABLED_ENV: &str = "RATE_LIMIT_ENABLED";
pub const RATE_LIMIT_REQUESTS_ENV: &str = "RATE_LIMIT_REQUESTS";
pub const RATE_LIMIT_WINDOW_ENV: &str = "RATE_LIMIT_WINDOW";

pub const PRICE_API_URL_ENV: &str = "PRICE_API_URL";
pub const DEFAULT_PRICE_API_URL: &str = "https://api.coingecko.com/api/v3";
pub const PRICE_FEED_SYMBOLS_ENV: &str = "PRICE_FEED_SYMBOLS";
pub const PRICE_FEED_INTERVAL_ENV: &str = "PRICE_FEED_INTERVAL_SECS";
pub const MONITOR_INTERVAL_ENV: &str = "MONITOR_INTERVAL_SECS";
pub const QUOTE_SWEEP_INTERVAL_ENV: &str = "QUOTE_SWEEP_INTERVAL_SECS";
pub const CORS_ALLOWED_ORIGINS_ENV: &str = "CORS_ALLOWED_ORIGINS";

/// Logging format (`json` or `pretty`), read directly by `main`.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Quotes are valid for this long after issuance.
pub const QUOTE_TTL_SECS: i64 = 60;

/// Price records older than this are reported stale.
pub const PRICE_STALE_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },

    #[error("invalid encryption key in {name}: {source}")]
    Key {
        name: &'static str,
        #[source]
        source: CryptoError,
    },
}

impl ConfigError {
    fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Per-chain adapter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub confirmations: u64,
    pub network: Network,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: Option<String>,
    pub leeway: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests: u32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct PriceFeedConfig {
    pub api_url: String,
    pub symbols: Vec<String>,
    pub interval: Duration,
}

/// Resolved redb file locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabasePaths {
    pub core: PathBuf,
    pub kyc: PathBuf,
    pub rates: PathBuf,
    pub audit: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt: JwtConfig,
    pub databases: DatabasePaths,
    /// `None` means a fresh key is generated per process.
    pub wallet_key: Option<String>,
    pub kyc_key: String,
    pub chains: HashMap<Chain, ChainConfig>,
    pub rate_limit: RateLimitConfig,
    pub price_feed: PriceFeedConfig,
    pub monitor_interval: Duration,
    pub quote_sweep_interval: Duration,
    pub cors_origins: Vec<String>,
}

/// Default (mainnet, testnet) endpoint for a chain.
fn default_rpc_url(chain: Chain, network: Network) -> &'static str {
    match (chain, network) {
        (Chain::Btc, Network::Mainnet) => "https://blockstream.info/api",
        (Chain::Btc, Network::Testnet) => "https://blockstream.info/testnet/api",
        (Chain::Eth, Network::Mainnet) => "https://ethereum-rpc.publicnode.com",
        (Chain::Eth, Network::Testnet) => "https://ethereum-sepolia-rpc.publicnode.com",
        (Chain::Sol, Network::Mainnet) => "https://api.mainnet-beta.solana.com",
        (Chain::Sol, Network::Testnet) => "https://api.devnet.solana.com",
        (Chain::Xlm, Network::Mainnet) => "https://horizon.stellar.org",
        (Chain::Xlm, Network::Testnet) => "https://horizon-testnet.stellar.org",
    }
}

fn default_confirmations(chain: Chain) -> u64 {
    match chain {
        Chain::Btc => 3,
        Chain::Eth => 12,
        Chain::Sol => 32,
        Chain::Xlm => 1,
    }
}

/// Parse `1m`, `60s`, `500ms`, `2h` or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;
    match unit.trim() {
        "" | "s" => Some(Duration::from_secs(value)),
        "ms" => Some(Duration::from_millis(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// A `redb://` prefix is accepted and stripped.
fn dsn_path(raw: &str) -> PathBuf {
    PathBuf::from(raw.trim().strip_prefix("redb://").unwrap_or(raw.trim()))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let host = get(SERVER_HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = match get(SERVER_PORT_ENV) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid(SERVER_PORT_ENV, format!("`{raw}` is not a port")))?,
            None => 8080,
        };
        let bind_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|_| ConfigError::invalid(SERVER_HOST_ENV, format!("`{host}` is not an address")))?;

        let jwt = JwtConfig {
            secret: get(JWT_SECRET_ENV).ok_or(ConfigError::Missing(JWT_SECRET_ENV))?,
            issuer: get(JWT_ISSUER_ENV).unwrap_or_else(|| "crypto-wallet".to_string()),
            audience: get(JWT_AUDIENCE_ENV),
            leeway: match get(JWT_LEEWAY_ENV) {
                Some(raw) => parse_duration(&raw)
                    .ok_or_else(|| ConfigError::invalid(JWT_LEEWAY_ENV, format!("`{raw}`")))?,
                None => Duration::from_secs(30),
            },
        };

        let data_dir = PathBuf::from(get(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()));
        let db = |env: &str, file: &str| {
            get(env)
                .map(|raw| dsn_path(&raw))
                .unwrap_or_else(|| data_dir.join(file))
        };
        let databases = DatabasePaths {
            core: db("CORE_DB_DSN", "core.redb"),
            kyc: db("KYC_DB_DSN", "kyc.redb"),
            rates: db("RATES_DB_DSN", "rates.redb"),
            audit: db("AUDIT_DB_DSN", "audit.redb"),
        };

        let wallet_key = get(WALLET_ENCRYPTION_KEY_ENV);
        if let Some(key) = &wallet_key {
            KeyEncryptor::from_base64(key).map_err(|source| ConfigError::Key {
                name: WALLET_ENCRYPTION_KEY_ENV,
                source,
            })?;
        }
        let kyc_key = get(KYC_ENCRYPTION_KEY_ENV).ok_or(ConfigError::Missing(KYC_ENCRYPTION_KEY_ENV))?;
        KeyEncryptor::from_base64(&kyc_key).map_err(|source| ConfigError::Key {
            name: KYC_ENCRYPTION_KEY_ENV,
            source,
        })?;

        let mut chains = HashMap::new();
        for chain in Chain::ALL {
            let prefix = chain.symbol();
            let network_var = format!("{prefix}_NETWORK");
            let network = match get(&network_var) {
                Some(raw) => raw
                    .parse::<Network>()
                    .map_err(|reason| ConfigError::invalid(&network_var, reason))?,
                None => Network::Testnet,
            };
            let confirmations_var = format!("{prefix}_CONFIRMATIONS");
            let confirmations = match get(&confirmations_var) {
                Some(raw) => raw.trim().parse().map_err(|_| {
                    ConfigError::invalid(&confirmations_var, format!("`{raw}` is not a number"))
                })?,
                None => default_confirmations(chain),
            };
            let rpc_url = get(&format!("{prefix}_RPC_URL"))
                .unwrap_or_else(|| default_rpc_url(chain, network).to_string());
            chains.insert(
                chain,
                ChainConfig {
                    rpc_url,
                    confirmations,
                    network,
                },
            );
        }

        let rate_limit = RateLimitConfig {
            enabled: match get(RATE_LIMIT_ENABLED_ENV) {
                Some(raw) => parse_bool(&raw)
                    .ok_or_else(|| ConfigError::invalid(RATE_LIMIT_ENABLED_ENV, format!("`{raw}`")))?,
                None => true,
            },
            requests: match get(RATE_LIMIT_REQUESTS_ENV) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| ConfigError::invalid(RATE_LIMIT_REQUESTS_ENV, format!("`{raw}`")))?,
                None => 100,
            },
            window: match get(RATE_LIMIT_WINDOW_ENV) {
                Some(raw) => parse_duration(&raw)
                    .filter(|d| !d.is_zero())
                    .ok_or_else(|| ConfigError::invalid(RATE_LIMIT_WINDOW_ENV, format!("`{raw}`")))?,
                None => Duration::from_secs(60),
            },
        };

        let seconds = |name: &str, default: u64| -> Result<Duration, ConfigError> {
            match get(name) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|n| *n > 0)
                    .map(Duration::from_secs)
                    .ok_or_else(|| ConfigError::invalid(name, format!("`{raw}` is not a positive number"))),
                None => Ok(Duration::from_secs(default)),
            }
        };

        let price_feed = PriceFeedConfig {
            api_url: get(PRICE_API_URL_ENV).unwrap_or_else(|| DEFAULT_PRICE_API_URL.to_string()),
            symbols: get(PRICE_FEED_SYMBOLS_ENV)
                .map(|raw| split_list(&raw.to_ascii_uppercase()))
                .unwrap_or_else(|| Chain::ALL.iter().map(|c| c.symbol().to_string()).collect()),
            interval: seconds(PRICE_FEED_INTERVAL_ENV, 5)?,
        };

        Ok(Self {
            bind_addr,
            jwt,
            databases,
            wallet_key,
            kyc_key,
            chains,
            rate_limit,
            price_feed,
            monitor_interval: seconds(MONITOR_INTERVAL_ENV, 10)?,
            quote_sweep_interval: seconds(QUOTE_SWEEP_INTERVAL_ENV, 30)?,
            cors_origins: get(CORS_ALLOWED_ORIGINS_ENV)
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_with_required_values_only() {
        let config = AppConfig::from_lookup(lookup(&[
            (JWT_SECRET_ENV, "secret"),
            (KYC_ENCRYPTION_KEY_ENV, KEY),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.jwt.issuer, "crypto-wallet");
        assert_eq!(config.jwt.leeway, Duration::from_secs(30));
        assert!(config.wallet_key.is_none());
        assert_eq!(config.databases.core, PathBuf::from("./data/core.redb"));
        assert_eq!(config.rate_limit.requests, 100);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));

        let eth = &config.chains[&Chain::Eth];
        assert_eq!(eth.network, Network::Testnet);
        assert_eq!(eth.confirmations, 12);
        assert!(eth.rpc_url.contains("sepolia"));
        assert_eq!(config.price_feed.symbols, vec!["BTC", "ETH", "SOL", "XLM"]);
    }

    #[test]
    fn missing_secrets_are_reported() {
        let err = AppConfig::from_lookup(lookup(&[(KYC_ENCRYPTION_KEY_ENV, KEY)])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(JWT_SECRET_ENV)));

        let err = AppConfig::from_lookup(lookup(&[(JWT_SECRET_ENV, "s")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(KYC_ENCRYPTION_KEY_ENV)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let base = [(JWT_SECRET_ENV, "s"), (KYC_ENCRYPTION_KEY_ENV, KEY)];

        let mut vars = base.to_vec();
        vars.push((SERVER_PORT_ENV, "eighty"));
        assert!(AppConfig::from_lookup(lookup(&vars)).is_err());

        let mut vars = base.to_vec();
        vars.push(("SOL_NETWORK", "moonnet"));
        assert!(AppConfig::from_lookup(lookup(&vars)).is_err());

        let mut vars = base.to_vec();
        vars.push((WALLET_ENCRYPTION_KEY_ENV, "c2hvcnQ="));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&vars)).unwrap_err(),
            ConfigError::Key { .. }
        ));
    }

    #[test]
    fn dsn_and_chain_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            (JWT_SECRET_ENV, "s"),
            (KYC_ENCRYPTION_KEY_ENV, KEY),
            ("CORE_DB_DSN", "redb:///var/lib/wallet/core.redb"),
            ("BTC_NETWORK", "mainnet"),
            ("BTC_CONFIRMATIONS", "6"),
            (RATE_LIMIT_WINDOW_ENV, "500ms"),
        ]))
        .unwrap();
        assert_eq!(config.databases.core, PathBuf::from("/var/lib/wallet/core.redb"));
        let btc = &config.chains[&Chain::Btc];
        assert_eq!(btc.network, Network::Mainnet);
        assert_eq!(btc.confirmations, 6);
        assert_eq!(btc.rpc_url, "https://blockstream.info/api");
        assert_eq!(config.rate_limit.window, Duration::from_millis(500));
    }

    #[test]
    fn durations_parse_common_suffixes() {
        assert_eq!(parse_duration("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("fast"), None);
    }
}
