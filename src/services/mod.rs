// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Domain services.
//!
//! The engines own the business rules and are the only code that mutates
//! wallets, transactions, exchange operations and KYC profiles. HTTP
//! handlers translate requests into service calls and [`ServiceError`]s
//! into responses.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::auth::AuthError;
use crate::blockchain::{Chain, ChainError, UnsupportedChain};
use crate::crypto::CryptoError;
use crate::retry::RetryError;
use crate::storage::{AccessDenied, DbError, KycLevel};

pub mod analytics;
pub mod exchange;
pub mod kyc;
pub mod users;
pub mod wallets;

pub use analytics::{AnalyticsService, PerformancePeriod, PerformanceReport, PortfolioSummary};
pub use exchange::{ExchangeEngine, QuoteRequest, TradingPairInput};
pub use kyc::{DocumentUpload, KycEnforcer, KycService, KycStatusView, KycSubmission};
pub use users::{LoginRequest, LoginResponse, RegisterRequest, TwoFactorSetup, UserProfile, UserService};
pub use wallets::{SendRequest, WalletEngine, WalletFilter, WalletSort};

/// Domain failure taxonomy; every variant has a stable machine code.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{message}")]
    Validation { field: &'static str, message: String },

    #[error(transparent)]
    UnsupportedChain(#[from] UnsupportedChain),

    #[error("no adapter registered for {0}")]
    AdapterNotRegistered(Chain),

    #[error("wallet encryption key is not configured")]
    EncryptorNotConfigured,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("wallet {0} is not active")]
    WalletInactive(String),

    #[error("wallet is on {wallet} but the request targets {requested}")]
    ChainMismatch { wallet: Chain, requested: Chain },

    #[error("authentication required")]
    AuthRequired,

    #[error("a KYC profile is required for this operation")]
    ProfileRequired,

    #[error("approved KYC level '{required:?}' or higher is required")]
    LevelInsufficient { required: KycLevel },

    #[error("{0}")]
    Conflict(String),

    #[error("source and destination wallets must differ")]
    SameWallets,

    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: Decimal, requested: Decimal },

    #[error("trading pair {0} is not available")]
    InvalidTradingPair(String),

    #[error("amount is below the pair minimum of {0}")]
    AmountTooSmall(Decimal),

    #[error("amount is above the pair maximum of {0}")]
    AmountTooLarge(Decimal),

    #[error("quote expired")]
    QuoteExpired,

    #[error("cannot move from '{from}' to '{to}'")]
    InvalidStatus { from: String, to: String },

    #[error("{0}")]
    LimitExceeded(String),

    #[error("unsupported media type '{0}'")]
    UnsupportedMediaType(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("two-factor code required")]
    TwoFactorRequired,

    #[error("invalid two-factor code")]
    InvalidTwoFactorCode,

    #[error("chain adapter error: {0}")]
    Adapter(#[from] ChainError),

    #[error("encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("database error: {0}")]
    Database(DbError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        ServiceError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn invalid_status(from: impl ToString, to: impl ToString) -> Self {
        ServiceError::InvalidStatus {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation { .. } => "ValidationError",
            ServiceError::UnsupportedChain(_) => "UnsupportedChain",
            ServiceError::AdapterNotRegistered(_) => "AdapterNotRegistered",
            ServiceError::EncryptorNotConfigured => "EncryptorNotConfigured",
            ServiceError::NotFound(_) => "NotFound",
            ServiceError::Forbidden(_) => "Forbidden",
            ServiceError::WalletInactive(_) => "WalletInactive",
            ServiceError::ChainMismatch { .. } => "ChainMismatch",
            ServiceError::AuthRequired => "AuthRequired",
            ServiceError::ProfileRequired => "ProfileRequired",
            ServiceError::LevelInsufficient { .. } => "LevelInsufficient",
            ServiceError::Conflict(_) => "Conflict",
            ServiceError::SameWallets => "SameWallets",
            ServiceError::InsufficientBalance { .. } => "InsufficientBalance",
            ServiceError::InvalidTradingPair(_) => "InvalidTradingPair",
            ServiceError::AmountTooSmall(_) => "AmountTooSmall",
            ServiceError::AmountTooLarge(_) => "AmountTooLarge",
            ServiceError::QuoteExpired => "QuoteExpired",
            ServiceError::InvalidStatus { .. } => "InvalidStatus",
            ServiceError::LimitExceeded(_) => "LimitExceeded",
            ServiceError::UnsupportedMediaType(_) => "UnsupportedMediaType",
            ServiceError::PayloadTooLarge(_) => "PayloadTooLarge",
            ServiceError::InvalidCredentials => "InvalidCredentials",
            ServiceError::TwoFactorRequired => "TwoFactorRequired",
            ServiceError::InvalidTwoFactorCode => "InvalidTwoFactorCode",
            ServiceError::Adapter(_) => "AdapterError",
            ServiceError::Crypto(_) => "CryptoError",
            ServiceError::Database(_) => "DatabaseError",
            ServiceError::Cancelled => "Cancelled",
            ServiceError::Internal(_) => "Unexpected",
        }
    }
}

impl From<DbError> for ServiceError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => ServiceError::NotFound(what),
            DbError::Conflict(msg) => ServiceError::Conflict(msg),
            other => ServiceError::Database(other),
        }
    }
}

impl From<AccessDenied> for ServiceError {
    fn from(err: AccessDenied) -> Self {
        match err {
            AccessDenied::NotFound { resource, id } => ServiceError::NotFound(format!("{resource} {id}")),
            denied @ AccessDenied::NotOwner { .. } => ServiceError::Forbidden(denied.to_string()),
        }
    }
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

impl<E: Into<ServiceError>> From<RetryError<E>> for ServiceError {
    fn from(err: RetryError<E>) -> Self {
        match err {
            RetryError::Cancelled => ServiceError::Cancelled,
            RetryError::Failed(e) => e.into(),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Parse a decimal amount field.
pub fn parse_decimal(field: &'static str, raw: &str) -> ServiceResult<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::validation(field, format!("{field} is required")));
    }
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| ServiceError::validation(field, format!("{field} must be a decimal number")))
}

/// Parse a strictly positive decimal.
pub fn parse_positive(field: &'static str, raw: &str) -> ServiceResult<Decimal> {
    let value = parse_decimal(field, raw)?;
    if value <= Decimal::ZERO {
        return Err(ServiceError::validation(field, format!("{field} must be greater than zero")));
    }
    Ok(value)
}

/// Offset pagination parameters, clamped to `1..=MAX_LIMIT`.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub const DEFAULT_LIMIT: usize = 20;
    pub const MAX_LIMIT: usize = 100;

    pub fn new(offset: Option<usize>, limit: Option<usize>) -> Self {
        Self {
            offset: offset.unwrap_or(0),
            limit: limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}
