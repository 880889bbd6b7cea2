// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP error envelope.
//!
//! Every 4xx/5xx response carries
//! `{"error": "<CODE>", "message": "...", "details": [{"field", "message"}]}`.
//! Server-side failures are logged with their cause and answered with a
//! generic message.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::blockchain::ChainError;
use crate::services::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(default)]
    pub details: Vec<ErrorDetail>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Vec<ErrorDetail>,
}

const INTERNAL_MESSAGE: &str = "internal server error";

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_detail(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.details.push(ErrorDetail {
            field: field.into(),
            message: message.into(),
        });
        self
    }

    pub fn bad_request(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(StatusCode::BAD_REQUEST, "ValidationError", message.clone()).with_detail(field, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NotFound", message)
    }

    pub fn rate_limited() -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "RateLimited", "too many requests")
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Unexpected", INTERNAL_MESSAGE)
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.code.to_string(),
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body())).into_response()
    }
}

fn status_for(err: &ServiceError) -> StatusCode {
    use ServiceError::*;
    match err {
        Validation { .. } | UnsupportedChain(_) => StatusCode::BAD_REQUEST,
        Adapter(ChainError::InvalidAddress(_) | ChainError::InvalidAmount(_)) => StatusCode::BAD_REQUEST,
        AuthRequired | InvalidCredentials | TwoFactorRequired | InvalidTwoFactorCode => StatusCode::UNAUTHORIZED,
        Forbidden(_) | WalletInactive(_) | ChainMismatch { .. } | LevelInsufficient { .. } => StatusCode::FORBIDDEN,
        NotFound(_) => StatusCode::NOT_FOUND,
        Conflict(_) => StatusCode::CONFLICT,
        ProfileRequired => StatusCode::PRECONDITION_FAILED,
        PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        SameWallets
        | InsufficientBalance { .. }
        | InvalidTradingPair(_)
        | AmountTooSmall(_)
        | AmountTooLarge(_)
        | QuoteExpired
        | InvalidStatus { .. }
        | LimitExceeded(_)
        | Adapter(ChainError::InsufficientFunds(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        Adapter(_) => StatusCode::BAD_GATEWAY,
        AdapterNotRegistered(_) | EncryptorNotConfigured | Crypto(_) | Database(_) | Cancelled | Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            error!(code = err.code(), error = %err, "Request failed");
            if status == StatusCode::BAD_GATEWAY {
                return ApiError::new(status, err.code(), "upstream chain provider failed");
            }
            return ApiError::new(status, err.code(), INTERNAL_MESSAGE);
        }

        let api = ApiError::new(status, err.code(), err.to_string());
        match err {
            ServiceError::Validation { field, message } => api.with_detail(field, message),
            _ => api,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::MissingJsonContentType(_) => ApiError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UnsupportedMediaType",
                "expected `Content-Type: application/json`",
            ),
            other => ApiError::bad_request("body", other.body_text()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request("query", rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::bad_request("path", rejection.body_text())
    }
}
