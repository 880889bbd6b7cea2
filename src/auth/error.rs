// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::ErrorBody;

/// Failures while authenticating a request or issuing a token.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authorization header is required")]
    MissingAuthHeader,
    #[error("Invalid authorization header format (expected 'Bearer <token>')")]
    InvalidAuthHeader,
    #[error("Token is malformed")]
    MalformedToken,
    #[error("Token signature is invalid")]
    InvalidSignature,
    #[error("Token has expired")]
    TokenExpired,
    #[error("Token issuer is invalid")]
    InvalidIssuer,
    #[error("Token audience is invalid")]
    InvalidAudience,
    #[error("Token is not yet valid")]
    TokenNotYetValid,
    #[error("Insufficient permissions for this operation")]
    InsufficientPermissions,
    #[error("Internal authentication error: {0}")]
    InternalError(String),
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader | AuthError::InvalidAuthHeader => "AuthRequired",
            AuthError::MalformedToken
            | AuthError::InvalidSignature
            | AuthError::InvalidIssuer
            | AuthError::InvalidAudience
            | AuthError::TokenNotYetValid => "InvalidToken",
            AuthError::TokenExpired => "TokenExpired",
            AuthError::InsufficientPermissions => "Forbidden",
            AuthError::InternalError(_) => "Unexpected",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InsufficientPermissions => StatusCode::FORBIDDEN,
            AuthError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            AuthError::InternalError(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: self.error_code().to_string(),
            message,
            details: Vec::new(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
