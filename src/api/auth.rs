// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Registration, login and two-factor endpoints.
//!
//! `register` and `login` are the only public routes besides health.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    api::ApiJson,
    auth::Auth,
    error::{ApiError, ErrorBody},
    services::{LoginRequest, LoginResponse, RegisterRequest, TwoFactorSetup, UserProfile},
    state::AppState,
};

/// A six digit TOTP code.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TwoFactorCode {
    pub code: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created", body = UserProfile),
        (status = 400, description = "Invalid email or password", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody)
    )
)]
pub async fn register(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<UserProfile>), ApiError> {
    let user = state.users.register(request)?;
    Ok((StatusCode::CREATED, Json(UserProfile::from(&user))))
}

/// Exchange credentials (and a TOTP code once 2FA is enabled) for a bearer token.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = LoginResponse),
        (status = 401, description = "Invalid credentials or two-factor code", body = ErrorBody)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    Ok(Json(state.users.login(request)?))
}

/// Generate a new TOTP secret. Two-factor stays disabled until confirmed
/// with `/auth/2fa/enable`.
#[utoipa::path(
    post,
    path = "/api/v1/auth/2fa/setup",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Secret generated", body = TwoFactorSetup),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 409, description = "Two-factor already enabled", body = ErrorBody)
    )
)]
pub async fn setup_2fa(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<TwoFactorSetup>, ApiError> {
    Ok(Json(state.users.setup_2fa(&user.user_id)?))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/2fa/enable",
    tag = "Auth",
    security(("bearer_auth" = [])),
    request_body = TwoFactorCode,
    responses(
        (status = 200, description = "Two-factor enabled", body = UserProfile),
        (status = 401, description = "Invalid code", body = ErrorBody)
    )
)]
pub async fn enable_2fa(
    Auth(user): Auth,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<TwoFactorCode>,
) -> Result<Json<UserProfile>, ApiError> {
    Ok(Json(state.users.enable_2fa(&user.user_id, &body.code)?))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/2fa/disable",
    tag = "Auth",
    security(("bearer_auth" = [])),
    request_body = TwoFactorCode,
    responses(
        (status = 200, description = "Two-factor disabled", body = UserProfile),
        (status = 401, description = "Invalid code", body = ErrorBody)
    )
)]
pub async fn disable_2fa(
    Auth(user): Auth,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<TwoFactorCode>,
) -> Result<Json<UserProfile>, ApiError> {
    Ok(Json(state.users.disable_2fa(&user.user_id, &body.code)?))
}
