// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet management API endpoints.
//!
//! These endpoints handle wallet creation, listing, retrieval, archival,
//! balance refresh and fee estimation. All operations require
//! authentication and enforce ownership.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{ApiJson, ApiQuery},
    auth::Auth,
    blockchain::{Chain, FeeEstimate, Priority},
    error::{ApiError, ErrorBody},
    services::{Page, ServiceError, WalletFilter, WalletSort},
    state::AppState,
    storage::{WalletResponse, WalletStatus},
};

/// Request to create a new wallet.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateWalletRequest {
    /// `BTC`, `ETH`, `SOL` or `XLM`
    pub chain: String,
    /// Optional human-readable label for the wallet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Response containing a page of wallets.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WalletListResponse {
    pub wallets: Vec<WalletResponse>,
    /// Total count of wallets matching the filter.
    pub total: usize,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListWalletsQuery {
    pub chain: Option<String>,
    pub status: Option<WalletStatus>,
    pub sort: Option<WalletSort>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub wallet_id: String,
    pub chain: Chain,
    pub address: String,
    #[schema(value_type = String)]
    pub balance: Decimal,
    pub balance_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FeeEstimateQuery {
    pub to: String,
    /// Decimal string
    pub amount: String,
    pub priority: Option<Priority>,
}

/// Create a new wallet for the authenticated user.
///
/// Generates a fresh key pair for the chain and stores the private key
/// encrypted. Returns the wallet metadata (never the private key). Wallets
/// are not deduplicated: every call yields a new address.
#[utoipa::path(
    post,
    path = "/api/v1/wallets",
    tag = "Wallets",
    security(("bearer_auth" = [])),
    request_body = CreateWalletRequest,
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse),
        (status = 400, description = "Unsupported chain", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
pub async fn create_wallet(
    Auth(user): Auth,
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateWalletRequest>,
) -> Result<(StatusCode, Json<WalletResponse>), ApiError> {
    let wallet = state
        .wallets
        .create_wallet(&user.user_id, &request.chain, request.label)?;
    Ok((StatusCode::CREATED, Json(WalletResponse::from(wallet))))
}

/// List wallets owned by the authenticated user.
#[utoipa::path(
    get,
    path = "/api/v1/wallets",
    tag = "Wallets",
    security(("bearer_auth" = [])),
    params(ListWalletsQuery),
    responses(
        (status = 200, description = "List of wallets", body = WalletListResponse),
        (status = 401, description = "Unauthorized", body = ErrorBody)
    )
)]
pub async fn list_wallets(
    Auth(user): Auth,
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListWalletsQuery>,
) -> Result<Json<WalletListResponse>, ApiError> {
    let filter = WalletFilter {
        chain: query
            .chain
            .as_deref()
            .map(str::parse::<Chain>)
            .transpose()
            .map_err(ServiceError::from)?,
        status: query.status,
    };
    let (wallets, total) = state.wallets.list_wallets(
        &user.user_id,
        &filter,
        query.sort.unwrap_or_default(),
        Page::new(query.offset, query.limit),
    )?;
    Ok(Json(WalletListResponse {
        wallets: wallets.into_iter().map(WalletResponse::from).collect(),
        total,
    }))
}

/// Get a specific wallet by ID.
#[utoipa::path(
    get,
    path = "/api/v1/wallets/{wallet_id}",
    tag = "Wallets",
    security(("bearer_auth" = [])),
    params(("wallet_id" = String, Path, description = "Wallet ID")),
    responses(
        (status = 200, description = "Wallet details", body = WalletResponse),
        (status = 403, description = "Not the wallet owner", body = ErrorBody),
        (status = 404, description = "Wallet not found", body = ErrorBody)
    )
)]
pub async fn get_wallet(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
) -> Result<Json<WalletResponse>, ApiError> {
    let wallet = state.wallets.get_wallet(&user.user_id, &wallet_id)?;
    Ok(Json(WalletResponse::from(wallet)))
}

/// Archive a wallet (soft delete).
///
/// Refused with 409 while a pending or processing swap references it.
#[utoipa::path(
    delete,
    path = "/api/v1/wallets/{wallet_id}",
    tag = "Wallets",
    security(("bearer_auth" = [])),
    params(("wallet_id" = String, Path, description = "Wallet ID")),
    responses(
        (status = 200, description = "Wallet archived", body = WalletResponse),
        (status = 404, description = "Wallet not found", body = ErrorBody),
        (status = 409, description = "Wallet has active exchange operations", body = ErrorBody)
    )
)]
pub async fn archive_wallet(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
) -> Result<Json<WalletResponse>, ApiError> {
    let wallet = state.wallets.archive_wallet(&user.user_id, &wallet_id)?;
    Ok(Json(WalletResponse::from(wallet)))
}

/// Refresh the balance from the chain and return it.
#[utoipa::path(
    get,
    path = "/api/v1/wallets/{wallet_id}/balance",
    tag = "Wallets",
    security(("bearer_auth" = [])),
    params(("wallet_id" = String, Path, description = "Wallet ID")),
    responses(
        (status = 200, description = "Current balance", body = BalanceResponse),
        (status = 404, description = "Wallet not found", body = ErrorBody),
        (status = 502, description = "Chain provider unavailable", body = ErrorBody)
    )
)]
pub async fn get_balance(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let cancel = state.shutdown.child_token();
    let wallet = state
        .wallets
        .refresh_balance(&user.user_id, &wallet_id, &cancel)
        .await?;
    Ok(Json(BalanceResponse {
        wallet_id: wallet.id,
        chain: wallet.chain,
        address: wallet.address,
        balance: wallet.balance,
        balance_updated_at: wallet.balance_updated_at,
    }))
}

/// Estimate the network fee of a transfer from this wallet.
#[utoipa::path(
    get,
    path = "/api/v1/wallets/{wallet_id}/fee-estimate",
    tag = "Wallets",
    security(("bearer_auth" = [])),
    params(("wallet_id" = String, Path, description = "Wallet ID"), FeeEstimateQuery),
    responses(
        (status = 200, description = "Fee tiers in the native asset", body = FeeEstimate),
        (status = 400, description = "Invalid address or amount", body = ErrorBody),
        (status = 404, description = "Wallet not found", body = ErrorBody)
    )
)]
pub async fn estimate_fee(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
    ApiQuery(query): ApiQuery<FeeEstimateQuery>,
) -> Result<Json<FeeEstimate>, ApiError> {
    let cancel = state.shutdown.child_token();
    let estimate = state
        .wallets
        .estimate_fee(
            &user.user_id,
            &wallet_id,
            &query.to,
            &query.amount,
            query.priority.unwrap_or_default(),
            &cancel,
        )
        .await?;
    Ok(Json(estimate))
}
