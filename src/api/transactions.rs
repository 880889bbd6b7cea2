// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction endpoints: send, list, status and ledger.

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
    blockchain::Chain,
    error::{ApiError, ErrorBody},
    services::{Page, SendRequest},
    state::AppState,
    storage::{LedgerEntry, TransactionRecord, TxFilter, TxStatus, TxType},
};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Transaction as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub id: String,
    pub wallet_id: String,
    pub chain: Chain,
    #[serde(rename = "type")]
    pub tx_type: TxType,
    pub status: TxStatus,
    /// Chain hash (empty until broadcast)
    pub hash: String,
    pub from_address: String,
    pub to_address: String,
    #[schema(value_type = String)]
    pub amount: Decimal,
    #[schema(value_type = String)]
    pub fee: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    pub confirmations: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl From<TransactionRecord> for TransactionResponse {
    fn from(tx: TransactionRecord) -> Self {
        Self {
            id: tx.id,
            wallet_id: tx.wallet_id,
            chain: tx.chain,
            tx_type: tx.tx_type,
            status: tx.status,
            hash: tx.hash.unwrap_or_default(),
            from_address: tx.from_address,
            to_address: tx.to_address,
            amount: tx.amount,
            fee: tx.fee,
            memo: tx.memo,
            confirmations: tx.confirmations,
            block_number: tx.block_number,
            error_message: tx.error_message,
            metadata: tx.metadata,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
            confirmed_at: tx.confirmed_at,
        }
    }
}

/// Query parameters for transaction list.
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct TransactionListQuery {
    pub wallet_id: String,
    #[serde(rename = "type")]
    pub tx_type: Option<TxType>,
    pub status: Option<TxStatus>,
    /// RFC 3339 lower bound on creation time
    pub from: Option<DateTime<Utc>>,
    /// RFC 3339 upper bound on creation time
    pub to: Option<DateTime<Utc>>,
    /// Opaque cursor from a previous page
    pub cursor: Option<String>,
    /// Maximum number of results (default: 20, max: 100)
    #[param(default = 20)]
    pub limit: Option<usize>,
}

/// One page of transactions.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionListResponse {
    pub transactions: Vec<TransactionResponse>,
    /// Pass back as `cursor` for the next page; absent on the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Send native funds from a wallet.
///
/// Validates, signs and broadcasts the transfer, debits the wallet and
/// appends the ledger pair. The returned transaction is `confirming` until
/// the monitor observes enough confirmations.
#[utoipa::path(
    post,
    path = "/api/v1/transactions",
    tag = "Transactions",
    security(("bearer_auth" = [])),
    request_body = SendRequest,
    responses(
        (status = 202, description = "Transaction broadcast", body = TransactionResponse),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 403, description = "Not the owner, wallet inactive or KYC level insufficient", body = ErrorBody),
        (status = 412, description = "KYC profile required", body = ErrorBody),
        (status = 422, description = "Insufficient balance or limit exceeded", body = ErrorBody),
        (status = 502, description = "Chain provider failed", body = ErrorBody)
    )
)]
pub async fn send_transaction(
    Auth(user): Auth,
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SendRequest>,
) -> Result<(StatusCode, Json<TransactionResponse>), ApiError> {
    let cancel = state.shutdown.child_token();
    let tx = state
        .wallets
        .send_transaction(&user.user_id, request, &cancel)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(TransactionResponse::from(tx))))
}

/// List transactions of one wallet, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/transactions",
    tag = "Transactions",
    security(("bearer_auth" = [])),
    params(TransactionListQuery),
    responses(
        (status = 200, description = "Page of transactions", body = TransactionListResponse),
        (status = 400, description = "Invalid filter or cursor", body = ErrorBody),
        (status = 404, description = "Wallet not found", body = ErrorBody)
    )
)]
pub async fn list_transactions(
    Auth(user): Auth,
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<TransactionListQuery>,
) -> Result<Json<TransactionListResponse>, ApiError> {
    let filter = TxFilter {
        tx_type: query.tx_type,
        status: query.status,
        from: query.from,
        to: query.to,
    };
    let limit = Page::new(None, query.limit).limit;
    let (transactions, next_cursor) = state.wallets.list_transactions(
        &user.user_id,
        &query.wallet_id,
        &filter,
        query.cursor.as_deref(),
        limit,
    )?;
    Ok(Json(TransactionListResponse {
        transactions: transactions.into_iter().map(TransactionResponse::from).collect(),
        next_cursor,
    }))
}

/// Get a transaction by ID.
#[utoipa::path(
    get,
    path = "/api/v1/transactions/{tx_id}",
    tag = "Transactions",
    security(("bearer_auth" = [])),
    params(("tx_id" = String, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Transaction", body = TransactionResponse),
        (status = 403, description = "Not the owner", body = ErrorBody),
        (status = 404, description = "Transaction not found", body = ErrorBody)
    )
)]
pub async fn get_transaction(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(tx_id): Path<String>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let tx = state.wallets.get_transaction(&user.user_id, &tx_id)?;
    Ok(Json(TransactionResponse::from(tx)))
}

/// Ledger entries recorded for a transaction.
#[utoipa::path(
    get,
    path = "/api/v1/transactions/{tx_id}/ledger",
    tag = "Transactions",
    security(("bearer_auth" = [])),
    params(("tx_id" = String, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Ledger entries", body = [LedgerEntry]),
        (status = 404, description = "Transaction not found", body = ErrorBody)
    )
)]
pub async fn get_transaction_ledger(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(tx_id): Path<String>,
) -> Result<Json<Vec<LedgerEntry>>, ApiError> {
    Ok(Json(state.wallets.transaction_ledger(&user.user_id, &tx_id)?))
}
