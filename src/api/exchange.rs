// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Swap endpoints: quotes, execution, cancellation, pairs and history.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{ApiJson, ApiQuery},
    auth::Auth,
    error::{ApiError, ErrorBody},
    services::{Page, QuoteRequest},
    state::AppState,
    storage::{ExchangeOperation, ExchangeStats, ExchangeStatus, TradingPair},
};

/// Exchange operation as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OperationResponse {
    pub id: String,
    pub from_wallet_id: String,
    pub to_wallet_id: String,
    pub base_symbol: String,
    pub quote_symbol: String,
    #[schema(value_type = String)]
    pub from_amount: Decimal,
    #[schema(value_type = String)]
    pub to_amount: Decimal,
    #[schema(value_type = String)]
    pub exchange_rate: Decimal,
    #[schema(value_type = String)]
    pub fee_percentage: Decimal,
    #[schema(value_type = String)]
    pub fee_amount: Decimal,
    pub status: ExchangeStatus,
    pub quote_expires_at: DateTime<Utc>,
    /// Seconds left on the quote, 0 once expired or settled
    pub expires_in_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OperationResponse {
    pub fn new(op: ExchangeOperation, now: DateTime<Utc>) -> Self {
        let expires_in_seconds = if op.status == ExchangeStatus::Pending {
            // round up so a fresh quote reports its full lifetime
            let ms = (op.quote_expires_at - now).num_milliseconds().max(0);
            (ms + 999) / 1000
        } else {
            0
        };
        Self {
            id: op.id,
            from_wallet_id: op.from_wallet_id,
            to_wallet_id: op.to_wallet_id,
            base_symbol: op.base_symbol,
            quote_symbol: op.quote_symbol,
            from_amount: op.from_amount,
            to_amount: op.to_amount,
            exchange_rate: op.exchange_rate,
            fee_percentage: op.fee_percentage,
            fee_amount: op.fee_amount,
            status: op.status,
            quote_expires_at: op.quote_expires_at,
            expires_in_seconds,
            executed_at: op.executed_at,
            from_transaction_id: op.from_transaction_id,
            to_transaction_id: op.to_transaction_id,
            error_message: op.error_message,
            created_at: op.created_at,
            updated_at: op.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ExecuteRequest {
    pub operation_id: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CancelRequest {
    pub operation_id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RateQuery {
    pub base_symbol: String,
    pub quote_symbol: String,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OperationsQuery {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OperationListResponse {
    pub operations: Vec<OperationResponse>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PairListResponse {
    pub pairs: Vec<TradingPair>,
}

/// Quote a swap between two of the caller's wallets.
///
/// The quote is valid for 60 seconds.
#[utoipa::path(
    post,
    path = "/api/v1/exchange/quote",
    tag = "Exchange",
    security(("bearer_auth" = [])),
    request_body = QuoteRequest,
    responses(
        (status = 200, description = "Pending quote", body = OperationResponse),
        (status = 404, description = "Wallet not found", body = ErrorBody),
        (status = 412, description = "KYC profile required", body = ErrorBody),
        (status = 422, description = "Same wallets, unknown pair, amount out of range or insufficient balance", body = ErrorBody)
    )
)]
pub async fn quote(
    Auth(user): Auth,
    State(state): State<AppState>,
    ApiJson(request): ApiJson<QuoteRequest>,
) -> Result<Json<OperationResponse>, ApiError> {
    let op = state.exchange.quote(&user.user_id, request)?;
    Ok(Json(OperationResponse::new(op, state.clock.now())))
}

/// Execute a pending quote.
#[utoipa::path(
    post,
    path = "/api/v1/exchange/execute",
    tag = "Exchange",
    security(("bearer_auth" = [])),
    request_body = ExecuteRequest,
    responses(
        (status = 200, description = "Completed operation", body = OperationResponse),
        (status = 404, description = "Operation not found", body = ErrorBody),
        (status = 422, description = "Quote expired, not pending or insufficient balance", body = ErrorBody)
    )
)]
pub async fn execute(
    Auth(user): Auth,
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ExecuteRequest>,
) -> Result<Json<OperationResponse>, ApiError> {
    let op = state.exchange.execute(&user.user_id, &request.operation_id)?;
    Ok(Json(OperationResponse::new(op, state.clock.now())))
}

/// Cancel a pending quote.
#[utoipa::path(
    post,
    path = "/api/v1/exchange/cancel",
    tag = "Exchange",
    security(("bearer_auth" = [])),
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Cancelled operation", body = OperationResponse),
        (status = 404, description = "Operation not found", body = ErrorBody),
        (status = 422, description = "Operation is not pending", body = ErrorBody)
    )
)]
pub async fn cancel(
    Auth(user): Auth,
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CancelRequest>,
) -> Result<Json<OperationResponse>, ApiError> {
    let op = state
        .exchange
        .cancel(&user.user_id, &request.operation_id, request.reason)?;
    Ok(Json(OperationResponse::new(op, state.clock.now())))
}

/// Current rate of a trading pair.
#[utoipa::path(
    get,
    path = "/api/v1/exchange/rate",
    tag = "Exchange",
    security(("bearer_auth" = [])),
    params(RateQuery),
    responses(
        (status = 200, description = "Trading pair", body = TradingPair),
        (status = 404, description = "Pair not found", body = ErrorBody)
    )
)]
pub async fn get_rate(
    Auth(_user): Auth,
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<RateQuery>,
) -> Result<Json<TradingPair>, ApiError> {
    Ok(Json(state.exchange.get_rate(&query.base_symbol, &query.quote_symbol)?))
}

/// Active trading pairs.
#[utoipa::path(
    get,
    path = "/api/v1/exchange/pairs",
    tag = "Exchange",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Active pairs", body = PairListResponse)
    )
)]
pub async fn list_pairs(
    Auth(_user): Auth,
    State(state): State<AppState>,
) -> Result<Json<PairListResponse>, ApiError> {
    Ok(Json(PairListResponse {
        pairs: state.exchange.list_pairs()?,
    }))
}

/// The caller's exchange operations, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/exchange/operations",
    tag = "Exchange",
    security(("bearer_auth" = [])),
    params(OperationsQuery),
    responses(
        (status = 200, description = "Operations", body = OperationListResponse)
    )
)]
pub async fn list_operations(
    Auth(user): Auth,
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<OperationsQuery>,
) -> Result<Json<OperationListResponse>, ApiError> {
    let (ops, total) = state
        .exchange
        .list_operations(&user.user_id, Page::new(query.offset, query.limit))?;
    let now = state.clock.now();
    Ok(Json(OperationListResponse {
        operations: ops.into_iter().map(|op| OperationResponse::new(op, now)).collect(),
        total,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/exchange/operations/{operation_id}",
    tag = "Exchange",
    security(("bearer_auth" = [])),
    params(("operation_id" = String, Path, description = "Operation ID")),
    responses(
        (status = 200, description = "Operation", body = OperationResponse),
        (status = 403, description = "Not the owner", body = ErrorBody),
        (status = 404, description = "Operation not found", body = ErrorBody)
    )
)]
pub async fn get_operation(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> Result<Json<OperationResponse>, ApiError> {
    let op = state.exchange.get_operation(&user.user_id, &operation_id)?;
    Ok(Json(OperationResponse::new(op, state.clock.now())))
}

/// Aggregate counts and volume over the caller's operations.
#[utoipa::path(
    get,
    path = "/api/v1/exchange/stats",
    tag = "Exchange",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Statistics", body = ExchangeStats)
    )
)]
pub async fn stats(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<ExchangeStats>, ApiError> {
    Ok(Json(state.exchange.stats(&user.user_id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::sample_operation;
    use chrono::Duration;

    #[test]
    fn fresh_quote_reports_full_lifetime() {
        let created = Utc::now();
        let op = sample_operation("op1", "u1", created);
        let response = OperationResponse::new(op, created + Duration::milliseconds(3));
        assert_eq!(response.expires_in_seconds, 60);
    }

    #[test]
    fn settled_or_expired_quotes_report_zero() {
        let created = Utc::now();
        let op = sample_operation("op1", "u1", created);
        assert_eq!(
            OperationResponse::new(op.clone(), created + Duration::seconds(90)).expires_in_seconds,
            0
        );

        let mut done = op;
        done.status = ExchangeStatus::Completed;
        assert_eq!(OperationResponse::new(done, created).expires_in_seconds, 0);
    }

    #[test]
    fn decimals_serialize_as_strings() {
        let created = Utc::now();
        let json = serde_json::to_value(OperationResponse::new(sample_operation("op1", "u1", created), created)).unwrap();
        assert_eq!(json["fee_amount"], "0.005");
        assert_eq!(json["to_amount"], "49.75");
        assert_eq!(json["status"], "pending");
    }
}
