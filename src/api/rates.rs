// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Current USD prices and OHLCV history.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::ApiQuery,
    auth::Auth,
    error::{ApiError, ErrorBody},
    services::ServiceError,
    state::AppState,
    storage::{CandleInterval, ExchangeRate, PriceCandle, RateRepository},
};

/// Candles returned when no range is given.
const DEFAULT_CANDLES: i32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RateListResponse {
    pub rates: Vec<ExchangeRate>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// `1m`, `5m`, `15m`, `1h` (default), `4h`, `1d` or `1w`
    pub interval: Option<String>,
    /// RFC 3339; defaults to 100 intervals before `to`
    pub from: Option<DateTime<Utc>>,
    /// RFC 3339; defaults to now
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HistoryResponse {
    pub symbol: String,
    pub interval: CandleInterval,
    pub candles: Vec<PriceCandle>,
}

/// Latest price of every tracked symbol.
#[utoipa::path(
    get,
    path = "/api/v1/rates",
    tag = "Rates",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current rates", body = RateListResponse)
    )
)]
pub async fn list_rates(Auth(_user): Auth, State(state): State<AppState>) -> Result<Json<RateListResponse>, ApiError> {
    let rates = RateRepository::new(&state.dbs.rates)
        .list()
        .map_err(ServiceError::from)?;
    Ok(Json(RateListResponse { rates }))
}

#[utoipa::path(
    get,
    path = "/api/v1/rates/{symbol}",
    tag = "Rates",
    security(("bearer_auth" = [])),
    params(("symbol" = String, Path, description = "Asset symbol, e.g. BTC")),
    responses(
        (status = 200, description = "Current rate", body = ExchangeRate),
        (status = 404, description = "No rate for symbol", body = ErrorBody)
    )
)]
pub async fn get_rate(
    Auth(_user): Auth,
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ExchangeRate>, ApiError> {
    RateRepository::new(&state.dbs.rates)
        .get(&symbol)
        .map_err(ServiceError::from)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("rate for {} not found", symbol.to_uppercase())))
}

/// OHLCV candles of a symbol, oldest first.
#[utoipa::path(
    get,
    path = "/api/v1/rates/{symbol}/history",
    tag = "Rates",
    security(("bearer_auth" = [])),
    params(("symbol" = String, Path, description = "Asset symbol, e.g. BTC"), HistoryQuery),
    responses(
        (status = 200, description = "Candles", body = HistoryResponse),
        (status = 400, description = "Unknown interval", body = ErrorBody)
    )
)]
pub async fn get_history(
    Auth(_user): Auth,
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let interval = match query.interval.as_deref() {
        Some(raw) => raw
            .parse::<CandleInterval>()
            .map_err(|e| ApiError::bad_request("interval", e))?,
        None => CandleInterval::OneHour,
    };
    let to = query.to.unwrap_or_else(|| state.clock.now());
    let from = query
        .from
        .unwrap_or_else(|| to - interval.duration() * DEFAULT_CANDLES);
    if from > to {
        return Err(ApiError::bad_request("from", "from must not be after to"));
    }

    let candles = RateRepository::new(&state.dbs.rates)
        .history(&symbol, interval, interval.bucket_start(from), to)
        .map_err(ServiceError::from)?;
    Ok(Json(HistoryResponse {
        symbol: symbol.to_uppercase(),
        interval,
        candles,
    }))
}
