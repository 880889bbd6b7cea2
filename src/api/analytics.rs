// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Portfolio analytics over the caller's active wallets.

use axum::{extract::State, Json};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    api::ApiQuery,
    auth::Auth,
    error::{ApiError, ErrorBody},
    services::{PerformancePeriod, PerformanceReport, PortfolioSummary},
    state::AppState,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PerformanceQuery {
    /// `24h`, `7d` (default), `30d`, `90d`, `1y` or `all`
    pub period: Option<String>,
}

/// USD valuation, allocation and 24h change of the caller's wallets.
#[utoipa::path(
    get,
    path = "/api/v1/analytics/portfolio",
    tag = "Analytics",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Portfolio summary", body = PortfolioSummary),
        (status = 401, description = "Unauthorized", body = ErrorBody)
    )
)]
pub async fn portfolio(Auth(user): Auth, State(state): State<AppState>) -> Result<Json<PortfolioSummary>, ApiError> {
    Ok(Json(state.analytics.portfolio(&user.user_id)?))
}

/// Portfolio value series over a period.
#[utoipa::path(
    get,
    path = "/api/v1/analytics/performance",
    tag = "Analytics",
    security(("bearer_auth" = [])),
    params(PerformanceQuery),
    responses(
        (status = 200, description = "Value series", body = PerformanceReport),
        (status = 400, description = "Unknown period", body = ErrorBody)
    )
)]
pub async fn performance(
    Auth(user): Auth,
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PerformanceQuery>,
) -> Result<Json<PerformanceReport>, ApiError> {
    let period = match query.period.as_deref() {
        Some(raw) => raw.parse::<PerformancePeriod>()?,
        None => PerformancePeriod::default(),
    };
    Ok(Json(state.analytics.performance(&user.user_id, period)?))
}
