// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::config::PRICE_STALE_AFTER;
use crate::price_feed::is_stale_at;
use crate::pubsub::price_channel;
use crate::state::AppState;
use crate::storage::RateRepository;

/// Readiness report with individual component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// "ok", "degraded" (stale prices) or "unavailable" (database down)
    pub status: String,
    pub checks: HealthChecks,
    pub counters: HealthCounters,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    /// Reachability per logical database.
    pub databases: BTreeMap<String, String>,
    /// "fresh", "stale" or "missing" per price symbol.
    pub prices: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthCounters {
    /// Balance refreshes that got an empty upstream payload.
    pub empty_balance_payloads: u64,
    /// Live subscriptions summed over the per-symbol price channels.
    pub price_subscribers: usize,
}

/// Simple health check response for liveness probes.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

fn check_databases(state: &AppState) -> BTreeMap<String, String> {
    [&state.dbs.core, &state.dbs.kyc, &state.dbs.rates, &state.dbs.audit]
        .into_iter()
        .map(|db| {
            let status = match db.ping() {
                Ok(()) => "ok".to_string(),
                Err(e) => {
                    tracing::warn!(database = db.name(), error = %e, "Database ping failed");
                    "unreachable".to_string()
                }
            };
            (db.name().to_string(), status)
        })
        .collect()
}

fn check_prices(state: &AppState) -> BTreeMap<String, String> {
    let now = state.clock.now();
    let rates = RateRepository::new(&state.dbs.rates).list().unwrap_or_default();
    state
        .adapters
        .chains()
        .into_iter()
        .map(|chain| {
            let status = match rates.iter().find(|r| r.symbol == chain.symbol()) {
                Some(rate) if is_stale_at(now, rate.last_updated, PRICE_STALE_AFTER) => "stale",
                Some(_) => "fresh",
                None => "missing",
            };
            (chain.symbol().to_string(), status.to_string())
        })
        .collect()
}

/// Health check endpoint handler.
///
/// Returns 200 unless a database is unreachable (503).
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = ReadyResponse),
        (status = 503, description = "Service is unhealthy", body = ReadyResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let databases = check_databases(&state);
    let prices = check_prices(&state);

    let db_ok = databases.values().all(|s| s == "ok");
    let prices_ok = prices.values().all(|s| s == "fresh");
    let status = match (db_ok, prices_ok) {
        (false, _) => "unavailable",
        (true, false) => "degraded",
        (true, true) => "ok",
    };

    let response = ReadyResponse {
        status: status.to_string(),
        checks: HealthChecks { databases, prices },
        counters: HealthCounters {
            empty_balance_payloads: state.wallets.empty_balance_payloads(),
            price_subscribers: state
                .adapters
                .chains()
                .iter()
                .map(|c| state.prices.subscriber_count(&price_channel(c.symbol())))
                .sum(),
        },
    };

    let code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}

/// Liveness probe handler.
///
/// Always returns 200 if the process is running.
#[utoipa::path(
    get,
    path = "/api/v1/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness probe handler.
#[utoipa::path(
    get,
    path = "/api/v1/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "Service is not ready", body = ReadyResponse)
    )
)]
pub async fn readiness(state: State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    health(state).await
}
