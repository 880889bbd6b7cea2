// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::time::Duration;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, FromRequest, FromRequestParts},
    http::{HeaderValue, Request},
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{error::ApiError, services::kyc::MAX_DOCUMENT_BYTES, state::AppState};

pub mod admin;
pub mod analytics;
pub mod auth;
pub mod exchange;
pub mod health;
pub mod kyc;
pub mod middleware;
pub mod rates;
pub mod transactions;
pub mod users;
pub mod wallets;
pub mod ws;

use middleware::RequestLimiter;

/// JSON body extractor whose rejections use the error envelope.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Query string extractor whose rejections use the error envelope.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// Multipart framing overhead allowed on top of the document itself.
const MULTIPART_MARGIN: usize = 64 * 1024;

const LIMITER_HOUSEKEEPING: Duration = Duration::from_secs(60);

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring unparsable CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

fn spawn_limiter_housekeeping(limiter: &std::sync::Arc<RequestLimiter>, state: &AppState) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    let limiter = limiter.clone();
    let shutdown = state.shutdown.clone();
    handle.spawn(async move {
        let mut ticker = tokio::time::interval(LIMITER_HOUSEKEEPING);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => limiter.housekeeping(),
            }
        }
    });
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/2fa/setup", post(auth::setup_2fa))
        .route("/auth/2fa/enable", post(auth::enable_2fa))
        .route("/auth/2fa/disable", post(auth::disable_2fa))
        .route("/users/me", get(users::get_current_user))
        .route("/wallets", get(wallets::list_wallets).post(wallets::create_wallet))
        .route(
            "/wallets/{wallet_id}",
            get(wallets::get_wallet).delete(wallets::archive_wallet),
        )
        .route("/wallets/{wallet_id}/balance", get(wallets::get_balance))
        .route("/wallets/{wallet_id}/fee-estimate", get(wallets::estimate_fee))
        .route(
            "/transactions",
            get(transactions::list_transactions).post(transactions::send_transaction),
        )
        .route("/transactions/{tx_id}", get(transactions::get_transaction))
        .route("/transactions/{tx_id}/ledger", get(transactions::get_transaction_ledger))
        .route("/exchange/quote", post(exchange::quote))
        .route("/exchange/execute", post(exchange::execute))
        .route("/exchange/cancel", post(exchange::cancel))
        .route("/exchange/rate", get(exchange::get_rate))
        .route("/exchange/pairs", get(exchange::list_pairs))
        .route("/exchange/operations", get(exchange::list_operations))
        .route("/exchange/operations/{operation_id}", get(exchange::get_operation))
        .route("/exchange/stats", get(exchange::stats))
        .route("/kyc/submit", post(kyc::submit))
        .route(
            "/kyc/documents",
            post(kyc::upload_document).layer(DefaultBodyLimit::max(MAX_DOCUMENT_BYTES + MULTIPART_MARGIN)),
        )
        .route("/kyc/status", get(kyc::status))
        .route("/analytics/portfolio", get(analytics::portfolio))
        .route("/analytics/performance", get(analytics::performance))
        .route("/rates", get(rates::list_rates))
        .route("/rates/{symbol}", get(rates::get_rate))
        .route("/rates/{symbol}/history", get(rates::get_history))
        .route("/ws/rates", get(ws::ws_rates))
        .route("/admin/trading-pairs", put(admin::upsert_trading_pair))
        .route("/admin/kyc/{user_id}/review", post(admin::start_review))
        .route("/admin/kyc/{user_id}/approve", post(admin::approve))
        .route("/admin/kyc/{user_id}/reject", post(admin::reject))
        .route("/admin/kyc/{user_id}/expire", post(admin::expire))
        .route("/admin/kyc/{user_id}/limits", put(admin::set_limits))
        .route("/admin/kyc/{user_id}/risk", put(admin::set_risk_score))
        .route("/admin/kyc/{user_id}/pii", get(admin::reveal_pii))
        .route("/admin/audit/events", get(admin::query_audit_logs));

    let api = match RequestLimiter::from_config(&state.rate_limit) {
        Some(limiter) => {
            spawn_limiter_housekeeping(&limiter, &state);
            api.layer(axum_middleware::from_fn_with_state(limiter, middleware::rate_limit))
        }
        None => api,
    };

    // Probes stay outside the limiter
    let v1 = api
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", v1)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    tracing::info_span!(
                        "http",
                        method = %request.method(),
                        path = %request.uri().path(),
                        request_id = %request_id,
                    )
                }))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CatchPanicLayer::custom(middleware::handle_panic))
                .layer(cors_layer(&state.cors_origins)),
        )
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        auth::register,
        auth::login,
        auth::setup_2fa,
        auth::enable_2fa,
        auth::disable_2fa,
        users::get_current_user,
        wallets::create_wallet,
        wallets::list_wallets,
        wallets::get_wallet,
        wallets::archive_wallet,
        wallets::get_balance,
        wallets::estimate_fee,
        transactions::send_transaction,
        transactions::list_transactions,
        transactions::get_transaction,
        transactions::get_transaction_ledger,
        exchange::quote,
        exchange::execute,
        exchange::cancel,
        exchange::get_rate,
        exchange::list_pairs,
        exchange::list_operations,
        exchange::get_operation,
        exchange::stats,
        kyc::submit,
        kyc::upload_document,
        kyc::status,
        analytics::portfolio,
        analytics::performance,
        rates::list_rates,
        rates::get_rate,
        rates::get_history,
        ws::ws_rates,
        admin::upsert_trading_pair,
        admin::start_review,
        admin::approve,
        admin::reject,
        admin::expire,
        admin::set_limits,
        admin::set_risk_score,
        admin::reveal_pii,
        admin::query_audit_logs
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::error::ErrorDetail,
            crate::pubsub::PriceUpdate,
            crate::blockchain::Chain,
            crate::blockchain::Priority,
            crate::storage::WalletStatus,
            crate::storage::TxType,
            crate::storage::TxStatus,
            crate::storage::ExchangeStatus,
            crate::storage::KycLevel,
            crate::storage::DocumentType,
            crate::services::WalletSort,
            crate::services::PerformancePeriod
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Auth", description = "Registration, login and two-factor authentication"),
        (name = "Users", description = "Current user profile"),
        (name = "Wallets", description = "Multi-chain custodial wallets"),
        (name = "Transactions", description = "Native transfers and their ledger"),
        (name = "Exchange", description = "Quoted swaps between a user's wallets"),
        (name = "KYC", description = "Identity verification"),
        (name = "Analytics", description = "Portfolio valuation"),
        (name = "Rates", description = "USD prices, history and the price stream"),
        (name = "Admin", description = "Administration (admin role required)")
    )
)]
pub struct ApiDoc;
