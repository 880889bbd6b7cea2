// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admin-only API endpoints.
//!
//! These endpoints require the Admin role and provide:
//! - Trading pair administration
//! - KYC review transitions, limits and risk scores
//! - PII reveal for review
//! - Audit log queries

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{ApiJson, ApiQuery},
    audit_log,
    auth::AdminOnly,
    error::{ApiError, ErrorBody},
    services::{
        kyc::{KycPii, KycProfileView},
        parse_decimal, ServiceError, TradingPairInput,
    },
    state::AppState,
    storage::{AuditError, AuditEvent, AuditEventType, AuditRepository, KycLevel, RiskScore, TradingPair},
};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ApproveRequest {
    pub level: KycLevel,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RejectRequest {
    pub reason: String,
}

/// Per-user USD limits as decimal strings.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LimitsRequest {
    pub daily_limit_usd: String,
    pub monthly_limit_usd: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RiskScoreRequest {
    /// 0..=100
    pub score: u8,
    #[serde(default)]
    pub factors: Vec<String>,
    #[serde(default)]
    pub aml_hits: Vec<String>,
}

/// Query parameters for audit log queries.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditQueryParams {
    /// Start date (YYYY-MM-DD format).
    pub start_date: Option<String>,
    /// End date (YYYY-MM-DD format).
    pub end_date: Option<String>,
    /// Filter by user ID.
    pub user_id: Option<String>,
    /// Filter by event type (snake_case).
    pub event_type: Option<String>,
    /// Filter by resource type.
    pub resource_type: Option<String>,
    /// Filter by resource ID.
    pub resource_id: Option<String>,
    /// Maximum number of results (default 100).
    pub limit: Option<usize>,
    /// Offset for pagination.
    pub offset: Option<usize>,
}

/// Response for audit log queries.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuditLogResponse {
    /// Audit events matching the query.
    pub events: Vec<AuditEvent>,
    /// Total count (before limit/offset).
    pub total: usize,
    /// Whether there are more results.
    pub has_more: bool,
}

const MAX_AUDIT_PAGE: usize = 1000;

fn audit_error(err: AuditError) -> ApiError {
    match err {
        AuditError::InvalidDate(date) => {
            ApiError::bad_request("date", format!("invalid date '{date}', expected YYYY-MM-DD"))
        }
        AuditError::Db(e) => ServiceError::from(e).into(),
    }
}

// ============================================================================
// Trading pairs
// ============================================================================

/// Create or replace a trading pair.
#[utoipa::path(
    put,
    path = "/api/v1/admin/trading-pairs",
    tag = "Admin",
    security(("bearer_auth" = [])),
    request_body = TradingPairInput,
    responses(
        (status = 200, description = "Stored pair", body = TradingPair),
        (status = 400, description = "Invalid rate, fee or bounds", body = ErrorBody),
        (status = 403, description = "Not authorized (admin required)", body = ErrorBody)
    )
)]
pub async fn upsert_trading_pair(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    ApiJson(input): ApiJson<TradingPairInput>,
) -> Result<Json<TradingPair>, ApiError> {
    Ok(Json(state.exchange.upsert_trading_pair(&admin.user_id, input)?))
}

// ============================================================================
// KYC review
// ============================================================================

#[utoipa::path(
    post,
    path = "/api/v1/admin/kyc/{user_id}/review",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Profile owner")),
    responses(
        (status = 200, description = "Profile under review", body = KycProfileView),
        (status = 404, description = "No profile", body = ErrorBody),
        (status = 422, description = "Profile not pending", body = ErrorBody)
    )
)]
pub async fn start_review(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<KycProfileView>, ApiError> {
    let profile = state.kyc.start_review(&user_id)?;
    Ok(Json(KycProfileView::from(&profile)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/kyc/{user_id}/approve",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Profile owner")),
    request_body = ApproveRequest,
    responses(
        (status = 200, description = "Profile approved", body = KycProfileView),
        (status = 404, description = "No profile", body = ErrorBody),
        (status = 422, description = "Invalid transition", body = ErrorBody)
    )
)]
pub async fn approve(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ApiJson(request): ApiJson<ApproveRequest>,
) -> Result<Json<KycProfileView>, ApiError> {
    let profile = state.kyc.approve(&user_id, request.level)?;
    Ok(Json(KycProfileView::from(&profile)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/kyc/{user_id}/reject",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Profile owner")),
    request_body = RejectRequest,
    responses(
        (status = 200, description = "Profile rejected", body = KycProfileView),
        (status = 422, description = "Invalid transition", body = ErrorBody)
    )
)]
pub async fn reject(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ApiJson(request): ApiJson<RejectRequest>,
) -> Result<Json<KycProfileView>, ApiError> {
    let profile = state.kyc.reject(&user_id, &request.reason)?;
    Ok(Json(KycProfileView::from(&profile)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/kyc/{user_id}/expire",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Profile owner")),
    responses(
        (status = 200, description = "Approval expired", body = KycProfileView),
        (status = 422, description = "Profile not approved", body = ErrorBody)
    )
)]
pub async fn expire(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<KycProfileView>, ApiError> {
    let profile = state.kyc.expire(&user_id)?;
    Ok(Json(KycProfileView::from(&profile)))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/kyc/{user_id}/limits",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Profile owner")),
    request_body = LimitsRequest,
    responses(
        (status = 200, description = "Limits updated", body = KycProfileView),
        (status = 400, description = "Invalid limits", body = ErrorBody)
    )
)]
pub async fn set_limits(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ApiJson(request): ApiJson<LimitsRequest>,
) -> Result<Json<KycProfileView>, ApiError> {
    let daily = parse_decimal("daily_limit_usd", &request.daily_limit_usd)?;
    let monthly = parse_decimal("monthly_limit_usd", &request.monthly_limit_usd)?;
    let profile = state.kyc.set_limits(&user_id, daily, monthly)?;
    Ok(Json(KycProfileView::from(&profile)))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/kyc/{user_id}/risk",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Profile owner")),
    request_body = RiskScoreRequest,
    responses(
        (status = 200, description = "Risk score stored", body = RiskScore),
        (status = 400, description = "Score out of range", body = ErrorBody)
    )
)]
pub async fn set_risk_score(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ApiJson(request): ApiJson<RiskScoreRequest>,
) -> Result<Json<RiskScore>, ApiError> {
    Ok(Json(state.kyc.set_risk_score(
        &user_id,
        request.score,
        request.factors,
        request.aml_hits,
    )?))
}

/// Decrypt the submitted PII of a user. Every reveal is audited.
#[utoipa::path(
    get,
    path = "/api/v1/admin/kyc/{user_id}/pii",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Profile owner")),
    responses(
        (status = 200, description = "Decrypted PII", body = KycPii),
        (status = 404, description = "No profile or no submitted data", body = ErrorBody)
    )
)]
pub async fn reveal_pii(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<KycPii>, ApiError> {
    let pii = state.kyc.reveal_pii(&user_id)?;
    audit_log!(
        &state.dbs.audit,
        AuditEvent::new(AuditEventType::KycPiiRevealed)
            .with_user(admin.user_id.as_str())
            .with_resource("kyc", user_id.as_str())
    );
    Ok(Json(pii))
}

// ============================================================================
// Audit log
// ============================================================================

/// Query audit logs.
///
/// Search and filter audit log entries. Supports date range, user ID,
/// event type, and resource filtering. Admin only.
#[utoipa::path(
    get,
    path = "/api/v1/admin/audit/events",
    tag = "Admin",
    params(AuditQueryParams),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Audit events", body = AuditLogResponse),
        (status = 400, description = "Invalid query parameters", body = ErrorBody),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 403, description = "Not authorized (admin required)", body = ErrorBody)
    )
)]
pub async fn query_audit_logs(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<AuditQueryParams>,
) -> Result<Json<AuditLogResponse>, ApiError> {
    // Default date range: today only
    let today = state.clock.now().format("%Y-%m-%d").to_string();
    let start_date = params.start_date.as_deref().unwrap_or(&today);
    let end_date = params.end_date.as_deref().unwrap_or(&today);

    let mut events = AuditRepository::new(&state.dbs.audit)
        .read_events_range(start_date, end_date)
        .map_err(audit_error)?;

    if let Some(user_id) = &params.user_id {
        events.retain(|e| e.user_id.as_deref() == Some(user_id.as_str()));
    }
    if let Some(event_type) = &params.event_type {
        events.retain(|e| {
            serde_json::to_value(&e.event_type)
                .ok()
                .and_then(|v| v.as_str().map(|s| s == event_type))
                .unwrap_or(false)
        });
    }
    if let Some(resource_type) = &params.resource_type {
        events.retain(|e| e.resource_type.as_deref() == Some(resource_type.as_str()));
    }
    if let Some(resource_id) = &params.resource_id {
        events.retain(|e| e.resource_id.as_deref() == Some(resource_id.as_str()));
    }

    let total = events.len();
    let limit = params.limit.unwrap_or(100).min(MAX_AUDIT_PAGE);
    let offset = params.offset.unwrap_or(0);
    let has_more = offset + limit < total;
    let events = events.into_iter().skip(offset).take(limit).collect();

    Ok(Json(AuditLogResponse {
        events,
        total,
        has_more,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn invalid_audit_dates_are_bad_requests() {
        let err = audit_error(AuditError::InvalidDate("yesterday".into()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.details[0].field, "date");
    }

    #[test]
    fn risk_request_defaults_lists() {
        let request: RiskScoreRequest = serde_json::from_str(r#"{"score": 40}"#).unwrap();
        assert_eq!(request.score, 40);
        assert!(request.factors.is_empty());
        assert!(request.aml_hits.is_empty());
    }
}
