// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};

use crate::{
    auth::Auth,
    error::{ApiError, ErrorBody},
    services::UserProfile,
    state::AppState,
};

/// Get the current authenticated user's profile.
#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    tag = "Users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = UserProfile),
        (status = 401, description = "Unauthorized", body = ErrorBody)
    )
)]
pub async fn get_current_user(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<UserProfile>, ApiError> {
    Ok(Json(state.users.me(&user.user_id)?))
}
