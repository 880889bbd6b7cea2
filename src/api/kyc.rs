// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! KYC endpoints for the profile owner.

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    api::ApiJson,
    auth::Auth,
    error::{ApiError, ErrorBody},
    services::{
        kyc::{KycDocumentView, KycProfileView},
        DocumentUpload, KycStatusView, KycSubmission,
    },
    state::AppState,
    storage::DocumentType,
};

/// Multipart form accepted by the document upload (documentation only).
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct DocumentForm {
    /// `passport`, `drivers_license`, `national_id`, `proof_of_address` or `selfie`
    document_type: String,
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitResponse {
    pub profile: KycProfileView,
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "PayloadTooLarge", err.body_text());
    }
    ApiError::bad_request("file", err.body_text())
}

fn parse_document_type(raw: &str) -> Result<DocumentType, ApiError> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_string()))
        .map_err(|_| ApiError::bad_request("document_type", format!("unknown document type '{raw}'")))
}

/// Submit personal data for verification.
///
/// PII is encrypted before it is stored; the profile moves to `pending`.
#[utoipa::path(
    post,
    path = "/api/v1/kyc/submit",
    tag = "KYC",
    security(("bearer_auth" = [])),
    request_body = KycSubmission,
    responses(
        (status = 200, description = "Profile submitted", body = SubmitResponse),
        (status = 400, description = "Missing or malformed field", body = ErrorBody),
        (status = 422, description = "Profile cannot be resubmitted in its current status", body = ErrorBody)
    )
)]
pub async fn submit(
    Auth(user): Auth,
    State(state): State<AppState>,
    ApiJson(submission): ApiJson<KycSubmission>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let profile = state.kyc.submit(&user.user_id, submission)?;
    Ok(Json(SubmitResponse {
        profile: KycProfileView::from(&profile),
    }))
}

/// Upload an identity document (JPEG, PNG or PDF, up to 10 MiB).
#[utoipa::path(
    post,
    path = "/api/v1/kyc/documents",
    tag = "KYC",
    security(("bearer_auth" = [])),
    request_body(content = DocumentForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Document stored", body = KycDocumentView),
        (status = 400, description = "Missing field or unknown document type", body = ErrorBody),
        (status = 413, description = "Document too large", body = ErrorBody),
        (status = 415, description = "Unsupported file type", body = ErrorBody)
    )
)]
pub async fn upload_document(
    Auth(user): Auth,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<KycDocumentView>), ApiError> {
    let mut document_type = None;
    let mut file = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("document_type") => {
                let raw = field.text().await.map_err(multipart_error)?;
                document_type = Some(parse_document_type(&raw)?);
            }
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let mime_type = field.content_type().unwrap_or_default().to_string();
                let content = field.bytes().await.map_err(multipart_error)?;
                file = Some((file_name, mime_type, content.to_vec()));
            }
            _ => {}
        }
    }

    let document_type =
        document_type.ok_or_else(|| ApiError::bad_request("document_type", "document_type is required"))?;
    let (file_name, mime_type, content) = file.ok_or_else(|| ApiError::bad_request("file", "file is required"))?;

    let doc = state.kyc.add_document(
        &user.user_id,
        DocumentUpload {
            document_type,
            file_name,
            mime_type,
            content,
        },
    )?;
    Ok((StatusCode::CREATED, Json(KycDocumentView::from(&doc))))
}

/// Profile, documents and risk score of the caller.
#[utoipa::path(
    get,
    path = "/api/v1/kyc/status",
    tag = "KYC",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "KYC status", body = KycStatusView)
    )
)]
pub async fn status(Auth(user): Auth, State(state): State<AppState>) -> Result<Json<KycStatusView>, ApiError> {
    Ok(Json(state.kyc.status(&user.user_id)?))
}
