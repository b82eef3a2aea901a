// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    body::Body,
    extract::{
        multipart::MultipartRejection,
        rejection::JsonRejection,
        Multipart, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::{
    error::{ApiError, ErrorBody},
    models::{DownloadRequestBody, FileIdRequest, UploadForm, UploadResponse, VerificationResponse},
    orchestrator::{DownloadRequest, UploadSession},
    state::AppState,
};

/// Upload a file.
///
/// The payload is encrypted as it streams in, fingerprinted over the
/// ciphertext and anchored before the metadata is committed.
#[utoipa::path(
    post,
    path = "/upload",
    tag = "Files",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "File stored and anchored", body = UploadResponse),
        (status = 400, description = "Missing or malformed file", body = ErrorBody),
        (status = 413, description = "Upload exceeds the size limit", body = ErrorBody),
        (status = 502, description = "Storage backend unavailable", body = ErrorBody),
        (status = 503, description = "Anchor unavailable", body = ErrorBody)
    )
)]
pub async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let mut multipart = multipart?;
    let mut session: Option<UploadSession> = None;
    let mut user_id: Option<String> = None;

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                if session.is_some() {
                    return Err(ApiError::bad_request("only one file per upload"));
                }
                let filename = field.file_name().unwrap_or_default().to_string();
                let mut upload = state
                    .orchestrator
                    .begin_upload(&filename, user_id.as_deref())
                    .await?;
                while let Some(chunk) = field.chunk().await? {
                    upload.write(&chunk).await?;
                }
                session = Some(upload);
            }
            Some("userId") => {
                let value = field.text().await?;
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                if let Some(upload) = session.as_mut() {
                    upload.set_uploaded_by(value)?;
                }
                user_id = Some(value.to_string());
            }
            _ => {}
        }
    }

    let session = session.ok_or_else(|| ApiError::bad_request("file is required"))?;
    let receipt = state.orchestrator.finish_upload(session).await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            file_id: receipt.file_id,
            fingerprint: receipt.fingerprint,
        }),
    ))
}

/// Download a file.
///
/// The attempt is logged first, then gated on the second factor, the
/// anchored fingerprint and the anomaly check. The plaintext is streamed.
#[utoipa::path(
    post,
    path = "/download",
    tag = "Files",
    request_body = DownloadRequestBody,
    responses(
        (status = 200, description = "Decrypted file", content_type = "application/octet-stream"),
        (status = 400, description = "Malformed request", body = ErrorBody),
        (status = 403, description = "Second factor failed or access denied", body = ErrorBody),
        (status = 404, description = "Unknown file", body = ErrorBody),
        (status = 409, description = "Integrity compromised", body = ErrorBody),
        (status = 503, description = "Ledger or anomaly check unavailable", body = ErrorBody)
    )
)]
pub async fn download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequestBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;
    let grant = state
        .orchestrator
        .download(DownloadRequest {
            file_id: body.file_id,
            user_id: body.user_id,
            ip: body.ip,
            otp_code: body.otp_code,
        })
        .await?;

    let headers = [
        (
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        ),
        (
            header::CONTENT_DISPOSITION,
            content_disposition(&grant.record.filename),
        ),
        (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
    ];
    Ok((headers, Body::from_stream(grant.body)).into_response())
}

/// Check that a file's recorded fingerprint is anchored.
#[utoipa::path(
    post,
    path = "/verify-ownership",
    tag = "Files",
    request_body = FileIdRequest,
    responses(
        (status = 200, body = VerificationResponse),
        (status = 404, description = "Unknown file", body = ErrorBody)
    )
)]
pub async fn verify_ownership(
    State(state): State<AppState>,
    payload: Result<Json<FileIdRequest>, JsonRejection>,
) -> Result<Json<VerificationResponse>, ApiError> {
    let Json(request) = payload?;
    let verified = state.orchestrator.verify_ownership(&request.file_id).await?;
    Ok(Json(VerificationResponse {
        file_id: request.file_id,
        verified,
    }))
}

/// Check that a file is anchored and its stored ciphertext still matches.
#[utoipa::path(
    post,
    path = "/verify-integrity",
    tag = "Files",
    request_body = FileIdRequest,
    responses(
        (status = 200, body = VerificationResponse),
        (status = 404, description = "Unknown file", body = ErrorBody)
    )
)]
pub async fn verify_integrity(
    State(state): State<AppState>,
    payload: Result<Json<FileIdRequest>, JsonRejection>,
) -> Result<Json<VerificationResponse>, ApiError> {
    let Json(request) = payload?;
    let verified = state.orchestrator.verify_integrity(&request.file_id).await?;
    Ok(Json(VerificationResponse {
        file_id: request.file_id,
        verified,
    }))
}

/// `attachment` disposition with an ASCII fallback name and an RFC 5987
/// encoded UTF-8 name.
fn content_disposition(filename: &str) -> HeaderValue {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() || c == ' ') && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut encoded = String::with_capacity(filename.len() * 3);
    for byte in filename.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }

    HeaderValue::from_str(&format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}"
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
