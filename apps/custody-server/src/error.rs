// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::orchestrator::CustodyError;
use crate::storage::DenialReason;

/// An error as returned to HTTP clients.
///
/// `error` is a short human-readable summary and `reason` a stable
/// machine-readable code. Neither ever carries internal detail.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub reason: String,
}

/// Error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Summary of what went wrong
    pub error: String,
    /// Stable machine-readable code, e.g. `invalid_2fa`
    pub reason: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            reason: reason.into(),
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error, "validation")
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error, "not_found")
    }

    pub fn payload_too_large() -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "Upload exceeds the size limit",
            "payload_too_large",
        )
    }
}

impl From<CustodyError> for ApiError {
    fn from(e: CustodyError) -> Self {
        match e {
            // Validation messages are written for the caller and carry no internals
            CustodyError::Validation(msg) => ApiError::bad_request(msg),
            CustodyError::NotFound(what) => {
                tracing::debug!(what = %what, "Resource not found");
                ApiError::not_found("Resource not found")
            }
            CustodyError::Denied(reason) => denial(reason),
            CustodyError::Storage(detail) => {
                tracing::error!(error = %detail, "Storage backend failure");
                ApiError::new(StatusCode::BAD_GATEWAY, "Storage backend unavailable", "storage_unavailable")
            }
            CustodyError::Ledger(detail) => {
                tracing::error!(error = %detail, "Ledger failure");
                ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Ledger unavailable",
                    "ledger_unavailable",
                )
            }
            CustodyError::ClassifierUnavailable(detail) => {
                tracing::error!(error = %detail, "Anomaly classifier failure");
                ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Anomaly check unavailable",
                    "anomaly_check_unavailable",
                )
            }
            CustodyError::Crypto(detail) | CustodyError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal failure");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal error", "internal")
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError::payload_too_large();
        }
        tracing::debug!(error = %e, "Malformed multipart body");
        ApiError::bad_request("malformed multipart body")
    }
}

fn denial(reason: DenialReason) -> ApiError {
    match reason {
        DenialReason::InvalidSecondFactor => ApiError::new(
            StatusCode::FORBIDDEN,
            "Second factor verification failed",
            reason.as_str(),
        ),
        DenialReason::IntegrityCompromised => ApiError::new(
            StatusCode::CONFLICT,
            "File integrity could not be confirmed",
            reason.as_str(),
        ),
        DenialReason::SuspiciousActivity => {
            ApiError::new(StatusCode::FORBIDDEN, "Access denied", reason.as_str())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.error,
            reason: self.reason,
        });
        (self.status, body).into_response()
    }
}
