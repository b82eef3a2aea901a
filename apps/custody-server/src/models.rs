// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the REST API. Field names are camelCase
//! on the wire. Ledger entries and alert events are served as their storage
//! types ([`crate::storage::AccessLogEntry`], [`crate::storage::AlertEvent`]).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Default `windowSecs` for `/access-log`.
pub const DEFAULT_ACCESS_LOG_WINDOW_SECS: u64 = 3600;

/// Largest accepted `windowSecs` (30 days).
pub const MAX_ACCESS_LOG_WINDOW_SECS: u64 = 30 * 24 * 3600;

// =============================================================================
// Files
// =============================================================================

/// Multipart form accepted by `/upload` (documentation only).
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadForm {
    /// The file, with a filename
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
    /// Optional uploader, recorded with the file
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_id: String,
    /// SHA-256 of the stored ciphertext, lowercase hex
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequestBody {
    pub file_id: String,
    pub user_id: String,
    /// Client IP address as reported by the caller
    pub ip: String,
    /// Current 6-digit code from the user's authenticator
    pub otp_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileIdRequest {
    pub file_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResponse {
    pub file_id: String,
    pub verified: bool,
}

// =============================================================================
// Second Factor
// =============================================================================

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct IssueSecondFactorQuery {
    pub user_id: String,
    /// Current code for the active secret; required to rotate it
    #[serde(default)]
    pub otp_code: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct RevokeSecondFactorQuery {
    /// Current code for the secret being revoked
    pub otp_code: String,
}

/// A freshly issued TOTP secret. Shown once; only a sealed copy is kept.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IssueSecondFactorResponse {
    /// Base32 secret
    pub secret: String,
    /// `otpauth://` URI for authenticator apps
    #[serde(rename = "provisioningURI")]
    pub provisioning_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VerifySecondFactorRequest {
    pub code: String,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct VerifySecondFactorResponse {
    pub valid: bool,
}

// =============================================================================
// Access Ledger & Alerts
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogAccessRequest {
    pub user_id: String,
    pub file_id: String,
    pub ip: String,
    /// Defaults to the time of receipt
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct LogAccessResponse {
    pub sequence: u64,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogQuery {
    pub user_id: String,
    /// Look-back window in seconds (default 3600)
    pub window_secs: Option<u64>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AlertsQuery {
    /// First day, inclusive (default today, UTC)
    pub from: Option<NaiveDate>,
    /// Last day, inclusive (default today, UTC)
    pub to: Option<NaiveDate>,
}
