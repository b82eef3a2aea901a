// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{DefaultBodyLimit, Request},
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    error::ErrorBody,
    models::{
        DownloadRequestBody, FileIdRequest, IssueSecondFactorResponse, LogAccessRequest,
        LogAccessResponse, UploadForm, UploadResponse, VerificationResponse,
        VerifySecondFactorRequest, VerifySecondFactorResponse,
    },
    state::AppState,
    storage::{AccessLogEntry, AccessOutcome, AccessStatus, AlertEvent, AlertKind, Severity},
};

pub mod access;
pub mod alerts;
pub mod files;
pub mod health;
pub mod second_factor;

pub fn router(state: AppState) -> Router {
    let max_upload_bytes = state.config.max_upload_bytes;

    let routes = Router::new()
        .route(
            "/upload",
            post(files::upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/download", post(files::download))
        .route("/verify-ownership", post(files::verify_ownership))
        .route("/verify-integrity", post(files::verify_integrity))
        .route(
            "/issue-second-factor",
            get(second_factor::issue_second_factor),
        )
        .route(
            "/verify-second-factor",
            post(second_factor::verify_second_factor),
        )
        .route(
            "/second-factor/{user_id}",
            delete(second_factor::revoke_second_factor),
        )
        .route("/log-access", post(access::log_access))
        .route("/access-log", get(access::access_log))
        .route("/alerts", get(alerts::list_alerts))
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state);

    Router::new()
        .merge(routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "request",
                method = %request.method(),
                path = %request.uri().path(),
                request_id,
            )
        }))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        files::upload,
        files::download,
        files::verify_ownership,
        files::verify_integrity,
        second_factor::issue_second_factor,
        second_factor::verify_second_factor,
        second_factor::revoke_second_factor,
        access::log_access,
        access::access_log,
        alerts::list_alerts,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            UploadForm,
            UploadResponse,
            DownloadRequestBody,
            FileIdRequest,
            VerificationResponse,
            IssueSecondFactorResponse,
            VerifySecondFactorRequest,
            VerifySecondFactorResponse,
            LogAccessRequest,
            LogAccessResponse,
            AccessLogEntry,
            AccessOutcome,
            AccessStatus,
            AlertEvent,
            AlertKind,
            Severity,
            ErrorBody,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Files", description = "Encrypted upload, gated download and verification"),
        (name = "Second Factor", description = "TOTP enrolment and checks"),
        (name = "Access Ledger", description = "Append-only record of access attempts"),
        (name = "Alerts", description = "Integrity and anomaly alerts"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;
