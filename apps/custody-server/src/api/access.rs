// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;

use crate::{
    error::{ApiError, ErrorBody},
    models::{
        AccessLogQuery, LogAccessRequest, LogAccessResponse, DEFAULT_ACCESS_LOG_WINDOW_SECS,
        MAX_ACCESS_LOG_WINDOW_SECS,
    },
    state::AppState,
    storage::{AccessAttempt, AccessLogEntry},
};

/// Append an access event reported by a client to the ledger.
#[utoipa::path(
    post,
    path = "/log-access",
    request_body = LogAccessRequest,
    tag = "Access Ledger",
    responses(
        (status = 201, body = LogAccessResponse),
        (status = 400, description = "Malformed event or timestamp outside the accepted range", body = ErrorBody),
        (status = 503, description = "Ledger unavailable", body = ErrorBody)
    )
)]
pub async fn log_access(
    State(state): State<AppState>,
    payload: Result<Json<LogAccessRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<LogAccessResponse>), ApiError> {
    let Json(request) = payload?;
    let entry = state
        .orchestrator
        .log_access(AccessAttempt {
            user_id: request.user_id,
            file_id: request.file_id,
            ip: request.ip,
            timestamp: request.timestamp.unwrap_or_else(Utc::now),
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(LogAccessResponse {
            sequence: entry.sequence,
        }),
    ))
}

/// A user's ledger entries within the look-back window, oldest first.
#[utoipa::path(
    get,
    path = "/access-log",
    params(AccessLogQuery),
    tag = "Access Ledger",
    responses(
        (status = 200, body = [AccessLogEntry]),
        (status = 400, description = "Missing userId or bad window", body = ErrorBody)
    )
)]
pub async fn access_log(
    State(state): State<AppState>,
    query: Result<Query<AccessLogQuery>, QueryRejection>,
) -> Result<Json<Vec<AccessLogEntry>>, ApiError> {
    let Query(query) = query?;
    let window_secs = query.window_secs.unwrap_or(DEFAULT_ACCESS_LOG_WINDOW_SECS);
    if window_secs == 0 || window_secs > MAX_ACCESS_LOG_WINDOW_SECS {
        return Err(ApiError::bad_request(format!(
            "windowSecs must be between 1 and {MAX_ACCESS_LOG_WINDOW_SECS}"
        )));
    }

    let entries = state
        .orchestrator
        .access_log(&query.user_id, Duration::from_secs(window_secs))
        .await?;
    Ok(Json(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::test_app;

    fn event(user: &str, ip: &str) -> LogAccessRequest {
        LogAccessRequest {
            user_id: user.into(),
            file_id: "file-1".into(),
            ip: ip.into(),
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn logged_events_are_listed_per_user() {
        let app = test_app();
        for (user, ip) in [("alice", "10.0.0.1"), ("bob", "10.0.0.2"), ("alice", "10.0.0.3")] {
            let (status, _) = log_access(State(app.state.clone()), Ok(Json(event(user, ip))))
                .await
                .unwrap();
            assert_eq!(status, StatusCode::CREATED);
        }

        let Json(entries) = access_log(
            State(app.state.clone()),
            Ok(Query(AccessLogQuery {
                user_id: "alice".into(),
                window_secs: None,
            })),
        )
        .await
        .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].ip, "10.0.0.1");
        assert_eq!(entries[1].ip, "10.0.0.3");
        assert!(entries[0].sequence < entries[1].sequence);
    }

    #[tokio::test]
    async fn sequences_increase() {
        let app = test_app();
        let (_, Json(first)) = log_access(State(app.state.clone()), Ok(Json(event("alice", "10.0.0.1"))))
            .await
            .unwrap();
        let (_, Json(second)) = log_access(State(app.state.clone()), Ok(Json(event("alice", "10.0.0.1"))))
            .await
            .unwrap();
        assert_eq!(second.sequence, first.sequence + 1);
    }

    #[tokio::test]
    async fn invalid_ip_is_rejected() {
        let app = test_app();
        let err = log_access(State(app.state.clone()), Ok(Json(event("alice", "somewhere"))))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn backdated_event_is_rejected() {
        let app = test_app();
        let mut backdated = event("alice", "10.0.0.9");
        backdated.timestamp = Some(Utc::now() - chrono::Duration::days(2));
        let err = log_access(State(app.state.clone()), Ok(Json(backdated)))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(app.state.orchestrator.ledger().len().unwrap(), 0);
    }

    #[tokio::test]
    async fn window_is_bounded() {
        let app = test_app();
        for window in [0, MAX_ACCESS_LOG_WINDOW_SECS + 1] {
            let err = access_log(
                State(app.state.clone()),
                Ok(Query(AccessLogQuery {
                    user_id: "alice".into(),
                    window_secs: Some(window),
                })),
            )
            .await
            .unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
        }
    }
}
