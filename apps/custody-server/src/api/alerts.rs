// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use chrono::Utc;

use crate::{
    error::{ApiError, ErrorBody},
    models::AlertsQuery,
    state::AppState,
    storage::AlertEvent,
};

/// Longest range served in one request, in days.
const MAX_RANGE_DAYS: i64 = 31;

/// Alerts raised between two dates (inclusive, UTC), oldest first.
#[utoipa::path(
    get,
    path = "/alerts",
    params(AlertsQuery),
    tag = "Alerts",
    responses(
        (status = 200, body = [AlertEvent]),
        (status = 400, description = "Bad date range", body = ErrorBody)
    )
)]
pub async fn list_alerts(
    State(state): State<AppState>,
    query: Result<Query<AlertsQuery>, QueryRejection>,
) -> Result<Json<Vec<AlertEvent>>, ApiError> {
    let Query(query) = query?;
    let today = Utc::now().date_naive();
    let to = query.to.unwrap_or(today);
    let from = query.from.unwrap_or(to);

    if (to - from).num_days() > MAX_RANGE_DAYS {
        return Err(ApiError::bad_request(format!(
            "date range must not exceed {MAX_RANGE_DAYS} days"
        )));
    }

    let events = state.orchestrator.alerts(from, to).await?;
    Ok(Json(events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::test_app;
    use crate::storage::AlertKind;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn raised_alerts_are_listed_for_today() {
        let app = test_app();
        app.state.orchestrator.alert_log().raise(
            AlertEvent::new(AlertKind::SuspiciousActivity)
                .with_user("alice")
                .with_ip("10.0.0.6"),
        );

        let Json(events) = list_alerts(
            State(app.state.clone()),
            Ok(Query(AlertsQuery { from: None, to: None })),
        )
        .await
        .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::SuspiciousActivity);
        assert_eq!(events[0].user_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn reversed_or_oversized_ranges_are_rejected() {
        let app = test_app();
        let today = Utc::now().date_naive();

        let err = list_alerts(
            State(app.state.clone()),
            Ok(Query(AlertsQuery {
                from: Some(today),
                to: Some(today - chrono::Duration::days(1)),
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = list_alerts(
            State(app.state.clone()),
            Ok(Query(AlertsQuery {
                from: Some(today - chrono::Duration::days(60)),
                to: Some(today),
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
