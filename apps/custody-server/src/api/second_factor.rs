// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    Json,
};

use crate::{
    error::{ApiError, ErrorBody},
    models::{
        IssueSecondFactorQuery, IssueSecondFactorResponse, RevokeSecondFactorQuery,
        VerifySecondFactorRequest, VerifySecondFactorResponse,
    },
    state::AppState,
};

/// Issue a TOTP secret for a user.
///
/// The secret is returned once. Only a sealed copy is stored. A user with an
/// active secret must present a current code (`otpCode`) to rotate it.
#[utoipa::path(
    get,
    path = "/issue-second-factor",
    params(IssueSecondFactorQuery),
    tag = "Second Factor",
    responses(
        (status = 200, body = IssueSecondFactorResponse),
        (status = 400, description = "Missing userId", body = ErrorBody),
        (status = 403, description = "Active secret exists and otpCode is missing or wrong", body = ErrorBody)
    )
)]
pub async fn issue_second_factor(
    State(state): State<AppState>,
    query: Result<Query<IssueSecondFactorQuery>, QueryRejection>,
) -> Result<([(header::HeaderName, HeaderValue); 1], Json<IssueSecondFactorResponse>), ApiError> {
    let Query(query) = query?;
    let issued = state
        .orchestrator
        .issue_second_factor(&query.user_id, query.otp_code.as_deref())
        .await?;
    tracing::info!(user_id = %query.user_id, "Second factor issued");

    Ok((
        [(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        Json(IssueSecondFactorResponse {
            secret: issued.secret,
            provisioning_uri: issued.provisioning_uri,
        }),
    ))
}

/// Check a code against a caller-supplied secret. Stateless.
#[utoipa::path(
    post,
    path = "/verify-second-factor",
    request_body = VerifySecondFactorRequest,
    tag = "Second Factor",
    responses((status = 200, body = VerifySecondFactorResponse))
)]
pub async fn verify_second_factor(
    State(state): State<AppState>,
    payload: Result<Json<VerifySecondFactorRequest>, JsonRejection>,
) -> Result<Json<VerifySecondFactorResponse>, ApiError> {
    let Json(request) = payload?;
    let valid = state
        .orchestrator
        .verify_second_factor(&request.code, &request.secret);
    Ok(Json(VerifySecondFactorResponse { valid }))
}

/// Revoke a user's second factor. Downloads are refused until re-issued.
#[utoipa::path(
    delete,
    path = "/second-factor/{user_id}",
    params(
        ("user_id" = String, Path, description = "User whose second factor is revoked"),
        RevokeSecondFactorQuery
    ),
    tag = "Second Factor",
    responses(
        (status = 204),
        (status = 403, description = "otpCode does not match the active secret", body = ErrorBody),
        (status = 404, description = "No active second factor", body = ErrorBody)
    )
)]
pub async fn revoke_second_factor(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
    query: Result<Query<RevokeSecondFactorQuery>, QueryRejection>,
) -> Result<StatusCode, ApiError> {
    let Query(query) = query?;
    state
        .orchestrator
        .revoke_second_factor(&user_id, &query.otp_code)
        .await?;
    tracing::info!(user_id = %user_id, "Second factor revoked");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{json_request, multipart_upload, read_json, test_app};
    use crate::second_factor::totp;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    fn issue_query(user_id: &str, otp_code: Option<&str>) -> Result<Query<IssueSecondFactorQuery>, QueryRejection> {
        Ok(Query(IssueSecondFactorQuery {
            user_id: user_id.into(),
            otp_code: otp_code.map(str::to_string),
        }))
    }

    fn revoke_query(otp_code: &str) -> Result<Query<RevokeSecondFactorQuery>, QueryRejection> {
        Ok(Query(RevokeSecondFactorQuery {
            otp_code: otp_code.into(),
        }))
    }

    #[tokio::test]
    async fn issue_returns_secret_and_uri() {
        let app = test_app();
        let (headers, Json(issued)) = issue_second_factor(State(app.state.clone()), issue_query("alice", None))
            .await
            .expect("issue succeeds");

        assert_eq!(headers[0].1, "no-store");
        assert_eq!(issued.secret.len(), 32);
        assert!(issued.provisioning_uri.starts_with("otpauth://totp/"));
        assert!(issued.provisioning_uri.contains(&issued.secret));
    }

    #[tokio::test]
    async fn reissue_for_enrolled_user_needs_current_code() {
        let app = test_app();
        let (_, Json(enrolled)) = issue_second_factor(State(app.state.clone()), issue_query("alice", None))
            .await
            .unwrap();

        let err = issue_second_factor(State(app.state.clone()), issue_query("alice", None))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.reason, "invalid_2fa");

        let code = totp::current_code(&enrolled.secret).unwrap();
        let (_, Json(rotated)) =
            issue_second_factor(State(app.state.clone()), issue_query("alice", Some(&code)))
                .await
                .unwrap();
        assert_ne!(rotated.secret, enrolled.secret);
    }

    #[tokio::test]
    async fn hijacked_reissue_cannot_open_a_download() {
        let app = test_app();
        let upload = app
            .router
            .clone()
            .oneshot(multipart_upload("notes.txt", b"0123456789", Some("alice")))
            .await
            .unwrap();
        assert_eq!(upload.status(), StatusCode::CREATED);
        let file_id = read_json(upload).await["fileId"].as_str().unwrap().to_string();

        app.state.orchestrator.issue_second_factor("alice", None).await.unwrap();

        // A second caller asking for alice's secret gets nothing usable
        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/issue-second-factor?userId=alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let guessed = totp::issue("alice", "Custody").unwrap();
        let response = app
            .router
            .clone()
            .oneshot(json_request(
                "POST",
                "/download",
                serde_json::json!({
                    "fileId": file_id,
                    "userId": "alice",
                    "ip": "10.0.0.1",
                    "otpCode": totp::current_code(&guessed.secret).unwrap(),
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn verify_accepts_current_code_only() {
        let app = test_app();
        let issued = totp::issue("alice", "Custody").unwrap();
        let code = totp::current_code(&issued.secret).unwrap();

        let Json(ok) = verify_second_factor(
            State(app.state.clone()),
            Ok(Json(VerifySecondFactorRequest {
                code,
                secret: issued.secret.clone(),
            })),
        )
        .await
        .unwrap();
        assert!(ok.valid);

        let Json(bad) = verify_second_factor(
            State(app.state.clone()),
            Ok(Json(VerifySecondFactorRequest {
                code: "12345".into(),
                secret: issued.secret,
            })),
        )
        .await
        .unwrap();
        assert!(!bad.valid);
    }

    #[tokio::test]
    async fn revoke_needs_current_code_and_is_not_found_twice() {
        let app = test_app();
        let issued = app.state.orchestrator.issue_second_factor("alice", None).await.unwrap();
        let code = totp::current_code(&issued.secret).unwrap();

        let err = revoke_second_factor(Path("alice".into()), State(app.state.clone()), revoke_query("000000x"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let status = revoke_second_factor(Path("alice".into()), State(app.state.clone()), revoke_query(&code))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let err = revoke_second_factor(Path("alice".into()), State(app.state.clone()), revoke_query(&code))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
