//! Router tests through `tower::ServiceExt::oneshot`.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{Harness, reference, test_config};
use http_body_util::BodyExt;
use multiples_sync::api::{ApiError, RoundResponse, create_router};
use multiples_sync::application::{CaseStoreError, QueueError, RetryPolicy, RoundStatus};
use multiples_sync::infrastructure::AppConfig;
use rstest::rstest;
use serde_json::{Value, json};
use tower::ServiceExt;

fn router(harness: &Harness) -> Router {
    create_router(harness.dependencies.clone())
}

async fn post(router: Router, path: &str, body: &Value) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

// =============================================================================
// Health
// =============================================================================

#[rstest]
#[tokio::test]
async fn health_reports_pool_size() {
    let harness = Harness::with_cases(&[]);
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let response = router(&harness).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["fan_out_workers"], 4);
}

// =============================================================================
// Bulk Create
// =============================================================================

#[rstest]
#[tokio::test]
async fn bulk_create_returns_committed_multiple() {
    let harness = Harness::with_cases(&["X", "Y"]);

    let (status, body) = post(
        router(&harness),
        "/multiples/bulk-create",
        &json!({
            "multiple": { "name": "Acme Ltd" },
            "requested": ["X", "Y"],
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let response: RoundResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response.status, RoundStatus::Complete);
    assert_eq!(response.multiple.reference().unwrap().as_str(), "6000001");
    assert_eq!(Harness::describe(&response.multiple), vec!["X*", "Y"]);
}

#[rstest]
#[tokio::test]
async fn partial_success_is_multi_status() {
    let harness = Harness::with_config(
        AppConfig {
            retry: RetryPolicy::no_retry(),
            ..test_config()
        },
        &["X", "Y"],
    );
    harness
        .cases
        .fail_always(reference("Y"), CaseStoreError::Timeout(100));

    let (status, body) = post(
        router(&harness),
        "/multiples/bulk-create",
        &json!({
            "multiple": { "name": "Acme Ltd" },
            "requested": ["X", "Y"],
        }),
    )
    .await;

    assert_eq!(status, StatusCode::MULTI_STATUS);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "partial");
    assert_eq!(body["failed"], 1);
    assert_eq!(body["failures"][0]["case_reference"], "Y");
}

#[rstest]
#[tokio::test]
async fn empty_create_is_unprocessable() {
    let harness = Harness::with_cases(&[]);

    let (status, body) = post(
        router(&harness),
        "/multiples/bulk-create",
        &json!({ "multiple": { "name": "Acme Ltd" } }),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let error: ApiError = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.code, "VALIDATION_ERROR");
}

// =============================================================================
// Bulk Update
// =============================================================================

#[rstest]
#[tokio::test]
async fn bulk_update_applies_membership_change() {
    let harness = Harness::with_cases(&["C"]);
    let stored = harness.seed_multiple("6000001", &["A", "B"]);

    let (status, body) = post(
        router(&harness),
        "/multiples/bulk-update",
        &json!({
            "multiple": stored,
            "requested": ["B", "C"],
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let response: RoundResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(Harness::describe(&response.multiple), vec!["B*", "C"]);
    assert_eq!(response.multiple.version(), Some(2));
}

#[rstest]
#[tokio::test]
async fn stale_update_is_conflict() {
    let harness = Harness::with_cases(&[]);
    let stored = harness.seed_multiple("6000001", &["A", "B"]);
    let stale = stored.clone().with_version(7);

    let (status, body) = post(
        router(&harness),
        "/multiples/bulk-update",
        &json!({
            "multiple": stale,
            "requested": ["A", "B"],
        }),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    let error: ApiError = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.code, "CONCURRENT_MODIFICATION");
    assert_eq!(error.details.unwrap()["actual_version"], 1);
}

#[rstest]
#[tokio::test]
async fn invalid_target_is_unprocessable() {
    let harness = Harness::with_cases(&[]);
    let stored = harness.seed_multiple("6000001", &["A", "B"]);

    let (status, _) = post(
        router(&harness),
        "/multiples/bulk-update",
        &json!({
            "multiple": stored,
            "matched": ["B"],
            "target_reference": "6000001",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(harness.cases.submissions().is_empty());
}

#[rstest]
#[tokio::test]
async fn unacknowledged_queue_is_service_unavailable() {
    let harness = Harness::with_cases(&["C"]);
    let stored = harness.seed_multiple("6000001", &["A"]);
    harness
        .queue
        .fail_next(QueueError::Rejected("throttled".to_string()));

    let (status, _) = post(
        router(&harness),
        "/multiples/bulk-update",
        &json!({
            "multiple": stored,
            "requested": ["A", "C"],
            "mode": "durable_queue",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
