//! HTTP handlers.
//!
//! Each handler converts the body into a round request, runs it on a
//! coordinator built from the shared dependencies and maps the outcome:
//! `200 OK` when every write succeeded, `207 Multi-Status` when some failed.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use super::dto::{BulkCreateRequest, BulkUpdateRequest, RoundResponse};
use super::error_handler::ApiErrorResponse;
use crate::application::{RoundOutcome, RoundStatus};
use crate::infrastructure::AppDependencies;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `healthy` while the process serves requests.
    pub status: String,
    /// Crate version.
    pub version: String,
    /// Size of the fan-out pool.
    pub fan_out_workers: usize,
}

/// POST /multiples/bulk-create
///
/// # Errors
///
/// Returns [`ApiErrorResponse`] when the round is rejected or aborted.
pub async fn bulk_create(
    State(dependencies): State<AppDependencies>,
    Json(request): Json<BulkCreateRequest>,
) -> Result<(StatusCode, Json<RoundResponse>), ApiErrorResponse> {
    let outcome = dependencies
        .creation_coordinator()
        .create_bulk(request.into())
        .await?;
    Ok(respond(outcome))
}

/// POST /multiples/bulk-update
///
/// # Errors
///
/// Returns [`ApiErrorResponse`] when the round is rejected or aborted.
pub async fn bulk_update(
    State(dependencies): State<AppDependencies>,
    Json(request): Json<BulkUpdateRequest>,
) -> Result<(StatusCode, Json<RoundResponse>), ApiErrorResponse> {
    let outcome = dependencies
        .update_coordinator()
        .update_bulk(request.into())
        .await?;
    Ok(respond(outcome))
}

/// GET /health
#[allow(clippy::unused_async)]
pub async fn health_check(
    State(dependencies): State<AppDependencies>,
) -> (StatusCode, Json<HealthResponse>) {
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        fan_out_workers: dependencies.executor().workers(),
    };
    (StatusCode::OK, Json(response))
}

fn respond(outcome: RoundOutcome) -> (StatusCode, Json<RoundResponse>) {
    let status = match outcome.status() {
        RoundStatus::Complete => StatusCode::OK,
        RoundStatus::Partial { .. } => StatusCode::MULTI_STATUS,
    };
    (status, Json(outcome.into()))
}
