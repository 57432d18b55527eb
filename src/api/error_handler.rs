//! Maps round errors to HTTP responses.
//!
//! | Error | Status | Code |
//! |---|---|---|
//! | validation | 422 | `VALIDATION_ERROR` |
//! | concurrent modification | 409 | `CONCURRENT_MODIFICATION` |
//! | queue submission | 503 | `QUEUE_UNAVAILABLE` |
//! | case or multiple store | 502 | `STORE_UNAVAILABLE` |

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::application::CoordinationError;
use crate::domain::ValidationError;

/// Error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Extra context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Creates an error without details.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Attaches details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// An [`ApiError`] with its status code.
#[derive(Debug, Clone)]
pub struct ApiErrorResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Body.
    pub error: ApiError,
}

impl ApiErrorResponse {
    /// Creates a response.
    #[must_use]
    pub const fn new(status: StatusCode, error: ApiError) -> Self {
        Self { status, error }
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

impl From<CoordinationError> for ApiErrorResponse {
    fn from(error: CoordinationError) -> Self {
        let message = error.to_string();
        match error {
            CoordinationError::Validation(ValidationError::NoEligibleCases { failures }) => {
                Self::new(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ApiError::new("VALIDATION_ERROR", message)
                        .with_details(json!({ "failures": failures })),
                )
            }
            CoordinationError::Validation(_) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiError::new("VALIDATION_ERROR", message),
            ),
            CoordinationError::ConcurrentModification {
                reference,
                expected,
                actual,
            } => Self::new(
                StatusCode::CONFLICT,
                ApiError::new("CONCURRENT_MODIFICATION", message).with_details(json!({
                    "reference": reference,
                    "expected_version": expected,
                    "actual_version": actual,
                })),
            ),
            CoordinationError::QueueSubmission { job_id, .. } => {
                tracing::error!(job_id = %job_id, error = %message, "update job not acknowledged");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiError::new("QUEUE_UNAVAILABLE", message)
                        .with_details(json!({ "job_id": job_id })),
                )
            }
            CoordinationError::CaseStore(_) | CoordinationError::MultipleStore(_) => {
                tracing::error!(error = %message, "store call failed");
                Self::new(
                    StatusCode::BAD_GATEWAY,
                    ApiError::new("STORE_UNAVAILABLE", message),
                )
            }
        }
    }
}
