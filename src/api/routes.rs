//! Route table.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | POST | /multiples/bulk-create | `bulk_create` |
//! | POST | /multiples/bulk-update | `bulk_update` |
//! | GET | /health | `health_check` |

use axum::Router;
use axum::routing::{get, post};

use super::handlers::{bulk_create, bulk_update, health_check};
use crate::infrastructure::AppDependencies;

/// Creates the router over `dependencies`.
///
/// # Example
///
/// ```rust,ignore
/// use multiples_sync::api::create_router;
/// use multiples_sync::infrastructure::{AppConfig, AppDependencies};
///
/// let router = create_router(AppDependencies::in_memory(AppConfig::default())?);
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:8081").await?;
/// axum::serve(listener, router).await?;
/// ```
pub fn create_router(dependencies: AppDependencies) -> Router {
    Router::new()
        .route("/multiples/bulk-create", post(bulk_create))
        .route("/multiples/bulk-update", post(bulk_update))
        .route("/health", get(health_check))
        .with_state(dependencies)
}
