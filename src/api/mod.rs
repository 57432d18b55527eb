//! HTTP surface over the coordinators.

pub mod dto;
pub mod error_handler;
pub mod handlers;
pub mod routes;

pub use dto::{BulkCreateRequest, BulkUpdateRequest, RoundResponse};
pub use error_handler::{ApiError, ApiErrorResponse};
pub use routes::create_router;
