//! Validation errors surfaced by HTTP handlers (§7 kind g, propagation
//! policy). Store, wire, and transport errors stay in their own crates;
//! this enum covers only request-shape and entity-lookup failures that the
//! binary itself is responsible for classifying into a status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("entity not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] controller_store::StoreError),

    #[error(transparent)]
    Capability(#[from] controller_domain::capabilities::CapabilityError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Store(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Capability(_) => StatusCode::BAD_GATEWAY,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
