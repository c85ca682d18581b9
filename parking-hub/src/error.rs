//! Errors surfaced by the REST routes.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::{authority::UpdateError, spot::SpotId, store::PersistenceError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("parking spot {0} not found")]
    SpotNotFound(SpotId),
    #[error(transparent)]
    Update(#[from] UpdateError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            ApiError::SpotNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Update(_) | ApiError::Persistence(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "persistence_failed")
            }
        };
        let body = ErrorResponse {
            error,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
