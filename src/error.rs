//! Error types for the backend.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    /// Model or tokenizer failed to load. Fatal at startup; never served.
    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Empty text provided")]
    EmptyInput,

    #[error("Tokenization failed: {0}")]
    Tokenize(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ServerError::ModelLoad(ref msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "model_load_error",
                msg.clone(),
            ),
            ServerError::EmptyInput => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "empty_input",
                self.to_string(),
            ),
            ServerError::Tokenize(ref msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "tokenization_error",
                msg.clone(),
            ),
            ServerError::Generation(ref msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "generation_error",
                msg.clone(),
            ),
            ServerError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            ServerError::Io(ref e) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error", e.to_string()),
            ServerError::Internal(ref msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
