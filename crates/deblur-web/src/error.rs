//! Error types for the deblur web service

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ephemeral_blob_store::StoreError;
use serde_json::json;
use std::fmt;

/// Startup errors
#[derive(Debug)]
pub enum WebError {
    Config(String),
    Store(StoreError),
    Io(Box<std::io::Error>),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Config(msg) => write!(f, "Configuration error: {}", msg),
            WebError::Store(err) => write!(f, "Storage error: {}", err),
            WebError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for WebError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WebError::Store(err) => Some(err),
            WebError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<StoreError> for WebError {
    fn from(err: StoreError) -> Self {
        WebError::Store(err)
    }
}

impl From<std::io::Error> for WebError {
    fn from(err: std::io::Error) -> Self {
        WebError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for WebError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        WebError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WebError>;

/// Handler error that converts to an HTTP response
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".into(),
                )
            }
        };

        (status, axum::Json(json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidArgument(msg) => AppError::BadRequest(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Invalid form data: {}", err))
    }
}
