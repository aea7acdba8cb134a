use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::{config::ConfigError, credentials::CredentialError, validation::FieldError};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Username already taken")]
    UsernameTaken,

    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Search task failed: {0}")]
    TaskFailed(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Meilisearch error: {0}")]
    Search(#[from] meilisearch_sdk::errors::Error),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid username or password")]
    AuthenticationFailure,

    #[error("Account pending approval by an administrator")]
    PendingApproval,

    #[error("Login required")]
    Unauthenticated,

    #[error("Invalid input")]
    ValidationFailure(Vec<FieldError>),

    #[error("Not found or access denied")]
    AuthorizationFailure,

    #[error("Not found or access denied")]
    NotFound,

    #[error("{0}")]
    Conflict(&'static str),

    #[error("{0}")]
    Rejected(&'static str),

    #[error("Malformed payload")]
    MalformedPayload,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl From<CredentialError> for AppError {
    fn from(e: CredentialError) -> Self {
        AppError::InternalError(Box::new(e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::AuthenticationFailure { .. } => StatusCode::UNAUTHORIZED,
            AppError::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            AppError::PendingApproval { .. } => StatusCode::FORBIDDEN,
            AppError::ValidationFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::AuthorizationFailure { .. } => StatusCode::NOT_FOUND,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Rejected { .. } => StatusCode::BAD_REQUEST,
            AppError::MalformedPayload { .. } => StatusCode::BAD_REQUEST,
            AppError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match self {
            AppError::ValidationFailure(errors) => json!({
                "error": "Invalid input",
                "fields": errors,
            }),
            AppError::Storage(e) => {
                error!("Storage failure: {e}");
                json!({ "error": "Internal error" })
            }
            AppError::InternalError(e) => {
                error!("Internal failure: {e}");
                json!({ "error": "Internal error" })
            }
            other => json!({ "error": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

/// Anything that can stop the service from coming up.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
