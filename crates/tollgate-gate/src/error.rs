use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use tollgate_types::api::ErrorBody;

use crate::rate_limit::Denial;

/// Everything the gate can fail with.
///
/// Authentication failures collapse into `InvalidSession` / `Unauthorized`
/// so the client never learns whether a token was expired, forged or
/// malformed.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("rate limit exceeded, retry after {}s", .0.retry_after)]
    RateLimitExceeded(Denial),

    #[error("invalid session")]
    InvalidSession,

    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("token signing failed: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),
}

impl From<anyhow::Error> for GateError {
    fn from(e: anyhow::Error) -> Self {
        GateError::StoreUnavailable(e.to_string())
    }
}

impl From<tokio::task::JoinError> for GateError {
    fn from(e: tokio::task::JoinError) -> Self {
        GateError::StoreUnavailable(format!("blocking task failed: {}", e))
    }
}

impl GateError {
    pub fn status(&self) -> StatusCode {
        match self {
            GateError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            GateError::InvalidSession | GateError::Unauthorized | GateError::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            GateError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GateError::Conflict(_) => StatusCode::CONFLICT,
            GateError::StoreUnavailable(_)
            | GateError::Configuration(_)
            | GateError::Token(_)
            | GateError::PasswordHash(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            GateError::RateLimitExceeded(denial) => return denial.into_response(),
            GateError::InvalidSession => "Invalid session".to_string(),
            GateError::Unauthorized => "Unauthorized".to_string(),
            GateError::InvalidCredentials => "Invalid email or password".to_string(),
            GateError::BadRequest(msg) | GateError::Conflict(msg) => msg,
            internal @ (GateError::StoreUnavailable(_)
            | GateError::Configuration(_)
            | GateError::Token(_)
            | GateError::PasswordHash(_)) => {
                error!(error = %internal, "Internal gate error");
                "Internal server error".to_string()
            }
        };

        (status, Json(ErrorBody::new(message))).into_response()
    }
}
