//! HTTP error responses.
//!
//! Every failure leaves the API as `{ "error", "code" }` JSON with a stable,
//! upper-case machine code. Rate limiting adds `retry_after` and the
//! `Retry-After` header.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

use super::handlers::auth::{AuthError, HashError, StoreError};

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("invalid refresh token")]
    InvalidRefreshToken,
    #[error("refresh token expired")]
    RefreshTokenExpired,
    #[error("too many requests")]
    RateLimited { retry_after: u64 },
    #[error("too many failed attempts, try again later")]
    Locked { retry_after: u64 },
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("{0}")]
    InvalidRequest(String),
    #[error("username already taken")]
    UsernameTaken,
    #[error("current password is incorrect")]
    WrongCurrentPassword,
    #[error("service temporarily unavailable")]
    Unavailable,
    #[error("internal error")]
    Internal,
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated
            | Self::InvalidRefreshToken
            | Self::RefreshTokenExpired
            | Self::InvalidCredentials
            | Self::WrongCurrentPassword => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } | Self::Locked { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UsernameTaken => StatusCode::CONFLICT,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            Self::RefreshTokenExpired => "REFRESH_TOKEN_EXPIRED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Locked { .. } => "LOCKED",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::UsernameTaken => "USERNAME_TAKEN",
            Self::WrongCurrentPassword => "WRONG_CURRENT_PASSWORD",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after } | Self::Locked { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
            code: self.code().to_string(),
            retry_after: self.retry_after(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.body())).into_response();
        if let Some(seconds) = self.retry_after() {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated => Self::Unauthenticated,
            AuthError::InvalidRefreshToken => Self::InvalidRefreshToken,
            AuthError::RefreshTokenExpired => Self::RefreshTokenExpired,
            AuthError::Store(err) => err.into(),
            err @ (AuthError::Signing(_) | AuthError::Hash(_) | AuthError::Entropy) => {
                error!("Credential operation failed: {err}");
                Self::Internal
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UsernameTaken => Self::UsernameTaken,
            StoreError::Database(err) => {
                error!("Store unavailable: {err}");
                Self::Unavailable
            }
        }
    }
}

impl From<HashError> for ApiError {
    fn from(err: HashError) -> Self {
        error!("Password hashing failed: {err}");
        Self::Internal
    }
}
