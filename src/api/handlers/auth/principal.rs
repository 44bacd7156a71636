//! Authenticated principal extraction.
//!
//! Flow Overview: read the bearer token, verify it offline with the shared
//! secret, and hand the subject to the handler. Every failure is a plain 401.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use std::sync::Arc;
use tracing::error;

use super::{state::AuthState, utils::extract_bearer_token};
use crate::api::error::ApiError;

/// Authenticated user context derived from the access token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(auth_state) = parts.extensions.get::<Arc<AuthState>>() else {
            error!("AuthState extension missing from router");
            return Err(ApiError::Internal);
        };
        let token = extract_bearer_token(&parts.headers).ok_or(ApiError::Unauthenticated)?;
        let user_id = auth_state.credentials().verify_access(&token)?;
        Ok(Self { user_id })
    }
}
