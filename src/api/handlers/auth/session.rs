//! Refresh-token rotation and logout.

use axum::{Json, extract::Extension, http::StatusCode};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::{
    principal::Principal,
    state::AuthState,
    types::{LogoutRequest, RefreshRequest, SessionResponse},
};
use crate::api::error::{ApiError, ErrorBody};

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Refresh token rotated, new session issued", body = SessionResponse),
        (status = 400, description = "Missing refresh token", body = ErrorBody),
        (status = 401, description = "Refresh token invalid, already used or expired", body = ErrorBody),
        (status = 503, description = "Store unavailable", body = ErrorBody)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn refresh(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RefreshRequest>>,
) -> Result<Json<SessionResponse>, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::InvalidRequest("Missing payload".to_string()));
    };
    if request.refresh_token.trim().is_empty() {
        return Err(ApiError::InvalidRequest(
            "refresh_token is required".to_string(),
        ));
    }

    let session = auth_state
        .credentials()
        .refresh_session(request.refresh_token.trim())
        .await?;
    debug!(user_id = session.subject_id, "session refreshed");

    Ok(Json(session.into()))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 204, description = "Refresh token revoked (or already gone)"),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
        (status = 503, description = "Store unavailable", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip_all, fields(user_id = principal.user_id))]
pub async fn logout(
    principal: Principal,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LogoutRequest>>,
) -> Result<StatusCode, ApiError> {
    // Best effort: a missing body or unknown token still logs out.
    if let Some(Json(request)) = payload {
        auth_state
            .credentials()
            .revoke_one(request.refresh_token.trim(), principal.user_id)
            .await?;
    }
    Ok(StatusCode::NO_CONTENT)
}
