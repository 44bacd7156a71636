//! Authenticated self-service endpoints.
//!
//! Flow Overview:
//! 1) Authenticate via bearer access token.
//! 2) Resolve the current user from the store.
//! 3) Changing the password revokes every refresh token of the user.

use axum::{Json, extract::Extension, http::StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;

use super::auth::{AuthState, principal::Principal};
use crate::api::error::{ApiError, ErrorBody};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MeResponse {
    pub id: i64,
    pub username: String,
}

#[derive(Deserialize, Serialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

impl std::fmt::Debug for ChangePasswordRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangePasswordRequest").finish_non_exhaustive()
    }
}

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "Return the authenticated user.", body = MeResponse),
        (status = 401, description = "Missing, invalid or expired access token.", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "me"
)]
pub async fn get_me(
    principal: Principal,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<MeResponse>, ApiError> {
    // A valid token for a deleted user is treated like no token at all.
    let user = auth_state
        .users()
        .find_by_id(principal.user_id)
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    Ok(Json(MeResponse {
        id: user.id,
        username: user.username,
    }))
}

#[utoipa::path(
    put,
    path = "/v1/me/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed; all sessions revoked."),
        (status = 400, description = "New password does not meet the rules.", body = ErrorBody),
        (status = 401, description = "Invalid access token or wrong current password.", body = ErrorBody),
        (status = 503, description = "Store unavailable.", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "me"
)]
#[instrument(skip_all, fields(user_id = principal.user_id))]
pub async fn change_password(
    principal: Principal,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ChangePasswordRequest>>,
) -> Result<StatusCode, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::InvalidRequest("Missing payload".to_string()));
    };

    let user = auth_state
        .users()
        .find_by_id(principal.user_id)
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    if !auth_state
        .passwords()
        .check_password_hash(request.current_password, user.password_hash.clone())
        .await
    {
        return Err(ApiError::WrongCurrentPassword);
    }
    if !super::auth::valid_password(&request.new_password) {
        return Err(ApiError::InvalidRequest(
            "Password must be at least 8 characters with an uppercase letter, a digit and a symbol"
                .to_string(),
        ));
    }

    let password_hash = auth_state
        .passwords()
        .hash_password(request.new_password)
        .await?;
    // Sessions go before the new hash is stored.
    let revoked = auth_state.credentials().revoke_all(user.id).await?;
    auth_state
        .users()
        .update_password(user.id, &password_hash)
        .await?;
    info!(revoked, "password changed, sessions revoked");

    Ok(StatusCode::NO_CONTENT)
}
