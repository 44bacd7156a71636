//! Password login and signup.
//!
//! Both endpoints sit behind the adaptive limiter: a 401 from `login` counts as
//! an authentication failure for the calling client, any 2xx clears its record.

use axum::{Json, extract::Extension, http::StatusCode};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::{
    state::AuthState,
    types::{LoginRequest, SessionResponse, SignupRequest},
    utils::{valid_password, valid_username},
};
use crate::api::error::{ApiError, ErrorBody};

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session issued", body = SessionResponse),
        (status = 400, description = "Missing payload", body = ErrorBody),
        (status = 401, description = "Invalid username or password", body = ErrorBody),
        (status = 429, description = "Rate limited or locked", body = ErrorBody),
        (status = 503, description = "Store unavailable", body = ErrorBody)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Json<SessionResponse>, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::InvalidRequest("Missing payload".to_string()));
    };

    let user = auth_state.users().find_by_username(&request.username).await?;

    // Unknown usernames still pay for one hash verification.
    let Some(user) = user else {
        auth_state.passwords().check_decoy(request.password).await;
        debug!("login rejected: unknown username");
        return Err(ApiError::InvalidCredentials);
    };
    if !auth_state
        .passwords()
        .check_password_hash(request.password, user.password_hash.clone())
        .await
    {
        debug!(user_id = user.id, "login rejected: wrong password");
        return Err(ApiError::InvalidCredentials);
    }

    let session = auth_state.credentials().issue_session(user.id).await?;
    info!(user_id = user.id, "user logged in");

    Ok(Json(session.into()))
}

#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created and session issued", body = SessionResponse),
        (status = 400, description = "Invalid username or password", body = ErrorBody),
        (status = 409, description = "Username already taken", body = ErrorBody),
        (status = 429, description = "Rate limited or locked", body = ErrorBody),
        (status = 503, description = "Store unavailable", body = ErrorBody)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn signup(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupRequest>>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::InvalidRequest("Missing payload".to_string()));
    };

    if !valid_username(&request.username) {
        return Err(ApiError::InvalidRequest(
            "Username must be 3 to 50 letters, digits or underscores".to_string(),
        ));
    }
    if !valid_password(&request.password) {
        return Err(ApiError::InvalidRequest(
            "Password must be at least 8 characters with an uppercase letter, a digit and a symbol"
                .to_string(),
        ));
    }

    let password_hash = auth_state
        .passwords()
        .hash_password(request.password)
        .await?;
    let user = auth_state
        .users()
        .create(&request.username, &password_hash)
        .await?;
    let session = auth_state.credentials().issue_session(user.id).await?;
    info!(user_id = user.id, "user signed up");

    Ok((StatusCode::CREATED, Json(session.into())))
}
