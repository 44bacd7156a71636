//! Limiter middleware: admit before the handler, observe its status after.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{net::SocketAddr, sync::Arc};

use super::{
    rate_limit::{AdaptiveLimiter, Decision, Outcome},
    utils::extract_client_ip,
};
use crate::api::error::ApiError;

// Requests without any identity share one bucket.
const UNKNOWN_CLIENT: &str = "unknown";

pub async fn limit(
    State(limiter): State<Arc<AdaptiveLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = extract_client_ip(request.headers(), peer)
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

    let decision = limiter.admit(&identity);
    let retry_after = decision.retry_after_seconds().unwrap_or_default();
    match decision {
        Decision::Allow => {}
        Decision::RateLimited { .. } => {
            return ApiError::RateLimited { retry_after }.into_response();
        }
        Decision::Locked { .. } => return ApiError::Locked { retry_after }.into_response(),
    }

    let response = next.run(request).await;
    limiter.observe(&identity, Outcome::from_status(response.status()));
    response
}
