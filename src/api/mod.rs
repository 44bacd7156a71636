use crate::api::handlers::{
    auth::{self, AdaptiveLimiter, AuthState},
    health, me,
};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
    routing::{get, post, put},
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, task::JoinHandle};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, debug, error, info, info_span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

pub(crate) mod error;
pub(crate) mod handlers;
// OpenAPI document for every routed handler.
mod openapi;

pub use error::{ApiError, ErrorBody};
pub use openapi::openapi;

/// Build the application router.
///
/// Login and signup get the adaptive limiter when `limiter` is set. `pool`,
/// when present, is only used by `/health`; the stores inside `auth_state`
/// carry their own handles.
#[must_use]
pub fn app(
    auth_state: Arc<AuthState>,
    limiter: Option<Arc<AdaptiveLimiter>>,
    pool: Option<PgPool>,
) -> Router {
    let limited = Router::new()
        .route("/v1/auth/signup", post(auth::login::signup))
        .route("/v1/auth/login", post(auth::login::login));
    let limited = match limiter {
        Some(limiter) => limited.route_layer(middleware::from_fn_with_state(
            limiter,
            auth::middleware::limit,
        )),
        None => limited,
    };

    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_origin(Any);

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/v1/auth/refresh", post(auth::session::refresh))
        .route("/v1/auth/logout", post(auth::session::logout))
        .route("/v1/me", get(me::get_me))
        .route("/v1/me/password", put(me::change_password))
        .merge(limited)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state)),
        );

    match pool {
        Some(pool) => app.layer(Extension(pool)),
        None => app,
    }
}

/// Start the server
/// # Errors
/// Return error if failed to connect to the database or to start the server
pub async fn new(
    port: u16,
    dsn: String,
    auth_config: auth::AuthConfig,
    rate_limit_config: auth::RateLimitConfig,
    signer: auth::AccessTokenSigner,
) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let store = Arc::new(auth::PgStore::new(pool.clone()));
    let sweep_seconds = auth_config.refresh_sweep_seconds();
    let auth_state = Arc::new(AuthState::new(
        auth_config,
        signer,
        auth::SecretHasher::default(),
        store.clone(),
        store,
    ));

    let mut sweeps: Vec<JoinHandle<()>> = Vec::new();
    let limiter = if rate_limit_config.enabled() {
        let limiter = Arc::new(AdaptiveLimiter::new(rate_limit_config));
        sweeps.extend(limiter.spawn_idle_sweep());
        Some(limiter)
    } else {
        info!("Rate limiting disabled");
        None
    };

    sweeps.extend(spawn_refresh_sweep(auth_state.clone(), sweep_seconds));

    let app = app(auth_state, limiter, Some(pool));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {err}");
        }
        info!("Gracefully shutdown");
    })
    .await;

    stop_sweeps(sweeps).await;
    served?;

    Ok(())
}

/// Periodically delete expired refresh tokens. Zero seconds disables the sweep.
fn spawn_refresh_sweep(auth_state: Arc<AuthState>, seconds: u64) -> Option<JoinHandle<()>> {
    if seconds == 0 {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(seconds));
        loop {
            interval.tick().await;
            match auth_state.credentials().prune_expired().await {
                Ok(0) => {}
                Ok(pruned) => debug!(pruned, "expired refresh tokens pruned"),
                Err(err) => error!("Failed to prune expired refresh tokens: {err}"),
            }
        }
    }))
}

/// Abort background sweeps and wait for them to finish.
async fn stop_sweeps(sweeps: Vec<JoinHandle<()>>) {
    for sweep in &sweeps {
        sweep.abort();
    }
    for sweep in sweeps {
        if let Err(err) = sweep.await {
            if !err.is_cancelled() {
                error!("Background sweep failed: {err}");
            }
        }
    }
    debug!("background sweeps stopped");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::{
        AccessTokenSigner, AuthConfig, MemoryRefreshStore, MemoryUserStore, SecretHasher,
    };

    fn auth_state() -> Arc<AuthState> {
        Arc::new(AuthState::new(
            AuthConfig::new(),
            AccessTokenSigner::new(b"sweep-secret"),
            SecretHasher::insecure_fast(),
            Arc::new(MemoryRefreshStore::new()),
            Arc::new(MemoryUserStore::new()),
        ))
    }

    #[tokio::test]
    async fn refresh_sweep_disabled_with_zero_seconds() {
        assert!(spawn_refresh_sweep(auth_state(), 0).is_none());
    }

    #[tokio::test]
    async fn sweeps_are_stopped_on_shutdown() {
        let mut sweeps: Vec<JoinHandle<()>> = Vec::new();
        sweeps.extend(spawn_refresh_sweep(auth_state(), 3600));
        sweeps.push(tokio::spawn(std::future::pending::<()>()));
        assert_eq!(sweeps.len(), 2);

        let watched: Vec<_> = sweeps.iter().map(JoinHandle::abort_handle).collect();
        stop_sweeps(sweeps).await;
        assert!(watched.iter().all(tokio::task::AbortHandle::is_finished));
    }
}
