//! Auth module tests: full HTTP flows against the in-memory stores.

use super::{
    AccessTokenSigner, AdaptiveLimiter, AuthConfig, AuthState, MemoryRefreshStore,
    MemoryUserStore, NewRefreshCredential, RateLimitConfig, RefreshStore, SecretHasher,
    StoreError, StoredRefreshCredential,
};
use crate::api::app;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Method, Request, StatusCode, header::RETRY_AFTER},
};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

const PASSWORD: &str = "Backl1ne!";

struct Harness {
    app: Router,
    refresh_store: Arc<MemoryRefreshStore>,
}

fn harness(rate_limit: Option<RateLimitConfig>) -> Harness {
    let refresh_store = Arc::new(MemoryRefreshStore::new());
    let app = router(refresh_store.clone(), rate_limit);
    Harness { app, refresh_store }
}

fn router(refresh_store: Arc<dyn RefreshStore>, rate_limit: Option<RateLimitConfig>) -> Router {
    let auth_state = Arc::new(AuthState::new(
        AuthConfig::new(),
        AccessTokenSigner::new(b"integration-secret"),
        SecretHasher::insecure_fast(),
        refresh_store,
        Arc::new(MemoryUserStore::new()),
    ));
    let limiter = rate_limit.map(|config| Arc::new(AdaptiveLimiter::new(config)));
    app(auth_state, limiter, None)
}

/// Memory store whose bulk revocation always fails.
#[derive(Default)]
struct RevokeAllFails {
    inner: MemoryRefreshStore,
}

#[async_trait]
impl RefreshStore for RevokeAllFails {
    async fn insert(
        &self,
        credential: NewRefreshCredential,
        retention: usize,
    ) -> Result<(), StoreError> {
        self.inner.insert(credential, retention).await
    }

    async fn find_by_lookup_key(
        &self,
        lookup_key: &str,
    ) -> Result<Vec<StoredRefreshCredential>, StoreError> {
        self.inner.find_by_lookup_key(lookup_key).await
    }

    async fn find_by_owner(
        &self,
        owner_id: i64,
    ) -> Result<Vec<StoredRefreshCredential>, StoreError> {
        self.inner.find_by_owner(owner_id).await
    }

    async fn rotate(
        &self,
        old_secret_hash: &str,
        replacement: NewRefreshCredential,
        retention: usize,
    ) -> Result<bool, StoreError> {
        self.inner
            .rotate(old_secret_hash, replacement, retention)
            .await
    }

    async fn delete_by_hash(&self, secret_hash: &str) -> Result<bool, StoreError> {
        self.inner.delete_by_hash(secret_hash).await
    }

    async fn delete_all_by_owner(&self, _owner_id: i64) -> Result<u64, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.prune_expired(now).await
    }
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl Reply {
    fn str(&self, field: &str) -> Result<String> {
        self.body
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .with_context(|| format!("missing {field} in {}", self.body))
    }
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    client_ip: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> Result<Reply> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", client_ip);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?,
        None => builder.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    Ok(Reply {
        status,
        headers,
        body,
    })
}

async fn signup(app: &Router, username: &str) -> Result<Reply> {
    send(
        app,
        Method::POST,
        "/v1/auth/signup",
        "10.0.0.1",
        None,
        Some(json!({ "username": username, "password": PASSWORD })),
    )
    .await
}

async fn login(app: &Router, ip: &str, username: &str, password: &str) -> Result<Reply> {
    send(
        app,
        Method::POST,
        "/v1/auth/login",
        ip,
        None,
        Some(json!({ "username": username, "password": password })),
    )
    .await
}

async fn refresh(app: &Router, refresh_token: &str) -> Result<Reply> {
    send(
        app,
        Method::POST,
        "/v1/auth/refresh",
        "10.0.0.9",
        None,
        Some(json!({ "refresh_token": refresh_token })),
    )
    .await
}

#[tokio::test]
async fn signup_then_me() -> Result<()> {
    let harness = harness(Some(RateLimitConfig::new()));
    let created = signup(&harness.app, "drummer").await?;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.str("token_type")?, "Bearer");

    let me = send(
        &harness.app,
        Method::GET,
        "/v1/me",
        "10.0.0.1",
        Some(&created.str("token")?),
        None,
    )
    .await?;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.str("username")?, "drummer");
    Ok(())
}

#[tokio::test]
async fn me_requires_valid_access_token() -> Result<()> {
    let harness = harness(None);
    let missing = send(&harness.app, Method::GET, "/v1/me", "10.0.0.1", None, None).await?;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
    assert_eq!(missing.str("code")?, "UNAUTHENTICATED");

    let forged = send(
        &harness.app,
        Method::GET,
        "/v1/me",
        "10.0.0.1",
        Some("eyJhbGciOiJIUzI1NiJ9.e30.c2ln"),
        None,
    )
    .await?;
    assert_eq!(forged.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn signup_validation_and_duplicates() -> Result<()> {
    let harness = harness(None);
    let weak = send(
        &harness.app,
        Method::POST,
        "/v1/auth/signup",
        "10.0.0.1",
        None,
        Some(json!({ "username": "bassist", "password": "weak" })),
    )
    .await?;
    assert_eq!(weak.status, StatusCode::BAD_REQUEST);
    assert_eq!(weak.str("code")?, "INVALID_REQUEST");

    let bad_name = send(
        &harness.app,
        Method::POST,
        "/v1/auth/signup",
        "10.0.0.1",
        None,
        Some(json!({ "username": "b a", "password": PASSWORD })),
    )
    .await?;
    assert_eq!(bad_name.status, StatusCode::BAD_REQUEST);

    assert_eq!(signup(&harness.app, "bassist").await?.status, StatusCode::CREATED);
    let duplicate = signup(&harness.app, "bassist").await?;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);
    assert_eq!(duplicate.str("code")?, "USERNAME_TAKEN");
    Ok(())
}

#[tokio::test]
async fn login_errors_do_not_reveal_which_part_was_wrong() -> Result<()> {
    let harness = harness(None);
    signup(&harness.app, "singer").await?;

    let wrong_password = login(&harness.app, "10.0.0.2", "singer", "Wr0ng!pass").await?;
    let unknown_user = login(&harness.app, "10.0.0.2", "nobody", PASSWORD).await?;
    assert_eq!(wrong_password.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password.body, unknown_user.body);

    let ok = login(&harness.app, "10.0.0.2", "singer", PASSWORD).await?;
    assert_eq!(ok.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn five_failed_logins_lock_the_client() -> Result<()> {
    let harness = harness(Some(RateLimitConfig::new()));
    signup(&harness.app, "guitarist").await?;

    for _ in 0..5 {
        let reply = login(&harness.app, "10.0.0.2", "guitarist", "Wr0ng!pass").await?;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    }

    // Even the right password is refused while the block lasts.
    let locked = login(&harness.app, "10.0.0.2", "guitarist", PASSWORD).await?;
    assert_eq!(locked.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(locked.str("code")?, "LOCKED");
    let retry_after = locked
        .headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .context("missing Retry-After")?;
    assert!((59..=60).contains(&retry_after));
    assert_eq!(locked.body["retry_after"], json!(retry_after));

    // Other clients are unaffected.
    let other = login(&harness.app, "10.0.0.3", "guitarist", PASSWORD).await?;
    assert_eq!(other.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn success_resets_failure_streak() -> Result<()> {
    let harness = harness(Some(RateLimitConfig::new().with_burst(50)));
    signup(&harness.app, "keys").await?;

    for _ in 0..4 {
        login(&harness.app, "10.0.0.4", "keys", "Wr0ng!pass").await?;
    }
    assert_eq!(
        login(&harness.app, "10.0.0.4", "keys", PASSWORD).await?.status,
        StatusCode::OK
    );
    for _ in 0..4 {
        let reply = login(&harness.app, "10.0.0.4", "keys", "Wr0ng!pass").await?;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    }
    assert_eq!(
        login(&harness.app, "10.0.0.4", "keys", PASSWORD).await?.status,
        StatusCode::OK
    );
    Ok(())
}

#[tokio::test]
async fn signups_do_not_clear_failure_streak() -> Result<()> {
    let harness = harness(Some(RateLimitConfig::new().with_burst(50)));
    signup(&harness.app, "bandleader").await?;

    for round in 0..4 {
        let reply = login(&harness.app, "10.0.0.10", "bandleader", "Wr0ng!pass").await?;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        let created = send(
            &harness.app,
            Method::POST,
            "/v1/auth/signup",
            "10.0.0.10",
            None,
            Some(json!({ "username": format!("throwaway_{round}"), "password": PASSWORD })),
        )
        .await?;
        assert_eq!(created.status, StatusCode::CREATED);
    }

    // Fifth failure starts the block.
    let fifth = login(&harness.app, "10.0.0.10", "bandleader", "Wr0ng!pass").await?;
    assert_eq!(fifth.status, StatusCode::UNAUTHORIZED);
    let locked = login(&harness.app, "10.0.0.10", "bandleader", PASSWORD).await?;
    assert_eq!(locked.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(locked.str("code")?, "LOCKED");
    Ok(())
}

#[tokio::test]
async fn bursts_beyond_the_bucket_are_rate_limited() -> Result<()> {
    let harness = harness(Some(RateLimitConfig::new()));
    for _ in 0..5 {
        let reply = send(
            &harness.app,
            Method::POST,
            "/v1/auth/signup",
            "10.0.0.5",
            None,
            Some(json!({ "username": "x", "password": "y" })),
        )
        .await?;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    }

    let limited = send(
        &harness.app,
        Method::POST,
        "/v1/auth/signup",
        "10.0.0.5",
        None,
        Some(json!({ "username": "latecomer", "password": PASSWORD })),
    )
    .await?;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.str("code")?, "RATE_LIMITED");
    assert_eq!(
        limited.headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()),
        Some("60")
    );
    Ok(())
}

#[tokio::test]
async fn disabled_limiter_never_blocks() -> Result<()> {
    let harness = harness(None);
    signup(&harness.app, "roadie").await?;
    for _ in 0..8 {
        let reply = login(&harness.app, "10.0.0.6", "roadie", "Wr0ng!pass").await?;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

#[tokio::test]
async fn refresh_rotates_and_rejects_reuse() -> Result<()> {
    let harness = harness(None);
    let created = signup(&harness.app, "violinist").await?;
    let original = created.str("refresh_token")?;

    let rotated = refresh(&harness.app, &original).await?;
    assert_eq!(rotated.status, StatusCode::OK);
    let next = rotated.str("refresh_token")?;
    assert_ne!(next, original);
    assert_eq!(rotated.body["user_id"], created.body["user_id"]);

    let reused = refresh(&harness.app, &original).await?;
    assert_eq!(reused.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reused.str("code")?, "INVALID_REFRESH_TOKEN");

    assert_eq!(refresh(&harness.app, &next).await?.status, StatusCode::OK);

    let empty = refresh(&harness.app, "  ").await?;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn logout_revokes_only_the_presented_token() -> Result<()> {
    let harness = harness(None);
    let first = signup(&harness.app, "cellist").await?;
    let second = login(&harness.app, "10.0.0.7", "cellist", PASSWORD).await?;
    let user_id = first.body["user_id"].as_i64().context("user_id")?;
    assert_eq!(harness.refresh_store.count_for_owner(user_id), 2);

    let logout = send(
        &harness.app,
        Method::POST,
        "/v1/auth/logout",
        "10.0.0.7",
        Some(&first.str("token")?),
        Some(json!({ "refresh_token": first.str("refresh_token")? })),
    )
    .await?;
    assert_eq!(logout.status, StatusCode::NO_CONTENT);
    assert_eq!(harness.refresh_store.count_for_owner(user_id), 1);

    assert_eq!(
        refresh(&harness.app, &first.str("refresh_token")?).await?.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        refresh(&harness.app, &second.str("refresh_token")?).await?.status,
        StatusCode::OK
    );

    // Logging out twice is still fine.
    let again = send(
        &harness.app,
        Method::POST,
        "/v1/auth/logout",
        "10.0.0.7",
        Some(&first.str("token")?),
        Some(json!({ "refresh_token": first.str("refresh_token")? })),
    )
    .await?;
    assert_eq!(again.status, StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn password_change_revokes_all_sessions() -> Result<()> {
    let harness = harness(None);
    let first = signup(&harness.app, "trumpeter").await?;
    let second = login(&harness.app, "10.0.0.8", "trumpeter", PASSWORD).await?;
    let token = first.str("token")?;

    let wrong = send(
        &harness.app,
        Method::PUT,
        "/v1/me/password",
        "10.0.0.8",
        Some(&token),
        Some(json!({ "current_password": "N0pe!nope", "new_password": "N3w!secret" })),
    )
    .await?;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.str("code")?, "WRONG_CURRENT_PASSWORD");

    let changed = send(
        &harness.app,
        Method::PUT,
        "/v1/me/password",
        "10.0.0.8",
        Some(&token),
        Some(json!({ "current_password": PASSWORD, "new_password": "N3w!secret" })),
    )
    .await?;
    assert_eq!(changed.status, StatusCode::NO_CONTENT);

    for reply in [&first, &second] {
        let stale = refresh(&harness.app, &reply.str("refresh_token")?).await?;
        assert_eq!(stale.status, StatusCode::UNAUTHORIZED);
    }
    assert_eq!(
        login(&harness.app, "10.0.0.8", "trumpeter", PASSWORD).await?.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        login(&harness.app, "10.0.0.8", "trumpeter", "N3w!secret").await?.status,
        StatusCode::OK
    );
    Ok(())
}

#[tokio::test]
async fn failed_revocation_leaves_password_unchanged() -> Result<()> {
    let app = router(Arc::new(RevokeAllFails::default()), None);
    let created = signup(&app, "saxophonist").await?;
    let token = created.str("token")?;
    let change = json!({ "current_password": PASSWORD, "new_password": "N3w!secret" });

    for _ in 0..2 {
        let failed = send(
            &app,
            Method::PUT,
            "/v1/me/password",
            "10.0.0.11",
            Some(&token),
            Some(change.clone()),
        )
        .await?;
        assert_eq!(failed.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(failed.str("code")?, "UNAVAILABLE");
    }

    assert_eq!(
        login(&app, "10.0.0.11", "saxophonist", PASSWORD).await?.status,
        StatusCode::OK
    );
    assert_eq!(
        login(&app, "10.0.0.11", "saxophonist", "N3w!secret").await?.status,
        StatusCode::UNAUTHORIZED
    );
    Ok(())
}

#[tokio::test]
async fn request_id_is_generated_and_propagated() -> Result<()> {
    let harness = harness(None);
    let reply = send(&harness.app, Method::GET, "/health", "10.0.0.1", None, None).await?;
    assert_eq!(reply.status, StatusCode::OK);
    let request_id = reply
        .headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .context("missing x-request-id")?;
    assert_eq!(request_id.len(), 26);
    Ok(())
}
