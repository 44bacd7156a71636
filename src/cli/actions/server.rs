use crate::api::{
    self,
    handlers::auth::{AccessTokenSigner, AuthConfig, RateLimitConfig},
};
use crate::cli::telemetry;
use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub jwt_secret: SecretString,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub refresh_token_retention: usize,
    pub refresh_sweep_seconds: u64,
    pub rate_limit_enabled: bool,
    pub rate_limit_burst: u32,
    pub rate_limit_replenish_seconds: u64,
    pub rate_limit_retry_after_seconds: u64,
    pub rate_limit_idle_ttl_seconds: u64,
}

impl Args {
    fn auth_config(&self) -> AuthConfig {
        AuthConfig::new()
            .with_access_token_ttl_seconds(self.access_token_ttl_seconds)
            .with_refresh_token_ttl_seconds(self.refresh_token_ttl_seconds)
            .with_refresh_token_retention(self.refresh_token_retention)
            .with_refresh_sweep_seconds(self.refresh_sweep_seconds)
    }

    fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig::new()
            .with_enabled(self.rate_limit_enabled)
            .with_burst(self.rate_limit_burst)
            .with_replenish(Duration::from_secs(self.rate_limit_replenish_seconds))
            .with_retry_after(Duration::from_secs(self.rate_limit_retry_after_seconds))
            .with_idle_ttl(Some(Duration::from_secs(self.rate_limit_idle_ttl_seconds)))
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = args.auth_config();
    let rate_limit_config = args.rate_limit_config();
    let signer = AccessTokenSigner::new(args.jwt_secret.expose_secret().as_bytes());

    debug!(port = args.port, ?auth_config, "starting server");

    let result = api::new(args.port, args.dsn, auth_config, rate_limit_config, signer).await;
    telemetry::shutdown_tracer();
    result
}
