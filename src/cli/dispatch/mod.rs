//! Map validated CLI matches to an action.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_DSN, ARG_PORT, auth, rate_limit};
use anyhow::{Context, Result};
use url::Url;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or malformed.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    let parsed = Url::parse(&dsn).context("invalid --dsn")?;
    if !matches!(parsed.scheme(), "postgres" | "postgresql") {
        anyhow::bail!("--dsn must use the postgres:// scheme");
    }

    let auth_opts = auth::Options::parse(matches)?;
    let rate_limit_opts = rate_limit::Options::parse(matches);

    Ok(Action::Server(Args {
        port,
        dsn,
        jwt_secret: auth_opts.jwt_secret,
        access_token_ttl_seconds: auth_opts.access_token_ttl_seconds,
        refresh_token_ttl_seconds: auth_opts.refresh_token_ttl_seconds,
        refresh_token_retention: auth_opts.refresh_token_retention,
        refresh_sweep_seconds: auth_opts.refresh_sweep_seconds,
        rate_limit_enabled: rate_limit_opts.enabled,
        rate_limit_burst: rate_limit_opts.burst,
        rate_limit_replenish_seconds: rate_limit_opts.replenish_seconds,
        rate_limit_retry_after_seconds: rate_limit_opts.retry_after_seconds,
        rate_limit_idle_ttl_seconds: rate_limit_opts.idle_ttl_seconds,
    }))
}
