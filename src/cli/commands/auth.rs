use clap::{Arg, ArgMatches, Command};
use secrecy::{ExposeSecret, SecretString};

use crate::api::handlers::auth::{MAX_ACCESS_TOKEN_TTL_SECONDS, MAX_REFRESH_TOKEN_TTL_SECONDS};

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_ACCESS_TOKEN_TTL_SECONDS: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TOKEN_TTL_SECONDS: &str = "refresh-token-ttl-seconds";
pub const ARG_REFRESH_TOKEN_RETENTION: &str = "refresh-token-retention";
pub const ARG_REFRESH_SWEEP_SECONDS: &str = "refresh-sweep-seconds";

// SHA-256 digest size.
const MIN_JWT_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub refresh_token_retention: usize,
    pub refresh_sweep_seconds: u64,
}

impl Options {
    /// Parse session arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the signing secret is missing or too short.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let jwt_secret = match matches.get_one::<String>(ARG_JWT_SECRET) {
            Some(value) if !value.trim().is_empty() => SecretString::from(value.clone()),
            _ => anyhow::bail!("missing required argument: --{ARG_JWT_SECRET}"),
        };
        if jwt_secret.expose_secret().len() < MIN_JWT_SECRET_BYTES {
            anyhow::bail!("--{ARG_JWT_SECRET} must be at least {MIN_JWT_SECRET_BYTES} bytes");
        }

        Ok(Self {
            jwt_secret,
            access_token_ttl_seconds: matches
                .get_one::<i64>(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .copied()
                .unwrap_or(900),
            refresh_token_ttl_seconds: matches
                .get_one::<i64>(ARG_REFRESH_TOKEN_TTL_SECONDS)
                .copied()
                .unwrap_or(2_592_000),
            refresh_token_retention: matches
                .get_one::<usize>(ARG_REFRESH_TOKEN_RETENTION)
                .copied()
                .unwrap_or(3),
            refresh_sweep_seconds: matches
                .get_one::<u64>(ARG_REFRESH_SWEEP_SECONDS)
                .copied()
                .unwrap_or(3600),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("Secret used to sign access tokens (HS256, at least 32 bytes)")
                .env("BACKSTAGE_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .long(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .help("Access token lifetime in seconds")
                .env("BACKSTAGE_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_ACCESS_TOKEN_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL_SECONDS)
                .long(ARG_REFRESH_TOKEN_TTL_SECONDS)
                .help("Refresh token lifetime in seconds")
                .env("BACKSTAGE_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_REFRESH_TOKEN_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_RETENTION)
                .long(ARG_REFRESH_TOKEN_RETENTION)
                .help("Refresh tokens kept per user; the oldest are dropped first")
                .env("BACKSTAGE_REFRESH_TOKEN_RETENTION")
                .default_value("3")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_REFRESH_SWEEP_SECONDS)
                .long(ARG_REFRESH_SWEEP_SECONDS)
                .help("Interval for deleting expired refresh tokens (0 disables)")
                .env("BACKSTAGE_REFRESH_SWEEP_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
}
