use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_RATE_LIMIT_ENABLED: &str = "rate-limit-enabled";
pub const ARG_RATE_LIMIT_BURST: &str = "rate-limit-burst";
pub const ARG_RATE_LIMIT_REPLENISH_SECONDS: &str = "rate-limit-replenish-seconds";
pub const ARG_RATE_LIMIT_RETRY_AFTER_SECONDS: &str = "rate-limit-retry-after-seconds";
pub const ARG_RATE_LIMIT_IDLE_TTL_SECONDS: &str = "rate-limit-idle-ttl-seconds";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub enabled: bool,
    pub burst: u32,
    pub replenish_seconds: u64,
    pub retry_after_seconds: u64,
    pub idle_ttl_seconds: u64,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            enabled: matches
                .get_one::<bool>(ARG_RATE_LIMIT_ENABLED)
                .copied()
                .unwrap_or(true),
            burst: matches
                .get_one::<u32>(ARG_RATE_LIMIT_BURST)
                .copied()
                .unwrap_or(5),
            replenish_seconds: matches
                .get_one::<u64>(ARG_RATE_LIMIT_REPLENISH_SECONDS)
                .copied()
                .unwrap_or(12),
            retry_after_seconds: matches
                .get_one::<u64>(ARG_RATE_LIMIT_RETRY_AFTER_SECONDS)
                .copied()
                .unwrap_or(60),
            idle_ttl_seconds: matches
                .get_one::<u64>(ARG_RATE_LIMIT_IDLE_TTL_SECONDS)
                .copied()
                .unwrap_or(0),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RATE_LIMIT_ENABLED)
                .long(ARG_RATE_LIMIT_ENABLED)
                .help("Limit login and signup per client")
                .env("BACKSTAGE_RATE_LIMIT_ENABLED")
                .default_value("true")
                .num_args(0..=1)
                .default_missing_value("true")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_BURST)
                .long(ARG_RATE_LIMIT_BURST)
                .help("Requests a client may send at once")
                .env("BACKSTAGE_RATE_LIMIT_BURST")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_REPLENISH_SECONDS)
                .long(ARG_RATE_LIMIT_REPLENISH_SECONDS)
                .help("Seconds to regain one request")
                .env("BACKSTAGE_RATE_LIMIT_REPLENISH_SECONDS")
                .default_value("12")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_RETRY_AFTER_SECONDS)
                .long(ARG_RATE_LIMIT_RETRY_AFTER_SECONDS)
                .help("Retry-After sent when the bucket is empty")
                .env("BACKSTAGE_RATE_LIMIT_RETRY_AFTER_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_IDLE_TTL_SECONDS)
                .long(ARG_RATE_LIMIT_IDLE_TTL_SECONDS)
                .help("Forget clients idle this long (0 keeps them)")
                .env("BACKSTAGE_RATE_LIMIT_IDLE_TTL_SECONDS")
                .default_value("0")
                .value_parser(clap::value_parser!(u64)),
        )
}
