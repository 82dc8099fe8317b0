use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_POLL_INTERVAL_MS: &str = "poll-interval-ms";
pub const ARG_INTERACTION_TIMEOUT_SECS: &str = "interaction-timeout-secs";

#[derive(Debug, Clone)]
pub struct Options {
    pub poll_interval: Duration,
    pub interaction_timeout: Option<Duration>,
}

impl Options {
    /// Parse session arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the poll interval is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let poll_interval = matches
            .get_one::<u64>(ARG_POLL_INTERVAL_MS)
            .copied()
            .map(Duration::from_millis)
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_POLL_INTERVAL_MS}"))?;

        Ok(Self {
            poll_interval,
            interaction_timeout: matches
                .get_one::<u64>(ARG_INTERACTION_TIMEOUT_SECS)
                .copied()
                .map(Duration::from_secs),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_POLL_INTERVAL_MS)
                .long(ARG_POLL_INTERVAL_MS)
                .help("Upper bound in milliseconds between checks for cancellation")
                .env("EID_LOGIN_POLL_INTERVAL_MS")
                .default_value("1000")
                .value_parser(clap::value_parser!(u64).range(1..))
                .global(true),
        )
        .arg(
            Arg::new(ARG_INTERACTION_TIMEOUT_SECS)
                .long(ARG_INTERACTION_TIMEOUT_SECS)
                .help("Give up when PIN entry or card insertion takes longer (default: wait)")
                .env("EID_LOGIN_INTERACTION_TIMEOUT_SECS")
                .value_parser(clap::value_parser!(u64).range(1..))
                .global(true),
        )
}
