use crate::eid::{
    status::ClientVersion, Flow, DEFAULT_CLIENT_URL, DEFAULT_KERNEL_URL, DEFAULT_TC_TOKEN_URL,
};
use clap::{builder::ValueParser, Arg, ArgMatches, Command};

pub const ARG_CLIENT_URL: &str = "client-url";
pub const ARG_KERNEL_URL: &str = "kernel-url";
pub const ARG_TC_TOKEN_URL: &str = "tc-token-url";
pub const ARG_FLOW: &str = "flow";
pub const ARG_WEBSOCKET_MIN_VERSION: &str = "websocket-min-version";

#[derive(Debug, Clone)]
pub struct Options {
    pub client_url: String,
    pub kernel_url: String,
    pub tc_token_url: String,
    pub flow: Flow,
    pub websocket_min_version: ClientVersion,
}

impl Options {
    /// Parse eID client arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a value is missing or empty.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let read_required = |id: &str| -> anyhow::Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            client_url: read_required(ARG_CLIENT_URL)?,
            kernel_url: read_required(ARG_KERNEL_URL)?,
            tc_token_url: read_required(ARG_TC_TOKEN_URL)?,
            flow: matches.get_one::<Flow>(ARG_FLOW).copied().unwrap_or_default(),
            websocket_min_version: matches
                .get_one::<ClientVersion>(ARG_WEBSOCKET_MIN_VERSION)
                .copied()
                .ok_or_else(|| {
                    anyhow::anyhow!("missing required argument: --{ARG_WEBSOCKET_MIN_VERSION}")
                })?,
        })
    }
}

fn flow_parser() -> ValueParser {
    ValueParser::from(|flow: &str| flow.parse::<Flow>())
}

fn version_parser() -> ValueParser {
    ValueParser::from(|version: &str| version.parse::<ClientVersion>())
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CLIENT_URL)
                .long(ARG_CLIENT_URL)
                .help("Base URL of the local eID client")
                .env("EID_LOGIN_CLIENT_URL")
                .default_value(DEFAULT_CLIENT_URL)
                .global(true),
        )
        .arg(
            Arg::new(ARG_KERNEL_URL)
                .long(ARG_KERNEL_URL)
                .help("WebSocket endpoint of the local eID client")
                .env("EID_LOGIN_KERNEL_URL")
                .default_value(DEFAULT_KERNEL_URL)
                .global(true),
        )
        .arg(
            Arg::new(ARG_TC_TOKEN_URL)
                .long(ARG_TC_TOKEN_URL)
                .help("TC token URL of the identity service")
                .env("EID_LOGIN_TC_TOKEN_URL")
                .default_value(DEFAULT_TC_TOKEN_URL)
                .global(true),
        )
        .arg(
            Arg::new(ARG_FLOW)
                .long(ARG_FLOW)
                .help("auto, legacy or websocket")
                .long_help(
                    "auto asks the eID client for its version and uses the WebSocket flow from --websocket-min-version on, legacy uses the plain HTTP entry point of the client",
                )
                .env("EID_LOGIN_FLOW")
                .default_value("auto")
                .value_parser(flow_parser())
                .global(true),
        )
        .arg(
            Arg::new(ARG_WEBSOCKET_MIN_VERSION)
                .long(ARG_WEBSOCKET_MIN_VERSION)
                .help("Lowest eID client version that gets the WebSocket flow")
                .env("EID_LOGIN_WEBSOCKET_MIN_VERSION")
                .default_value("1.16.0")
                .value_parser(version_parser())
                .global(true),
        )
}
