use crate::eid::{trust::home_trust_dir, DEFAULT_MAX_REDIRECTS, DEFAULT_TRUSTED_ISSUER};
use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

pub const ARG_TRUST_DIR: &str = "trust-dir";
pub const ARG_TRUSTED_ISSUER: &str = "trusted-issuer";
pub const ARG_MAX_REDIRECTS: &str = "max-redirects";

#[derive(Debug, Clone)]
pub struct Options {
    pub trust_dir: PathBuf,
    pub trusted_issuer: String,
    pub max_redirects: usize,
}

impl Options {
    /// Parse trust store arguments from matches.
    ///
    /// # Errors
    /// Returns an error if no trust directory is given and `HOME` is unset.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let trust_dir = match matches.get_one::<PathBuf>(ARG_TRUST_DIR) {
            Some(dir) => dir.clone(),
            None => home_trust_dir()
                .with_context(|| format!("HOME is not set, pass --{ARG_TRUST_DIR}"))?,
        };

        let trusted_issuer = matches
            .get_one::<String>(ARG_TRUSTED_ISSUER)
            .map(|host| host.trim().to_string())
            .filter(|host| !host.is_empty())
            .with_context(|| format!("missing required argument: --{ARG_TRUSTED_ISSUER}"))?;

        Ok(Self {
            trust_dir,
            trusted_issuer,
            max_redirects: matches
                .get_one::<usize>(ARG_MAX_REDIRECTS)
                .copied()
                .unwrap_or(DEFAULT_MAX_REDIRECTS),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TRUST_DIR)
                .long(ARG_TRUST_DIR)
                .help("Directory holding authorized_eid and authorized_pubkey (default: ~/.eid)")
                .env("EID_LOGIN_TRUST_DIR")
                .value_parser(clap::value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new(ARG_TRUSTED_ISSUER)
                .long(ARG_TRUSTED_ISSUER)
                .help("Host that must serve the identity response; pinned if authorized_pubkey exists")
                .env("EID_LOGIN_TRUSTED_ISSUER")
                .default_value(DEFAULT_TRUSTED_ISSUER)
                .global(true),
        )
        .arg(
            Arg::new(ARG_MAX_REDIRECTS)
                .long(ARG_MAX_REDIRECTS)
                .help("Maximum number of redirects to follow")
                .env("EID_LOGIN_MAX_REDIRECTS")
                .default_value("10")
                .value_parser(clap::value_parser!(usize))
                .global(true),
        )
}
