//! Map validated CLI arguments to an action carrying the full configuration.

use crate::{
    cli::{
        actions::Action,
        commands::{
            client, session, trust, CMD_ENROLL, CMD_PIN_MANAGEMENT, CMD_SETTINGS, CMD_STATUS,
            CMD_VERIFY,
        },
    },
    eid::{status::UiAction, Config},
};
use anyhow::{bail, Result};

/// Build the library configuration from the global arguments.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn config(matches: &clap::ArgMatches) -> Result<Config> {
    let client_opts = client::Options::parse(matches)?;
    let trust_opts = trust::Options::parse(matches)?;
    let session_opts = session::Options::parse(matches)?;

    Ok(Config {
        client_url: client_opts.client_url,
        kernel_url: client_opts.kernel_url,
        tc_token_url: client_opts.tc_token_url,
        trust_dir: trust_opts.trust_dir,
        trusted_issuer: trust_opts.trusted_issuer,
        flow: client_opts.flow,
        websocket_min_version: client_opts.websocket_min_version,
        poll_interval: session_opts.poll_interval,
        interaction_timeout: session_opts.interaction_timeout,
        max_redirects: trust_opts.max_redirects,
        allow_plain_http: false,
    })
}

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or the subcommand is unknown.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let config = config(matches)?;

    match matches.subcommand_name() {
        Some(CMD_ENROLL) => Ok(Action::Enroll(config)),
        Some(CMD_VERIFY) => Ok(Action::Verify(config)),
        Some(CMD_STATUS) => Ok(Action::Status(config)),
        Some(CMD_SETTINGS) => Ok(Action::ShowUi(config, UiAction::Settings)),
        Some(CMD_PIN_MANAGEMENT) => Ok(Action::ShowUi(config, UiAction::PinManagement)),
        Some(other) => bail!("unknown command: {other}"),
        None => bail!("missing command"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::eid::Flow;
    use std::{path::PathBuf, time::Duration};

    #[test]
    fn builds_config_from_args() {
        temp_env::with_vars(
            [
                ("EID_LOGIN_TRUST_DIR", None::<&str>),
                ("EID_LOGIN_FLOW", None),
                ("EID_LOGIN_INTERACTION_TIMEOUT_SECS", None),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec![
                    "eid-login",
                    "verify",
                    "--trust-dir",
                    "/srv/eid/alice",
                    "--flow",
                    "websocket",
                    "--interaction-timeout-secs",
                    "60",
                ]);
                let Action::Verify(config) = handler(&matches).unwrap() else {
                    panic!("expected verify action");
                };
                assert_eq!(config.trust_dir, PathBuf::from("/srv/eid/alice"));
                assert_eq!(config.flow, Flow::WebSocket);
                assert_eq!(config.interaction_timeout, Some(Duration::from_secs(60)));
                assert_eq!(config.poll_interval, Duration::from_secs(1));
                assert_eq!(config.trusted_issuer, "www.autentapp.de");
                assert!(!config.allow_plain_http);
            },
        );
    }

    #[test]
    fn trust_dir_defaults_to_home() {
        temp_env::with_vars(
            [
                ("EID_LOGIN_TRUST_DIR", None::<&str>),
                ("HOME", Some("/home/alice")),
            ],
            || {
                let matches =
                    crate::cli::commands::new().get_matches_from(vec!["eid-login", "enroll"]);
                let Action::Enroll(config) = handler(&matches).unwrap() else {
                    panic!("expected enroll action");
                };
                assert_eq!(config.trust_dir, PathBuf::from("/home/alice/.eid"));
            },
        );
    }

    #[test]
    fn missing_home_requires_trust_dir() {
        temp_env::with_vars(
            [("EID_LOGIN_TRUST_DIR", None::<&str>), ("HOME", None)],
            || {
                let matches =
                    crate::cli::commands::new().get_matches_from(vec!["eid-login", "verify"]);
                let err = handler(&matches).unwrap_err();
                assert!(err.to_string().contains("--trust-dir"));
            },
        );
    }

    #[test]
    fn ui_subcommands_map_to_actions() {
        temp_env::with_vars([("EID_LOGIN_TRUST_DIR", Some("/tmp/eid"))], || {
            let matches = crate::cli::commands::new()
                .get_matches_from(vec!["eid-login", "pin-management"]);
            assert!(matches!(
                handler(&matches).unwrap(),
                Action::ShowUi(_, UiAction::PinManagement)
            ));

            let matches =
                crate::cli::commands::new().get_matches_from(vec!["eid-login", "settings"]);
            assert!(matches!(
                handler(&matches).unwrap(),
                Action::ShowUi(_, UiAction::Settings)
            ));
        });
    }
}
