use crate::{
    cli::actions::cancel_on_ctrl_c,
    eid::{status::UiAction, AuthOutcome, Config, Orchestrator},
};
use anyhow::{Context, Result};
use tracing::error;

/// Print which eID client answers.
/// # Errors
/// Returns an error if the configuration is invalid.
pub async fn status(config: Config) -> Result<u8> {
    let orchestrator = Orchestrator::new(config).context("invalid configuration")?;
    let cancel = cancel_on_ctrl_c();

    match orchestrator.client_status(&cancel).await {
        Ok(status) => {
            println!("Connected to {status}");
            Ok(AuthOutcome::Success.exit_code())
        }
        Err(e) => {
            error!("status query failed: {}", e);
            eprintln!("{}", e.user_message());
            Ok(e.outcome().exit_code())
        }
    }
}

/// Ask the eID client to open one of its screens.
/// # Errors
/// Returns an error if the configuration is invalid.
pub async fn show_ui(config: Config, action: UiAction) -> Result<u8> {
    let orchestrator = Orchestrator::new(config).context("invalid configuration")?;
    let cancel = cancel_on_ctrl_c();

    match orchestrator.show_ui(action, &cancel).await {
        Ok(()) => Ok(AuthOutcome::Success.exit_code()),
        Err(e) => {
            error!("{:?} failed: {}", action, e);
            eprintln!("{}", e.user_message());
            Ok(e.outcome().exit_code())
        }
    }
}
