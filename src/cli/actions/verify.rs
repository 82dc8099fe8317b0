use crate::{
    cli::{actions::cancel_on_ctrl_c, prompt::TerminalInteraction},
    eid::{AuthOutcome, Config, Orchestrator},
};
use anyhow::{Context, Result};
use tracing::{info, warn};

/// Compare a fresh identity response with the enrolled reference.
/// # Errors
/// Returns an error if the configuration is invalid.
pub async fn execute(config: Config) -> Result<u8> {
    let orchestrator = Orchestrator::new(config).context("invalid configuration")?;
    let cancel = cancel_on_ctrl_c();

    let outcome = match orchestrator.verify(&TerminalInteraction::new(), &cancel).await {
        Ok(report) => {
            info!(
                "accepted response from {} after {} redirect(s)",
                report.final_url, report.redirects
            );
            AuthOutcome::Success
        }
        Err(e) => {
            warn!("authentication failed ({}): {}", e.kind(), e);
            eprintln!("{}", e.user_message());
            e.outcome()
        }
    };

    println!("{outcome}");
    Ok(outcome.exit_code())
}
