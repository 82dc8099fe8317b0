use crate::cli::actions::{client, enroll, verify, Action};
use anyhow::Result;

/// Execute the provided action.
// To add a new action, add a new `Action::*` variant and a corresponding `*::execute` call here.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<u8> {
    match action {
        Action::Enroll(config) => enroll::execute(config).await,
        Action::Verify(config) => verify::execute(config).await,
        Action::Status(config) => client::status(config).await,
        Action::ShowUi(config, ui) => client::show_ui(config, ui).await,
    }
}
