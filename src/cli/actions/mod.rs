pub mod client;
pub mod enroll;
pub mod verify;

// Internal "interpreter" for `Action`.
mod run;

use crate::eid::{status::UiAction, Config};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug)]
pub enum Action {
    Enroll(Config),
    Verify(Config),
    Status(Config),
    ShowUi(Config, UiAction),
}

impl Action {
    /// Execute the action and return the process exit code.
    /// # Errors
    /// Returns an error if the action cannot be set up.
    pub async fn execute(self) -> anyhow::Result<u8> {
        run::execute(self).await
    }
}

/// Token cancelled by the first Ctrl-C.
pub(crate) fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            cancel.cancel();
        }
    });
    token
}
