//! Terminal prompts for PIN/CAN entry and card insertion.

use crate::eid::interaction::{Interaction, SecretRequest};
use async_trait::async_trait;
use inquire::{InquireError, Password, PasswordDisplayMode};
use secrecy::SecretString;
use tracing::{debug, warn};

/// Prompts on the controlling terminal. Each prompt runs on a blocking thread so the
/// session keeps reacting to cancellation while the user types.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalInteraction;

impl TerminalInteraction {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn secret_prompt(request: &SecretRequest) -> String {
    match &request.reader_name {
        Some(reader) => format!("Enter the {} of your eID card ({reader}):", request.kind.label()),
        None => format!("Enter the {} of your eID card:", request.kind.label()),
    }
}

fn keypad_notice(request: &SecretRequest) -> String {
    match &request.reader_name {
        Some(reader) => format!("Enter the {} on the keypad of {reader}", request.kind.label()),
        None => format!("Enter the {} on the keypad of your card reader", request.kind.label()),
    }
}

#[async_trait]
impl Interaction for TerminalInteraction {
    async fn enter_secret(&self, request: &SecretRequest) -> Option<SecretString> {
        if request.keypad {
            eprintln!("{}", keypad_notice(request));
            return None;
        }

        let message = secret_prompt(request);
        let answer = tokio::task::spawn_blocking(move || {
            Password::new(&message)
                .without_confirmation()
                .with_display_mode(PasswordDisplayMode::Masked)
                .prompt()
                .map(SecretString::from)
        })
        .await;

        match answer {
            Ok(Ok(secret)) => Some(secret),
            Ok(Err(InquireError::OperationCanceled | InquireError::OperationInterrupted)) => {
                debug!("{} entry aborted", request.kind.label());
                None
            }
            Ok(Err(e)) => {
                warn!("cannot prompt for {}: {}", request.kind.label(), e);
                None
            }
            Err(e) => {
                warn!("prompt task failed: {}", e);
                None
            }
        }
    }

    async fn insert_card(&self) {
        eprintln!("Insert your eID card into the card reader");
    }
}
