//! Callbacks the session engine uses to involve the user.

use async_trait::async_trait;
use secrecy::SecretString;

/// Which secret the eID client asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    Pin,
    Can,
}

impl SecretKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pin => "PIN",
            Self::Can => "CAN",
        }
    }
}

/// A request for PIN or CAN entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRequest {
    pub kind: SecretKind,
    pub reader_name: Option<String>,
    /// The reader has its own keypad; the secret is typed there and never sent.
    pub keypad: bool,
}

/// User-facing side of a session.
///
/// Implementations may block on interactive prompts; the engine makes no progress
/// while they do. Returning `None` from [`enter_secret`](Self::enter_secret) means
/// no secret is transmitted, which is the expected answer for keypad readers.
#[async_trait]
pub trait Interaction: Send + Sync {
    async fn enter_secret(&self, request: &SecretRequest) -> Option<SecretString>;

    async fn insert_card(&self);
}
