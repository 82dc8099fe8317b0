use crate::eid::{
    pinning::PinningError,
    session::SessionError,
    status::StatusError,
    trust::TrustError,
    url::UrlError,
    verify::VerifyError,
    AuthOutcome,
};
use std::fmt;
use thiserror::Error;

/// Coarse failure class, kept for diagnostics after the outcome is collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransportUnavailable,
    ProtocolError,
    MalformedUrl,
    Mismatch,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TransportUnavailable => "transport unavailable",
            Self::ProtocolError => "protocol error",
            Self::MalformedUrl => "malformed URL",
            Self::Mismatch => "mismatch",
            Self::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Url(#[from] UrlError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Trust(#[from] TrustError),
    #[error(transparent)]
    Pinning(#[from] PinningError),
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error("invalid {setting}: {reason}")]
    Config {
        setting: &'static str,
        reason: String,
    },
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        use ErrorKind::{Cancelled, MalformedUrl, Mismatch, ProtocolError, TransportUnavailable};

        match self {
            Self::Url(_) | Self::Config { .. } => MalformedUrl,
            Self::Session(e) => match e {
                SessionError::Connect { .. }
                | SessionError::Closed
                | SessionError::Transport(_) => TransportUnavailable,
                SessionError::Peer(_)
                | SessionError::UnexpectedMessage(_)
                | SessionError::MalformedMessage(_)
                | SessionError::Channel(_) => ProtocolError,
                SessionError::InteractionTimedOut(_) | SessionError::Cancelled => Cancelled,
            },
            Self::Verify(e) => match e {
                VerifyError::Mismatch(_) => Mismatch,
                VerifyError::TooManyRedirects(_) | VerifyError::BadRedirect { .. } => {
                    ProtocolError
                }
                VerifyError::Cancelled => Cancelled,
                VerifyError::Client(_)
                | VerifyError::Fetch { .. }
                | VerifyError::Pinning(_)
                | VerifyError::Io(_) => TransportUnavailable,
            },
            Self::Trust(_) | Self::Pinning(_) => TransportUnavailable,
            Self::Status(e) => match e {
                StatusError::Url(_) => MalformedUrl,
                StatusError::Cancelled => Cancelled,
                StatusError::Unreachable { .. }
                | StatusError::Rejected { .. }
                | StatusError::Client(_) => TransportUnavailable,
            },
        }
    }

    #[must_use]
    pub const fn outcome(&self) -> AuthOutcome {
        match self.kind() {
            ErrorKind::TransportUnavailable | ErrorKind::Cancelled => AuthOutcome::Unavailable,
            ErrorKind::ProtocolError | ErrorKind::MalformedUrl | ErrorKind::Mismatch => {
                AuthOutcome::Denied
            }
        }
    }

    /// Text safe to show to the person authenticating. Never says where a
    /// verification failed.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::Trust(TrustError::NotEnrolled(_)) => {
                "No eID is enrolled for this account, run `eid-login enroll` first"
            }
            _ => match self.kind() {
                ErrorKind::TransportUnavailable => "The local eID client could not be reached",
                ErrorKind::Cancelled => "Authentication was cancelled",
                ErrorKind::ProtocolError | ErrorKind::MalformedUrl | ErrorKind::Mismatch => {
                    "Authentication failed"
                }
            },
        }
    }
}
