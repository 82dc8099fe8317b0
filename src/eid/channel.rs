//! Outbound command slot for the eID client session.
//!
//! The channel holds at most one command. A new command overwrites one that has not
//! been written yet; there is no queue. The protocol never has more than one
//! engine-initiated command outstanding, so a second slot has no use today. If that
//! changes, this is the place to add queueing.
//!
//! Commands are serialized into a buffer of fixed capacity. A command that does not
//! fit leaves the channel empty: the peer never sees a truncated command.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::io;
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Capacity of the command slot in bytes.
pub const COMMAND_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("command {command} does not fit into {capacity} bytes")]
    CommandTooLarge {
        command: &'static str,
        capacity: usize,
    },
}

/// Commands sent to the eID client.
#[derive(Debug)]
pub enum Command {
    RunAuth { tc_token_url: String },
    Accept,
    SetPin(SecretString),
    SetCan(SecretString),
}

#[derive(Serialize)]
struct Outbound<'a> {
    cmd: &'a str,
    #[serde(rename = "tcTokenURL", skip_serializing_if = "Option::is_none")]
    tc_token_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a str>,
}

impl Command {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RunAuth { .. } => "RUN_AUTH",
            Self::Accept => "ACCEPT",
            Self::SetPin(_) => "SET_PIN",
            Self::SetCan(_) => "SET_CAN",
        }
    }

    #[must_use]
    pub const fn carries_secret(&self) -> bool {
        matches!(self, Self::SetPin(_) | Self::SetCan(_))
    }

    /// Serialize into a buffer that never grows past `limit` bytes, so the secret is
    /// never copied by a reallocation.
    fn encode(&self, limit: usize) -> Option<Zeroizing<String>> {
        let outbound = Outbound {
            cmd: self.name(),
            tc_token_url: match self {
                Self::RunAuth { tc_token_url } => Some(tc_token_url.as_str()),
                _ => None,
            },
            value: match self {
                Self::SetPin(secret) | Self::SetCan(secret) => Some(secret.expose_secret()),
                _ => None,
            },
        };

        let mut buf = Zeroizing::new(Vec::with_capacity(limit));
        serde_json::to_writer(BoundedWriter::new(&mut buf, limit), &outbound).ok()?;

        String::from_utf8(std::mem::take(&mut *buf))
            .ok()
            .map(Zeroizing::new)
    }
}

struct BoundedWriter<'a> {
    buf: &'a mut Vec<u8>,
    limit: usize,
}

impl<'a> BoundedWriter<'a> {
    fn new(buf: &'a mut Vec<u8>, limit: usize) -> Self {
        Self { buf, limit }
    }
}

impl io::Write for BoundedWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.buf.len() + data.len() > self.limit {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "command buffer full",
            ));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Pending {
    name: &'static str,
    payload: Zeroizing<String>,
}

/// Single-slot outbound buffer owned by one session.
pub struct CommandChannel {
    capacity: usize,
    pending: Option<Pending>,
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::with_capacity(COMMAND_CAPACITY)
    }
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("capacity", &self.capacity)
            .field("pending", &self.pending.as_ref().map(|p| p.name))
            .finish()
    }
}

impl CommandChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            pending: None,
        }
    }

    /// Store `command` as the pending payload, replacing any unsent one.
    ///
    /// # Errors
    /// Returns `ChannelError::CommandTooLarge` if the encoded command needs `capacity`
    /// bytes or more; the channel is empty afterwards.
    pub fn enqueue(&mut self, command: Command) -> Result<(), ChannelError> {
        let name = command.name();

        match command.encode(self.capacity) {
            Some(payload) if payload.len() < self.capacity => {
                if let Some(previous) = self.pending.replace(Pending { name, payload }) {
                    debug!("-> {} replaces unsent {}", name, previous.name);
                } else {
                    debug!("-> {}", name);
                }
                Ok(())
            }
            _ => {
                self.pending = None;
                warn!("dropping {}: exceeds {} bytes", name, self.capacity);
                Err(ChannelError::CommandTooLarge {
                    command: name,
                    capacity: self.capacity,
                })
            }
        }
    }

    /// The payload waiting to be written, if any. Stays available until
    /// [`complete_write`](Self::complete_write) is called.
    #[must_use]
    pub fn pending(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.payload.as_str())
    }

    #[must_use]
    pub fn pending_name(&self) -> Option<&'static str> {
        self.pending.as_ref().map(|p| p.name)
    }

    /// True when the transport has something to write.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.pending.is_some()
    }

    /// Clear the slot after the transport confirmed the write.
    pub fn complete_write(&mut self) {
        self.pending = None;
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn pending_json(channel: &CommandChannel) -> Value {
        serde_json::from_str(channel.pending().unwrap()).unwrap()
    }

    #[test]
    fn run_auth_carries_tc_token_url() {
        let mut channel = CommandChannel::new();
        channel
            .enqueue(Command::RunAuth {
                tc_token_url: "https://example.org/tc?mode=xml".to_string(),
            })
            .unwrap();

        assert_eq!(
            pending_json(&channel),
            json!({"cmd": "RUN_AUTH", "tcTokenURL": "https://example.org/tc?mode=xml"})
        );
    }

    #[test]
    fn set_pin_embeds_value_as_string() {
        let mut channel = CommandChannel::new();
        channel
            .enqueue(Command::SetPin(SecretString::from("123456")))
            .unwrap();

        assert_eq!(channel.pending_name(), Some("SET_PIN"));
        assert_eq!(
            pending_json(&channel),
            json!({"cmd": "SET_PIN", "value": "123456"})
        );
    }

    #[test]
    fn secret_is_escaped_not_injected() {
        let mut channel = CommandChannel::new();
        channel
            .enqueue(Command::SetCan(SecretString::from("1\",\"cmd\":\"ACCEPT")))
            .unwrap();

        let value = pending_json(&channel);
        assert_eq!(value["cmd"], "SET_CAN");
        assert_eq!(value["value"], "1\",\"cmd\":\"ACCEPT");
    }

    #[test]
    fn second_enqueue_overwrites_first() {
        let mut channel = CommandChannel::new();
        channel.enqueue(Command::Accept).unwrap();
        channel
            .enqueue(Command::SetPin(SecretString::from("1234")))
            .unwrap();

        assert_eq!(channel.pending_name(), Some("SET_PIN"));
        assert_eq!(pending_json(&channel)["value"], "1234");
    }

    #[test]
    fn oversized_command_leaves_channel_empty() {
        let mut channel = CommandChannel::new();
        channel.enqueue(Command::Accept).unwrap();

        let result = channel.enqueue(Command::SetPin(SecretString::from(
            "9".repeat(COMMAND_CAPACITY),
        )));

        assert_eq!(
            result,
            Err(ChannelError::CommandTooLarge {
                command: "SET_PIN",
                capacity: COMMAND_CAPACITY
            })
        );
        assert!(!channel.is_ready());
        assert_eq!(channel.pending(), None);
    }

    #[test]
    fn command_of_exactly_capacity_is_rejected() {
        // {"cmd":"SET_PIN","value":""} is 28 bytes
        let template = r#"{"cmd":"SET_PIN","value":""}"#.len();
        let mut channel = CommandChannel::with_capacity(64);

        assert!(channel
            .enqueue(Command::SetPin(SecretString::from("1".repeat(64 - template))))
            .is_err());
        assert!(channel
            .enqueue(Command::SetPin(SecretString::from(
                "1".repeat(64 - template - 1)
            )))
            .is_ok());
        assert_eq!(channel.pending().map(str::len), Some(63));
    }

    #[test]
    fn pending_survives_until_write_completes() {
        let mut channel = CommandChannel::new();
        channel.enqueue(Command::Accept).unwrap();

        assert_eq!(channel.pending(), Some(r#"{"cmd":"ACCEPT"}"#));
        assert_eq!(channel.pending(), Some(r#"{"cmd":"ACCEPT"}"#));
        assert!(channel.is_ready());

        channel.complete_write();
        assert!(!channel.is_ready());
        assert_eq!(channel.pending(), None);
    }

    #[test]
    fn debug_output_hides_payload() {
        let mut channel = CommandChannel::new();
        channel
            .enqueue(Command::SetPin(SecretString::from("424242")))
            .unwrap();
        let debug = format!("{channel:?}");
        assert!(debug.contains("SET_PIN"));
        assert!(!debug.contains("424242"));
    }
}
