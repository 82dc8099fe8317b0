//! WebSocket session with the eID client (`ws://127.0.0.1:24727/eID-Kernel`, subprotocol `eid`).
//!
//! ## Flow Overview
//! 1) Connect; once established, queue `RUN_AUTH` with the TC token URL.
//! 2) Read JSON frames until the client reports `AUTH` with the final URL:
//!    - `ACCESS_RIGHTS` is answered with `ACCEPT`, the user is not asked.
//!    - `INSERT_CARD` is forwarded to [`Interaction::insert_card`].
//!    - `ENTER_PIN`/`ENTER_CAN` ask [`Interaction::enter_secret`]; the answer is sent
//!      as `SET_PIN`/`SET_CAN` unless the reader has a keypad.
//! 3) Anything else, an `error` field, or a frame that is not a JSON object ends the
//!    session with an error.
//!
//! The loop wakes up at least once per poll interval and checks the cancellation
//! token at every suspension point, including while a prompt is open.

use crate::eid::{
    channel::{ChannelError, Command, CommandChannel},
    interaction::{Interaction, SecretKind, SecretRequest},
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use std::{
    future::{poll_fn, Future},
    time::Duration,
};
use thiserror::Error;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{
    self,
    client::IntoClientRequest,
    http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue},
    Message,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};
use url::Url;

/// WebSocket subprotocol spoken by the eID client.
pub const SUBPROTOCOL: &str = "eid";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot reach eID client at {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("eID client closed the session before reporting a result")]
    Closed,
    #[error("session transport failed: {0}")]
    Transport(String),
    #[error("eID client reported an error: {0}")]
    Peer(String),
    #[error("unexpected message from eID client: {0}")]
    UnexpectedMessage(String),
    #[error("malformed message from eID client: {0}")]
    MalformedMessage(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("{0} entry timed out")]
    InteractionTimedOut(&'static str),
    #[error("session cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Established,
    Running,
    Terminated,
}

/// What the engine does after a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue,
    Finished(String),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub kernel_url: Url,
    pub tc_token_url: String,
    pub poll_interval: Duration,
    /// Upper bound for each prompt; `None` waits as long as the user takes.
    pub interaction_timeout: Option<Duration>,
}

/// One inbound frame. Fields are looked up by key: a present `error` key is
/// fatal whatever its value, a `reader` that is not an object is ignored.
#[derive(Debug)]
struct Inbound {
    error: Option<Value>,
    msg: Option<String>,
    url: Option<String>,
    reader: Option<Value>,
}

impl Inbound {
    fn parse(text: &str) -> Result<Self, SessionError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| SessionError::MalformedMessage(e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(SessionError::MalformedMessage(
                "frame is not a JSON object".to_string(),
            ));
        };

        Ok(Self {
            error: fields.remove("error"),
            msg: string_field(&mut fields, "msg")?,
            url: string_field(&mut fields, "url")?,
            reader: fields.remove("reader").filter(Value::is_object),
        })
    }

    fn secret_request(&self, kind: SecretKind) -> SecretRequest {
        let reader = self.reader.as_ref();
        SecretRequest {
            kind,
            reader_name: reader
                .and_then(|r| r.get("name"))
                .and_then(Value::as_str)
                .map(ToString::to_string),
            keypad: reader
                .and_then(|r| r.get("keypad"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }
}

fn string_field(
    fields: &mut serde_json::Map<String, Value>,
    key: &str,
) -> Result<Option<String>, SessionError> {
    match fields.remove(key) {
        None => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(other) => Err(SessionError::MalformedMessage(format!(
            "\"{key}\" is not a string: {other}"
        ))),
    }
}

/// State of one authentication attempt. Never shared between attempts.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    channel: CommandChannel,
    tc_token_url: String,
    result: Option<String>,
    interaction_timeout: Option<Duration>,
}

impl Session {
    #[must_use]
    pub fn new(tc_token_url: impl Into<String>, interaction_timeout: Option<Duration>) -> Self {
        Self {
            state: SessionState::Connecting,
            channel: CommandChannel::new(),
            tc_token_url: tc_token_url.into(),
            result: None,
            interaction_timeout,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    #[must_use]
    pub const fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut CommandChannel {
        &mut self.channel
    }

    pub fn terminate(&mut self) {
        self.state = SessionState::Terminated;
    }

    /// Transport is up: queue `RUN_AUTH` and start reading frames.
    ///
    /// # Errors
    /// Returns `SessionError::Channel` if the TC token URL does not fit into a command.
    pub fn established(&mut self) -> Result<(), SessionError> {
        self.state = SessionState::Established;
        let queued = self.channel.enqueue(Command::RunAuth {
            tc_token_url: self.tc_token_url.clone(),
        });
        if let Err(e) = queued {
            self.terminate();
            return Err(e.into());
        }
        self.state = SessionState::Running;
        Ok(())
    }

    /// Interpret one inbound text frame.
    ///
    /// # Errors
    /// Any error terminates the session: peer errors, unknown messages, malformed
    /// frames, oversized commands, prompt timeouts and cancellation.
    pub async fn handle_text(
        &mut self,
        text: &str,
        interaction: &dyn Interaction,
        cancel: &CancellationToken,
    ) -> Result<Step, SessionError> {
        let step = self.dispatch(text, interaction, cancel).await;
        match &step {
            Ok(Step::Continue) => {}
            Ok(Step::Finished(_)) | Err(_) => self.terminate(),
        }
        step
    }

    async fn dispatch(
        &mut self,
        text: &str,
        interaction: &dyn Interaction,
        cancel: &CancellationToken,
    ) -> Result<Step, SessionError> {
        if self.state != SessionState::Running {
            return Err(SessionError::UnexpectedMessage(format!(
                "frame received in state {:?}",
                self.state
            )));
        }

        trace!("<- {}", text);
        let inbound = Inbound::parse(text)?;

        if let Some(error) = &inbound.error {
            let text = error
                .as_str()
                .map_or_else(|| error.to_string(), ToString::to_string);
            error!("eID client error: {}", text);
            return Err(SessionError::Peer(text));
        }

        let Some(msg) = inbound.msg.as_deref() else {
            return Err(SessionError::MalformedMessage(
                "frame has neither \"msg\" nor \"error\"".to_string(),
            ));
        };
        info!("<- \"msg\":\"{}\"", msg);

        match msg {
            "AUTH" => match inbound.url.as_deref() {
                Some("") => Err(SessionError::MalformedMessage(
                    "AUTH with empty url".to_string(),
                )),
                Some(url) => {
                    self.result = Some(url.to_string());
                    Ok(Step::Finished(url.to_string()))
                }
                None => {
                    // workflow started, the result follows in a later AUTH
                    debug!("authentication workflow started");
                    Ok(Step::Continue)
                }
            },
            "ACCESS_RIGHTS" => {
                self.channel.enqueue(Command::Accept)?;
                Ok(Step::Continue)
            }
            "INSERT_CARD" => {
                self.interact(interaction.insert_card(), "card insertion", cancel)
                    .await?;
                Ok(Step::Continue)
            }
            "ENTER_PIN" => {
                self.handle_secret(&inbound, SecretKind::Pin, interaction, cancel)
                    .await?;
                Ok(Step::Continue)
            }
            "ENTER_CAN" => {
                self.handle_secret(&inbound, SecretKind::Can, interaction, cancel)
                    .await?;
                Ok(Step::Continue)
            }
            other => {
                warn!("unexpected message {}", other);
                Err(SessionError::UnexpectedMessage(other.to_string()))
            }
        }
    }

    async fn handle_secret(
        &mut self,
        inbound: &Inbound,
        kind: SecretKind,
        interaction: &dyn Interaction,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        let request = inbound.secret_request(kind);
        debug!(
            "{} requested, reader: {:?}, keypad: {}",
            kind.label(),
            request.reader_name,
            request.keypad
        );

        let secret = self
            .interact(interaction.enter_secret(&request), kind.label(), cancel)
            .await?;

        match secret {
            Some(secret) if !request.keypad => {
                let command = match kind {
                    SecretKind::Pin => Command::SetPin(secret),
                    SecretKind::Can => Command::SetCan(secret),
                };
                // the command, and the secret with it, is dropped and wiped here
                self.channel.enqueue(command)?;
            }
            Some(_) => debug!("reader has a keypad, local {} discarded", kind.label()),
            None => debug!("no {} supplied", kind.label()),
        }

        Ok(())
    }

    async fn interact<F>(
        &self,
        prompt: F,
        what: &'static str,
        cancel: &CancellationToken,
    ) -> Result<F::Output, SessionError>
    where
        F: Future,
    {
        let bounded = async {
            match self.interaction_timeout {
                Some(limit) => timeout(limit, prompt)
                    .await
                    .map_err(|_| SessionError::InteractionTimedOut(what)),
                None => Ok(prompt.await),
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SessionError::Cancelled),
            result = bounded => result,
        }
    }
}

/// Connect to the eID client and run an authentication to completion.
///
/// # Errors
/// Returns `SessionError::Connect` if the client is not reachable, otherwise whatever
/// ended the session.
#[instrument(skip_all, fields(kernel_url = %config.kernel_url))]
pub async fn run_auth(
    config: &SessionConfig,
    interaction: &dyn Interaction,
    cancel: &CancellationToken,
) -> Result<String, SessionError> {
    let connect_error = |reason: String| SessionError::Connect {
        url: config.kernel_url.to_string(),
        reason,
    };

    let mut request = config
        .kernel_url
        .as_str()
        .into_client_request()
        .map_err(|e| connect_error(e.to_string()))?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

    let mut session = Session::new(config.tc_token_url.clone(), config.interaction_timeout);

    let (stream, response) = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(SessionError::Cancelled),
        connected = tokio_tungstenite::connect_async(request) => {
            connected.map_err(|e| connect_error(e.to_string()))?
        }
    };

    if response.headers().get(SEC_WEBSOCKET_PROTOCOL).is_none() {
        warn!("eID client did not confirm the {} subprotocol", SUBPROTOCOL);
    }
    info!("connected to {}", config.kernel_url);

    drive(stream, &mut session, interaction, cancel, config.poll_interval).await
}

/// Run `session` over an already established transport.
///
/// # Errors
/// See [`Session::handle_text`]; additionally `Closed` and `Transport` when the
/// connection ends or fails before `AUTH`.
pub async fn drive<S>(
    mut ws: S,
    session: &mut Session,
    interaction: &dyn Interaction,
    cancel: &CancellationToken,
    poll_interval: Duration,
) -> Result<String, SessionError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin,
{
    let outcome = service(&mut ws, session, interaction, cancel, poll_interval).await;
    session.terminate();

    // best effort, bounded so a silent peer cannot hold us here
    let _ = timeout(poll_interval, ws.close()).await;

    match &outcome {
        Ok(_) => debug!("session finished"),
        Err(e) => debug!("session ended: {}", e),
    }
    outcome
}

async fn service<S>(
    ws: &mut S,
    session: &mut Session,
    interaction: &dyn Interaction,
    cancel: &CancellationToken,
    poll_interval: Duration,
) -> Result<String, SessionError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin,
{
    session.established()?;

    loop {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        flush(ws, session, cancel).await?;

        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SessionError::Cancelled),
            next = timeout(poll_interval, ws.next()) => next,
        };

        let message = match next {
            // nothing arrived within one poll interval
            Err(_) => continue,
            Ok(None) => return Err(SessionError::Closed),
            Ok(Some(Err(e))) => return Err(SessionError::Transport(e.to_string())),
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                if let Step::Finished(url) = session.handle_text(&text, interaction, cancel).await?
                {
                    return Ok(url);
                }
            }
            Message::Binary(_) => {
                return Err(SessionError::MalformedMessage(
                    "binary frame".to_string(),
                ))
            }
            Message::Close(frame) => {
                debug!("close frame: {:?}", frame);
                return Err(SessionError::Closed);
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
}

async fn flush<S>(
    ws: &mut S,
    session: &mut Session,
    cancel: &CancellationToken,
) -> Result<(), SessionError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    if !session.channel().is_ready() {
        return Ok(());
    }
    let transport = |e: tungstenite::Error| SessionError::Transport(e.to_string());

    tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(SessionError::Cancelled),
        ready = poll_fn(|cx| ws.poll_ready_unpin(cx)) => ready.map_err(transport)?,
    }

    // The frame is copied out of the wiped channel buffer only once the sink can
    // take it, and handed over without a suspension point in between.
    let Some(payload) = session.channel().pending() else {
        return Ok(());
    };
    let name = session.channel().pending_name().unwrap_or_default();
    ws.start_send_unpin(Message::Text(payload.to_string()))
        .map_err(transport)?;

    tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(SessionError::Cancelled),
        flushed = ws.flush() => flushed.map_err(transport)?,
    }

    debug!("wrote {}", name);
    session.channel_mut().complete_write();
    Ok(())
}
