//! Shared fixtures: a scripted eID client speaking the `eid` WebSocket protocol,
//! canned identity responses and test interactions.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use eid_login::eid::{
    interaction::{Interaction, SecretRequest},
    marker::SUCCESS_MARKER,
};
use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::Value;
use std::{sync::Mutex, time::Duration};
use tokio::{net::TcpListener, task::JoinHandle, time::timeout};
use tokio_tungstenite::tungstenite::{
    handshake::server::{ErrorResponse, Request, Response},
    http::header::SEC_WEBSOCKET_PROTOCOL,
    Message,
};
use url::Url;

pub fn can_bind_localhost() -> bool {
    std::net::TcpListener::bind("127.0.0.1:0").is_ok()
}

/// Identity response as served by the issuer.
pub fn identity_response() -> String {
    format!(
        "<?xml version=\"1.0\"?>\n<ns2:Envelope>\n  {SUCCESS_MARKER}\n  <ns4:GivenNames>ERIKA</ns4:GivenNames>\n  <ns4:FamilyNames>MUSTERMANN</ns4:FamilyNames>\n  <ns4:DateOfBirth>19640812</ns4:DateOfBirth>\n</ns2:Envelope>\n"
    )
}

/// What the scripted client does next.
#[derive(Debug, Clone)]
pub enum Step {
    Send(Value),
    /// Wait for the next command from the engine.
    Receive,
    Close,
    /// Keep the connection open without sending anything.
    Hold(Duration),
}

/// Accept one WebSocket connection on `/eID-Kernel` and play `script`.
/// The handle resolves to every command the engine sent.
pub async fn spawn_peer(script: Vec<Step>) -> (Url, JoinHandle<Vec<Value>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let confirm_subprotocol =
            |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
                if let Some(protocol) = request.headers().get(SEC_WEBSOCKET_PROTOCOL) {
                    assert_eq!(protocol, "eid");
                    response
                        .headers_mut()
                        .insert(SEC_WEBSOCKET_PROTOCOL, protocol.clone());
                }
                Ok(response)
            };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, confirm_subprotocol)
            .await
            .unwrap();

        let mut received = Vec::new();
        for step in script {
            match step {
                Step::Send(frame) => {
                    if ws.send(Message::Text(frame.to_string())).await.is_err() {
                        return received;
                    }
                }
                Step::Receive => loop {
                    match ws.next().await {
                        Some(Ok(Message::Text(text))) => {
                            received.push(serde_json::from_str(&text).unwrap());
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(_)) | None => return received,
                    }
                },
                Step::Close => {
                    let _ = ws.close(None).await;
                    return received;
                }
                Step::Hold(duration) => tokio::time::sleep(duration).await,
            }
        }

        // let the engine close its side
        let _ = timeout(Duration::from_secs(5), async {
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    received.push(serde_json::from_str(&text).unwrap());
                }
            }
        })
        .await;
        received
    });

    let url = Url::parse(&format!("ws://{addr}/eID-Kernel")).unwrap();
    (url, handle)
}

/// Answers every PIN/CAN request with a fixed value.
#[derive(Default)]
pub struct FixedSecret {
    pub secret: Option<String>,
    pub requests: Mutex<Vec<SecretRequest>>,
}

impl FixedSecret {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Some(secret.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Interaction for FixedSecret {
    async fn enter_secret(&self, request: &SecretRequest) -> Option<SecretString> {
        self.requests.lock().unwrap().push(request.clone());
        self.secret.clone().map(SecretString::from)
    }

    async fn insert_card(&self) {}
}

/// A user who never answers.
pub struct Absent;

#[async_trait]
impl Interaction for Absent {
    async fn enter_secret(&self, _request: &SecretRequest) -> Option<SecretString> {
        std::future::pending::<()>().await;
        None
    }

    async fn insert_card(&self) {
        std::future::pending::<()>().await;
    }
}
