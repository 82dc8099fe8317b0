#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{can_bind_localhost, spawn_peer, Absent, FixedSecret, Step};
use eid_login::eid::{
    interaction::SecretKind,
    session::{run_auth, SessionConfig, SessionError},
};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

const TC_TOKEN_URL: &str = "https://www.autentapp.de/AusweisAuskunft/WebServiceRequesterServlet";

fn config(kernel_url: Url) -> SessionConfig {
    SessionConfig {
        kernel_url,
        tc_token_url: TC_TOKEN_URL.to_string(),
        poll_interval: Duration::from_millis(50),
        interaction_timeout: None,
    }
}

#[tokio::test]
async fn pin_flow_reports_the_final_url() {
    if !can_bind_localhost() {
        eprintln!("Skipping websocket test: cannot bind to localhost");
        return;
    }

    let (kernel_url, peer) = spawn_peer(vec![
        Step::Receive,
        Step::Send(json!({"msg": "ACCESS_RIGHTS", "chat": {"required": ["GivenNames"]}})),
        Step::Receive,
        Step::Send(json!({"msg": "AUTH"})),
        Step::Send(json!({"msg": "ENTER_PIN", "reader": {"name": "Reader 1", "keypad": false}})),
        Step::Receive,
        Step::Send(json!({"msg": "AUTH", "url": "https://www.autentapp.de/result?ok=1"})),
    ])
    .await;

    let interaction = FixedSecret::new("123456");
    let url = run_auth(&config(kernel_url), &interaction, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(url, "https://www.autentapp.de/result?ok=1");

    let sent = peer.await.unwrap();
    assert_eq!(
        sent,
        vec![
            json!({"cmd": "RUN_AUTH", "tcTokenURL": TC_TOKEN_URL}),
            json!({"cmd": "ACCEPT"}),
            json!({"cmd": "SET_PIN", "value": "123456"}),
        ]
    );

    let requests = interaction.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, SecretKind::Pin);
    assert_eq!(requests[0].reader_name.as_deref(), Some("Reader 1"));
}

#[tokio::test]
async fn keypad_reader_gets_no_pin_from_us() {
    if !can_bind_localhost() {
        eprintln!("Skipping websocket test: cannot bind to localhost");
        return;
    }

    let (kernel_url, peer) = spawn_peer(vec![
        Step::Receive,
        Step::Send(json!({"msg": "ENTER_PIN", "reader": {"name": "Keypad", "keypad": true}})),
        Step::Hold(Duration::from_millis(200)),
        Step::Send(json!({"msg": "AUTH", "url": "https://www.autentapp.de/result"})),
    ])
    .await;

    let interaction = FixedSecret::new("123456");
    let url = run_auth(&config(kernel_url), &interaction, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(url, "https://www.autentapp.de/result");

    let sent = peer.await.unwrap();
    assert_eq!(
        sent,
        vec![json!({"cmd": "RUN_AUTH", "tcTokenURL": TC_TOKEN_URL})]
    );
}

#[tokio::test]
async fn can_request_is_answered_with_set_can() {
    if !can_bind_localhost() {
        eprintln!("Skipping websocket test: cannot bind to localhost");
        return;
    }

    let (kernel_url, peer) = spawn_peer(vec![
        Step::Receive,
        Step::Send(json!({"msg": "ENTER_CAN"})),
        Step::Receive,
        Step::Send(json!({"msg": "AUTH", "url": "https://www.autentapp.de/result"})),
    ])
    .await;

    let interaction = FixedSecret::new("654321");
    run_auth(&config(kernel_url), &interaction, &CancellationToken::new())
        .await
        .unwrap();

    let sent = peer.await.unwrap();
    assert_eq!(sent[1], json!({"cmd": "SET_CAN", "value": "654321"}));
    assert_eq!(interaction.requests.lock().unwrap()[0].kind, SecretKind::Can);
}

#[tokio::test]
async fn unknown_message_ends_the_session() {
    if !can_bind_localhost() {
        eprintln!("Skipping websocket test: cannot bind to localhost");
        return;
    }

    let (kernel_url, _peer) = spawn_peer(vec![
        Step::Receive,
        Step::Send(json!({"msg": "UNKNOWN_X"})),
    ])
    .await;

    let err = run_auth(&config(kernel_url), &FixedSecret::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, SessionError::UnexpectedMessage(ref msg) if msg == "UNKNOWN_X"),
        "{err:?}"
    );
}

#[tokio::test]
async fn peer_error_ends_the_session() {
    if !can_bind_localhost() {
        eprintln!("Skipping websocket test: cannot bind to localhost");
        return;
    }

    let (kernel_url, _peer) = spawn_peer(vec![
        Step::Receive,
        Step::Send(json!({"error": "card removed"})),
    ])
    .await;

    let err = run_auth(&config(kernel_url), &FixedSecret::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Peer(ref text) if text == "card removed"), "{err:?}");
}

#[tokio::test]
async fn close_before_auth_is_reported() {
    if !can_bind_localhost() {
        eprintln!("Skipping websocket test: cannot bind to localhost");
        return;
    }

    let (kernel_url, _peer) = spawn_peer(vec![Step::Receive, Step::Close]).await;

    let err = run_auth(&config(kernel_url), &FixedSecret::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, SessionError::Closed | SessionError::Transport(_)),
        "{err:?}"
    );
}

#[tokio::test]
async fn unreachable_client_is_a_connect_error() {
    if !can_bind_localhost() {
        eprintln!("Skipping websocket test: cannot bind to localhost");
        return;
    }

    // grab a free port and release it again
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let kernel_url = Url::parse(&format!("ws://127.0.0.1:{port}/eID-Kernel")).unwrap();

    let err = run_auth(&config(kernel_url), &FixedSecret::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Connect { .. }), "{err:?}");
}

#[tokio::test]
async fn cancellation_interrupts_an_open_prompt() {
    if !can_bind_localhost() {
        eprintln!("Skipping websocket test: cannot bind to localhost");
        return;
    }

    let (kernel_url, _peer) = spawn_peer(vec![
        Step::Receive,
        Step::Send(json!({"msg": "ENTER_PIN"})),
        Step::Hold(Duration::from_secs(10)),
    ])
    .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = run_auth(&config(kernel_url), &Absent, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Cancelled), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn cancellation_interrupts_a_silent_client() {
    if !can_bind_localhost() {
        eprintln!("Skipping websocket test: cannot bind to localhost");
        return;
    }

    let (kernel_url, _peer) =
        spawn_peer(vec![Step::Receive, Step::Hold(Duration::from_secs(10))]).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = run_auth(&config(kernel_url), &FixedSecret::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Cancelled), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn prompt_timeout_ends_the_session() {
    if !can_bind_localhost() {
        eprintln!("Skipping websocket test: cannot bind to localhost");
        return;
    }

    let (kernel_url, _peer) = spawn_peer(vec![
        Step::Receive,
        Step::Send(json!({"msg": "ENTER_PIN"})),
        Step::Hold(Duration::from_secs(10)),
    ])
    .await;

    let mut config = config(kernel_url);
    config.interaction_timeout = Some(Duration::from_millis(100));

    let err = run_auth(&config, &Absent, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InteractionTimedOut("PIN")), "{err:?}");
}
