//! End-to-end tests against a loopback tokio-tungstenite server

use futures_util::{SinkExt, StreamExt};
use pulse_link::{
    listener, BackoffPolicy, ConnectionState, Credential, InboundEvent, LinkConfig, RealtimeLink,
    SessionCredentials,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

async fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    accept_async(stream).await.unwrap()
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        match timeout(WAIT, ws.next()).await.unwrap() {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

fn config_for(port: u16) -> LinkConfig {
    let mut config = LinkConfig::new("http://127.0.0.1:9");
    config.ws_port = port;
    config.keepalive_secs = 0;
    config.close_timeout_ms = 500;
    config.backoff = BackoffPolicy::new(20, 200, 5);
    config
}

async fn wait_for_state(link: &RealtimeLink, state: ConnectionState) {
    let mut states = link.watch_state();
    timeout(WAIT, states.wait_for(|s| *s == state))
        .await
        .expect("state not reached in time")
        .unwrap();
}

#[tokio::test]
async fn test_auth_then_events_in_order() {
    let (server, port) = bind().await;
    let creds = Arc::new(SessionCredentials::new(Some(Credential::new("jwt-abc", 1201))));
    let link = RealtimeLink::new(config_for(port), creds).unwrap();
    assert_eq!(link.endpoint(), format!("ws://127.0.0.1:{port}/"));

    let (tx, mut rx) = mpsc::unbounded_channel::<InboundEvent>();
    let forward = listener(move |event| {
        let _ = tx.send(event.clone());
    });
    link.add_listener(&forward);
    link.connect();

    let mut ws = accept(&server).await;
    assert_eq!(
        next_text(&mut ws).await,
        json!({"type": "auth", "token": "jwt-abc", "userId": 1201})
    );
    wait_for_state(&link, ConnectionState::Open).await;

    for id in 1..=3 {
        let frame = json!({"type": "notification", "data": {"id": id}}).to_string();
        ws.send(Message::Text(frame)).await.unwrap();
    }
    ws.send(Message::Text("not json".into())).await.unwrap();
    ws.send(Message::Text(json!({"type": "auth_error", "data": "expired"}).to_string()))
        .await
        .unwrap();

    let mut received = Vec::new();
    for _ in 0..4 {
        received.push(timeout(WAIT, rx.recv()).await.unwrap().unwrap());
    }
    let ids: Vec<Value> = received[..3].iter().map(|e| e.data["id"].clone()).collect();
    assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
    assert!(received[3].is("auth_error"));
    assert_eq!(link.stats().frames_dropped, 1);

    link.send(&json!({"type": "mark_read", "id": 2}));
    assert_eq!(next_text(&mut ws).await, json!({"type": "mark_read", "id": 2}));

    link.disconnect();
    loop {
        match timeout(WAIT, ws.next()).await.unwrap() {
            Some(Ok(Message::Close(frame))) => {
                let code = frame.map(|f| u16::from(f.code));
                assert_eq!(code, Some(1000));
                break;
            }
            Some(Ok(_)) => continue,
            other => panic!("expected close frame, got {other:?}"),
        }
    }
    // Flush our close reply so the client sees the handshake complete
    let _ = ws.close(None).await;
    wait_for_state(&link, ConnectionState::Disconnected).await;
}

#[tokio::test]
async fn test_reconnects_and_reauthenticates_after_drop() {
    let (server, port) = bind().await;
    let creds = Arc::new(SessionCredentials::new(Some(Credential::new("first", 1))));
    let link = RealtimeLink::new(config_for(port), creds.clone()).unwrap();
    link.connect();

    let mut ws = accept(&server).await;
    assert_eq!(next_text(&mut ws).await["token"], "first");
    wait_for_state(&link, ConnectionState::Open).await;

    // Token refreshed while connected; the next handshake must use it
    creds.set(Credential::new("second", 1));
    drop(ws);

    let mut ws = accept(&server).await;
    assert_eq!(
        next_text(&mut ws).await,
        json!({"type": "auth", "token": "second", "userId": 1})
    );
    wait_for_state(&link, ConnectionState::Open).await;
    assert_eq!(link.reconnect_attempt(), 0);

    link.shutdown();
}

#[tokio::test]
async fn test_unreachable_server_exhausts_retries() {
    // Grab a free port, then close it so every connect is refused
    let (server, port) = bind().await;
    drop(server);

    let mut config = config_for(port);
    config.backoff = BackoffPolicy::new(5, 20, 3);
    let link = RealtimeLink::new(config, Arc::new(SessionCredentials::default())).unwrap();
    link.connect();

    let mut states = link.watch_state();
    timeout(WAIT, states.wait_for(|_| link.reconnect_attempt() == 3))
        .await
        .expect("retries did not run")
        .unwrap();

    // Give a would-be fourth retry time to show up
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(link.state(), ConnectionState::Reconnecting);
    assert_eq!(link.reconnect_attempt(), 3);
    assert!(link.retries_exhausted());
    assert!(link.is_degraded(Duration::from_secs(1)));
}

#[tokio::test]
async fn test_hung_upgrade_times_out_into_backoff() {
    // Accepts TCP but never answers the HTTP upgrade
    let (server, port) = bind().await;
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = server.accept().await {
            held.push(stream);
        }
    });

    let mut config = config_for(port);
    config.connect_timeout_ms = 200;
    let link = RealtimeLink::new(config, Arc::new(SessionCredentials::default())).unwrap();
    link.connect();

    let mut states = link.watch_state();
    timeout(WAIT, states.wait_for(|_| link.reconnect_attempt() >= 1))
        .await
        .expect("handshake never timed out")
        .unwrap();
    assert!(!link.state().is_open());
    link.shutdown();
}

#[tokio::test]
async fn test_silent_peer_is_dropped_and_retried() {
    let (server, port) = bind().await;
    let mut config = config_for(port);
    config.keepalive_secs = 1;
    config.pong_timeout_ms = 300;
    let link = RealtimeLink::new(config, Arc::new(SessionCredentials::default())).unwrap();
    link.connect();

    // Upgrade completes, then the peer never reads again
    let _silent = accept(&server).await;
    wait_for_state(&link, ConnectionState::Open).await;

    let mut states = link.watch_state();
    timeout(WAIT, states.wait_for(|s| *s != ConnectionState::Open))
        .await
        .expect("dead peer still reported open")
        .unwrap();
    assert_eq!(link.reconnect_attempt(), 1);

    let mut retried = accept(&server).await;
    wait_for_state(&link, ConnectionState::Open).await;

    link.disconnect();
    while let Ok(Some(Ok(msg))) = timeout(WAIT, retried.next()).await {
        if msg.is_close() {
            break;
        }
    }
    let _ = retried.close(None).await;
    wait_for_state(&link, ConnectionState::Disconnected).await;
}
