//! Integration tests for the bridge against an in-process relay
//!
//! The mock relay accepts WebSocket connections on an ephemeral localhost
//! port and hands each accepted socket to the test, which then plays the
//! relay-plus-companion side of the protocol by hand.

use futures_util::{SinkExt, StreamExt};
use relay_bridge::{Bridge, BridgeConfig, BridgeError, ConnectionState, InputKind, ToolRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

type Peer = WebSocketStream<TcpStream>;

/// Relay side of the socket, one per accepted connection
struct MockRelay {
    port: u16,
    accepted: mpsc::UnboundedReceiver<Peer>,
}

impl MockRelay {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, accepted) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(stream).await {
                    if tx.send(ws).is_err() {
                        break;
                    }
                }
            }
        });
        Self { port, accepted }
    }

    async fn next_peer(&mut self) -> Peer {
        tokio::time::timeout(WAIT, self.accepted.recv())
            .await
            .expect("bridge should connect")
            .unwrap()
    }

    fn config(&self) -> BridgeConfig {
        BridgeConfig {
            relay_host: "127.0.0.1".to_string(),
            relay_port: self.port,
            workspace_override: Some("/proj/a".to_string()),
            connect_timeout_ms: 2_000,
            reconnect_delay_ms: 100,
            // Keep heartbeats out of the frame stream
            heartbeat_interval_ms: 60_000,
            ..Default::default()
        }
    }
}

async fn recv_json(peer: &mut Peer) -> Value {
    loop {
        let frame = tokio::time::timeout(WAIT, peer.next())
            .await
            .expect("expected a frame from the bridge")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send_json(peer: &mut Peer, value: Value) {
    peer.send(Message::Text(value.to_string())).await.unwrap();
}

async fn wait_for_state(bridge: &Bridge, state: ConnectionState) {
    let mut rx = bridge.subscribe_state();
    tokio::time::timeout(WAIT, rx.wait_for(|s| s.state == state))
        .await
        .expect("state not reached in time")
        .unwrap();
}

/// Start a bridge and return it with the relay side of its first socket,
/// after consuming the `register` frame.
async fn connected() -> (MockRelay, Bridge, Arc<ToolRegistry>, Peer, Value) {
    let mut relay = MockRelay::start().await;
    let registry = Arc::new(ToolRegistry::new());
    let bridge = Bridge::new(&relay.config(), registry.clone());
    bridge.start().await.unwrap();

    let mut peer = relay.next_peer().await;
    let register = recv_json(&mut peer).await;
    (relay, bridge, registry, peer, register)
}

fn sync_request(register: &Value, peer_workspace: &str, self_workspace: &str) -> Value {
    json!({
        "type": "workspace-sync-request",
        "peerWorkspace": peer_workspace,
        "peerSessionId": "companion-1",
        "selfWorkspace": self_workspace,
        "selfSessionId": register["sessionId"],
    })
}

#[tokio::test]
async fn test_register_handshake() {
    let (_relay, bridge, registry, _peer, register) = connected().await;

    assert_eq!(register["type"], "register");
    assert_eq!(register["clientType"], "mcp-server");
    assert_eq!(register["workspaceId"], "/proj/a");
    assert!(register["sessionId"].as_str().unwrap().starts_with("mcp-"));

    assert_eq!(bridge.state(), ConnectionState::Registered);
    assert_eq!(registry.len(), 3);
    bridge.stop().await;
}

#[tokio::test]
async fn test_related_workspace_pairs() {
    let (_relay, bridge, _registry, mut peer, register) = connected().await;

    send_json(&mut peer, sync_request(&register, "/proj/a/sub", "/proj/a")).await;
    let reply = recv_json(&mut peer).await;
    assert_eq!(reply["type"], "workspace-sync-response");
    assert_eq!(reply["accepted"], true);
    assert_eq!(reply["finalWorkspace"], "/proj/a/sub");
    assert_eq!(reply["peerSessionId"], "companion-1");
    assert_eq!(reply["selfSessionId"], register["sessionId"]);

    send_json(
        &mut peer,
        json!({
            "type": "workspace-sync-complete",
            "finalWorkspace": "/proj/a/sub",
            "peerSessionId": "companion-1",
        }),
    )
    .await;
    wait_for_state(&bridge, ConnectionState::Paired).await;

    let session = bridge.session().await;
    assert!(session.paired);
    assert_eq!(session.workspace_id, "/proj/a/sub");
    bridge.stop().await;
}

#[tokio::test]
async fn test_unrelated_workspace_rejected() {
    let (_relay, bridge, _registry, mut peer, register) = connected().await;

    send_json(&mut peer, sync_request(&register, "/proj/x", "/proj/a")).await;
    let reply = recv_json(&mut peer).await;
    assert_eq!(reply["accepted"], false);
    assert!(reply.get("finalWorkspace").is_none());

    assert_eq!(bridge.session().await.workspace_id, "/proj/a");
    bridge.stop().await;
}

#[tokio::test]
async fn test_malformed_frames_are_ignored() {
    let (_relay, bridge, _registry, mut peer, register) = connected().await;

    peer.send(Message::Text("not json".to_string())).await.unwrap();
    send_json(&mut peer, json!({"type": "from-the-future"})).await;
    // Missing fields: logged and dropped, no reply
    send_json(&mut peer, json!({"type": "workspace-sync-request", "peerWorkspace": "/proj/a"})).await;

    send_json(&mut peer, sync_request(&register, "/proj/a", "/proj/a")).await;
    let reply = recv_json(&mut peer).await;
    assert_eq!(reply["type"], "workspace-sync-response");
    assert_eq!(reply["accepted"], true);
    assert!(bridge.state().is_open());
    bridge.stop().await;
}

#[tokio::test]
async fn test_tool_call_round_trip() {
    let (_relay, bridge, registry, mut peer, _register) = connected().await;

    let call = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            registry
                .call(
                    "ask_user_confirm",
                    json!({"title": "Deploy", "message": "Ship it?"}),
                )
                .await
        })
    };

    let request = recv_json(&mut peer).await;
    assert_eq!(request["type"], "request");
    assert_eq!(request["inputKind"], "confirm");
    assert_eq!(request["payload"]["confirmText"], "Yes");
    assert_eq!(request["payload"]["cancelText"], "No");

    send_json(
        &mut peer,
        json!({
            "type": "response",
            "requestId": request["requestId"],
            "response": {"confirmed": true},
        }),
    )
    .await;

    let result = tokio::time::timeout(WAIT, call).await.unwrap().unwrap().unwrap();
    let result = serde_json::to_value(&result).unwrap();
    assert_eq!(result["content"][0]["text"], "User confirmed");
    bridge.stop().await;
}

#[tokio::test]
async fn test_concurrent_requests_resolve_independently() {
    let (_relay, bridge, _registry, mut peer, _register) = connected().await;

    let first = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.invoke(InputKind::Text, json!({"n": 1})).await })
    };
    let a = recv_json(&mut peer).await;
    let second = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.invoke(InputKind::Text, json!({"n": 2})).await })
    };
    let b = recv_json(&mut peer).await;
    assert_ne!(a["requestId"], b["requestId"]);

    // Answer out of order
    for request in [&b, &a] {
        send_json(
            &mut peer,
            json!({
                "type": "response",
                "requestId": request["requestId"],
                "response": {"value": request["payload"]["n"]},
            }),
        )
        .await;
    }

    assert_eq!(first.await.unwrap().unwrap(), json!({"value": 1}));
    assert_eq!(second.await.unwrap().unwrap(), json!({"value": 2}));
    bridge.stop().await;
}

#[tokio::test]
async fn test_drop_fails_pending_and_reconnects() {
    let (mut relay, bridge, _registry, mut peer, first_register) = connected().await;

    let call = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.invoke(InputKind::Buttons, json!({"title": "t"})).await })
    };
    let _request = recv_json(&mut peer).await;

    peer.close(None).await.unwrap();
    drop(peer);

    let err = tokio::time::timeout(WAIT, call)
        .await
        .expect("pending request must fail when the relay drops")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, BridgeError::ConnectionLost(_)));

    // Exactly one reconnect after the delay, with a fresh session
    let mut second = relay.next_peer().await;
    let register = recv_json(&mut second).await;
    assert_eq!(register["type"], "register");
    assert_ne!(register["sessionId"], first_register["sessionId"]);
    wait_for_state(&bridge, ConnectionState::Registered).await;
    assert_eq!(bridge.attempts(), 2);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(relay.accepted.try_recv().is_err(), "no duplicate connection");
    bridge.stop().await;
}

#[tokio::test]
async fn test_invoke_while_disconnected() {
    let registry = Arc::new(ToolRegistry::new());
    let bridge = Bridge::new(&BridgeConfig::default(), registry);

    let err = bridge
        .invoke(InputKind::Confirm, json!({"title": "t", "message": "m"}))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::NotConnected));
    assert_eq!(bridge.attempts(), 0);
}

#[tokio::test]
async fn test_manual_disconnection_waits_for_host() {
    let (mut relay, bridge, _registry, mut peer, _register) = connected().await;

    send_json(&mut peer, json!({"type": "manual-disconnection"})).await;
    // Let the bridge process the signal before the socket goes away
    tokio::time::sleep(Duration::from_millis(100)).await;
    peer.close(None).await.unwrap();
    drop(peer);

    wait_for_state(&bridge, ConnectionState::Closed).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(relay.accepted.try_recv().is_err(), "no automatic reconnect");
    assert_eq!(bridge.attempts(), 1);
    assert!(!bridge.capabilities_registered());

    bridge.connect().await.unwrap();
    let mut again = relay.next_peer().await;
    assert_eq!(recv_json(&mut again).await["type"], "register");
    assert!(bridge.capabilities_registered());
    bridge.stop().await;
}

#[tokio::test]
async fn test_pairing_ready_sends_refresh_complete() {
    let (_relay, bridge, _registry, mut peer, register) = connected().await;

    send_json(&mut peer, json!({"type": "pairing-ready"})).await;
    let complete = recv_json(&mut peer).await;
    assert_eq!(complete["type"], "tool-refresh-complete");
    assert_eq!(complete["sessionId"], register["sessionId"]);
    assert!(bridge.capabilities_registered());
    bridge.stop().await;
}
