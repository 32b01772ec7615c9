//! Relay Wire Protocol
//!
//! Single responsibility: the JSON shape of every frame exchanged with the relay.
//!
//! One logical message per WebSocket text frame, discriminated by `type`:
//!
//! ```json
//! {"type": "register", "clientType": "mcp-server", "workspaceId": "/proj/a", "sessionId": "mcp-..."}
//! {"type": "request", "requestId": "9f1c...", "inputKind": "confirm", "payload": {...}}
//! {"type": "response", "requestId": "9f1c...", "response": {"confirmed": true}}
//! ```
//!
//! Inbound frames that fail to parse are dropped, never surfaced: the process
//! shares stdio with a machine-readable protocol and must not crash on noise.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Messages the relay delivers to the bridge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundMessage {
    /// Relay acknowledged our `register`
    Register,
    /// Correlated answer to an earlier `request`
    #[serde(rename_all = "camelCase")]
    Response {
        request_id: String,
        /// Absent on a bare acknowledgement; resolves the caller with `null`
        #[serde(default)]
        response: Value,
    },
    WorkspaceSyncRequest(WorkspaceSyncRequest),
    WorkspaceSyncComplete(WorkspaceSyncComplete),
    #[serde(rename_all = "camelCase")]
    PairingReady {
        #[serde(default)]
        is_reconnection: bool,
    },
    AutoRetryTrigger {
        #[serde(default)]
        reason: Option<String>,
    },
    ManualDisconnection,
    /// Any `type` this bridge does not understand
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Response { .. } => "response",
            Self::WorkspaceSyncRequest(_) => "workspace-sync-request",
            Self::WorkspaceSyncComplete(_) => "workspace-sync-complete",
            Self::PairingReady { .. } => "pairing-ready",
            Self::AutoRetryTrigger { .. } => "auto-retry-trigger",
            Self::ManualDisconnection => "manual-disconnection",
            Self::Unknown => "unknown",
        }
    }
}

/// Pairing proposal from the relay.
///
/// Fields are optional on the wire so that an incomplete proposal can be
/// logged and ignored instead of failing the whole frame.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSyncRequest {
    #[serde(default)]
    pub peer_workspace: Option<String>,
    #[serde(default)]
    pub peer_session_id: Option<String>,
    #[serde(default)]
    pub self_workspace: Option<String>,
    #[serde(default)]
    pub self_session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSyncComplete {
    pub final_workspace: String,
    #[serde(default)]
    pub peer_session_id: Option<String>,
}

/// Messages the bridge sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    #[serde(rename_all = "camelCase")]
    Register {
        client_type: String,
        workspace_id: String,
        session_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Request {
        request_id: String,
        input_kind: String,
        payload: Value,
    },
    #[serde(rename_all = "camelCase")]
    WorkspaceSyncResponse {
        peer_session_id: String,
        self_session_id: String,
        accepted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        final_workspace: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolsAvailableHeartbeat {
        workspace_id: String,
        session_id: String,
        timestamp: i64,
        sequence: u64,
    },
    #[serde(rename_all = "camelCase")]
    ToolRefreshComplete {
        workspace_id: String,
        session_id: String,
        timestamp: i64,
    },
}

impl OutboundMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Decode one text frame. Returns `None` for anything that is not a
/// well-formed relay message.
pub fn decode_frame(text: &str) -> Option<InboundMessage> {
    match serde_json::from_str::<InboundMessage>(text) {
        Ok(message) => Some(message),
        Err(e) => {
            debug!(error = %e, len = text.len(), "Dropping malformed relay frame");
            None
        }
    }
}

/// Milliseconds since the Unix epoch, as carried in heartbeat frames.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_response() {
        let msg = decode_frame(r#"{"type":"response","requestId":"abc","response":{"value":"x"}}"#)
            .unwrap();
        assert_eq!(
            msg,
            InboundMessage::Response {
                request_id: "abc".to_string(),
                response: json!({"value": "x"}),
            }
        );
    }

    #[test]
    fn test_decode_response_without_body() {
        let msg = decode_frame(r#"{"type":"response","requestId":"abc"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Response {
                request_id: "abc".to_string(),
                response: Value::Null,
            }
        );
    }

    #[test]
    fn test_decode_sync_request_with_missing_fields() {
        let msg = decode_frame(
            r#"{"type":"workspace-sync-request","peerWorkspace":"/proj/a","selfSessionId":"s1"}"#,
        )
        .unwrap();
        match msg {
            InboundMessage::WorkspaceSyncRequest(req) => {
                assert_eq!(req.peer_workspace.as_deref(), Some("/proj/a"));
                assert_eq!(req.self_session_id.as_deref(), Some("s1"));
                assert!(req.peer_session_id.is_none());
                assert!(req.self_workspace.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_peer_signals() {
        assert_eq!(
            decode_frame(r#"{"type":"pairing-ready","isReconnection":true}"#),
            Some(InboundMessage::PairingReady {
                is_reconnection: true
            })
        );
        assert_eq!(
            decode_frame(r#"{"type":"pairing-ready"}"#),
            Some(InboundMessage::PairingReady {
                is_reconnection: false
            })
        );
        assert_eq!(
            decode_frame(r#"{"type":"auto-retry-trigger","reason":"idle"}"#),
            Some(InboundMessage::AutoRetryTrigger {
                reason: Some("idle".to_string())
            })
        );
        assert_eq!(
            decode_frame(r#"{"type":"manual-disconnection"}"#),
            Some(InboundMessage::ManualDisconnection)
        );
        assert_eq!(
            decode_frame(r#"{"type":"register","ok":true}"#),
            Some(InboundMessage::Register)
        );
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        assert_eq!(
            decode_frame(r#"{"type":"something-new","x":1}"#),
            Some(InboundMessage::Unknown)
        );
    }

    #[test]
    fn test_malformed_frames_are_dropped() {
        assert!(decode_frame("not json").is_none());
        assert!(decode_frame("{}").is_none());
        assert!(decode_frame(r#"{"type":"response"}"#).is_none());
        assert!(decode_frame(r#"[1,2,3]"#).is_none());
        assert!(decode_frame("").is_none());
    }

    #[test]
    fn test_outbound_wire_names() {
        let register = OutboundMessage::Register {
            client_type: "mcp-server".to_string(),
            workspace_id: "/proj/a".to_string(),
            session_id: "mcp-1".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&register).unwrap(),
            json!({
                "type": "register",
                "clientType": "mcp-server",
                "workspaceId": "/proj/a",
                "sessionId": "mcp-1",
            })
        );

        let heartbeat = OutboundMessage::ToolsAvailableHeartbeat {
            workspace_id: "/proj/a".to_string(),
            session_id: "mcp-1".to_string(),
            timestamp: 42,
            sequence: 3,
        };
        let value = serde_json::to_value(&heartbeat).unwrap();
        assert_eq!(value["type"], "tools-available-heartbeat");
        assert_eq!(value["sequence"], 3);

        let refresh = OutboundMessage::ToolRefreshComplete {
            workspace_id: "/proj/a".to_string(),
            session_id: "mcp-1".to_string(),
            timestamp: 42,
        };
        assert_eq!(
            serde_json::to_value(&refresh).unwrap()["type"],
            "tool-refresh-complete"
        );
    }

    #[test]
    fn test_rejection_omits_final_workspace() {
        let rejection = OutboundMessage::WorkspaceSyncResponse {
            peer_session_id: "peer".to_string(),
            self_session_id: "self".to_string(),
            accepted: false,
            final_workspace: None,
        };
        let value = serde_json::to_value(&rejection).unwrap();
        assert_eq!(value["type"], "workspace-sync-response");
        assert_eq!(value["accepted"], false);
        assert!(value.get("finalWorkspace").is_none());
    }
}
