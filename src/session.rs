//! Session identity and pairing negotiation
//!
//! A [`Session`] is this process's identity on the relay: which workspace it
//! belongs to and a unique token for this connection. The
//! [`SessionRegistrar`] creates one per opened socket, builds the `register`
//! handshake, and answers the relay's pairing proposals.
//!
//! ## Pairing
//!
//! ```text
//! relay ── workspace-sync-request{peerWorkspace, selfWorkspace, ...} ──► bridge
//! bridge ── workspace-sync-response{accepted, finalWorkspace?} ──────► relay
//! relay ── workspace-sync-complete{finalWorkspace} ──────────────────► bridge
//! ```
//!
//! The peer's workspace is authoritative: when both sides are related, the
//! bridge adopts the peer's normalized path.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::Path;
use tracing::{info, warn};

use crate::error::BridgeError;
use crate::relay::protocol::{OutboundMessage, WorkspaceSyncComplete, WorkspaceSyncRequest};
use crate::workspace::{related, MatchPolicy, WorkspacePath};

/// This process's identity on the relay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub workspace_id: String,
    pub session_id: String,
    /// `register` was sent on the current socket
    pub registered: bool,
    /// Pairing completed on the current socket
    pub paired: bool,
    /// Session id of the companion we are paired with
    pub peer_session_id: Option<String>,
}

impl Session {
    pub fn new(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            session_id: generate_session_id(),
            ..Default::default()
        }
    }
}

/// `mcp-<unix millis>-<9 random lowercase alphanumerics>`
pub fn generate_session_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("mcp-{}-{}", chrono::Utc::now().timestamp_millis(), suffix)
}

/// Absolute workspace identity: the override when given, else the working
/// directory. A relative override is resolved against the working directory.
pub fn resolve_workspace_id(workspace_override: Option<&str>) -> Result<String, BridgeError> {
    let cwd = std::env::current_dir()?;
    let path = match workspace_override.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) if Path::new(raw).is_absolute() => Path::new(raw).to_path_buf(),
        Some(raw) => cwd.join(raw),
        None => cwd,
    };
    Ok(path.to_string_lossy().into_owned())
}

/// One pairing attempt and its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingNegotiation {
    pub peer_workspace: String,
    pub peer_session_id: String,
    pub self_workspace: String,
    pub self_session_id: String,
    pub accepted: bool,
    pub final_workspace: Option<String>,
}

impl PairingNegotiation {
    pub fn response(&self) -> OutboundMessage {
        OutboundMessage::WorkspaceSyncResponse {
            peer_session_id: self.peer_session_id.clone(),
            self_session_id: self.self_session_id.clone(),
            accepted: self.accepted,
            final_workspace: self.final_workspace.clone(),
        }
    }
}

/// Builds the handshake and decides pairing proposals.
#[derive(Debug, Clone)]
pub struct SessionRegistrar {
    client_type: String,
    workspace_override: Option<String>,
    policy: MatchPolicy,
}

impl SessionRegistrar {
    pub fn new(client_type: impl Into<String>, workspace_override: Option<String>) -> Self {
        Self {
            client_type: client_type.into(),
            workspace_override,
            policy: MatchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fresh identity for a newly opened socket.
    pub fn begin(&self) -> Result<Session, BridgeError> {
        let workspace_id = resolve_workspace_id(self.workspace_override.as_deref())?;
        Ok(Session::new(workspace_id))
    }

    /// The `register` handshake for `session`; marks it registered.
    pub fn register(&self, session: &mut Session) -> OutboundMessage {
        info!(
            workspace = %session.workspace_id,
            session = %session.session_id,
            "Registering with relay"
        );
        session.registered = true;
        OutboundMessage::Register {
            client_type: self.client_type.clone(),
            workspace_id: session.workspace_id.clone(),
            session_id: session.session_id.clone(),
        }
    }

    /// Answer a pairing proposal.
    ///
    /// Returns `None` (no reply at all) when a required field is missing; the
    /// peer's own negotiation timeout handles that case.
    pub fn handle_sync_request(
        &self,
        session: &mut Session,
        request: &WorkspaceSyncRequest,
    ) -> Option<PairingNegotiation> {
        let (Some(peer_workspace), Some(peer_session_id), Some(self_workspace), Some(self_session_id)) = (
            present(&request.peer_workspace),
            present(&request.peer_session_id),
            present(&request.self_workspace),
            present(&request.self_session_id),
        ) else {
            warn!("Invalid workspace sync request - missing required fields");
            return None;
        };

        if self_session_id != session.session_id {
            warn!(
                expected = %session.session_id,
                got = %self_session_id,
                "Workspace sync request addressed to a different session id"
            );
        }

        let mut negotiation = PairingNegotiation {
            peer_workspace: peer_workspace.to_string(),
            peer_session_id: peer_session_id.to_string(),
            self_workspace: self_workspace.to_string(),
            self_session_id: self_session_id.to_string(),
            accepted: false,
            final_workspace: None,
        };

        match self.decide(peer_workspace, self_workspace) {
            Ok(Some(final_workspace)) => {
                info!(final_workspace = %final_workspace, "Accepting workspace sync");
                session.workspace_id = final_workspace.clone();
                negotiation.accepted = true;
                negotiation.final_workspace = Some(final_workspace);
            }
            Ok(None) => {
                info!(
                    peer = %peer_workspace,
                    local = %self_workspace,
                    "Rejecting workspace sync - workspaces are unrelated"
                );
            }
            Err(e) => {
                warn!(error = %e, "Error handling workspace sync request; rejecting");
            }
        }
        Some(negotiation)
    }

    /// The peer's normalized workspace if the two are related.
    fn decide(&self, peer: &str, local: &str) -> Result<Option<String>, BridgeError> {
        let peer = WorkspacePath::parse(peer, self.policy)?;
        let local = WorkspacePath::parse(local, self.policy)?;
        if related(&peer.normalized, &local.normalized) {
            Ok(Some(peer.normalized.into_string()))
        } else {
            Ok(None)
        }
    }

    /// Adopt the final workspace and mark the session paired.
    pub fn handle_sync_complete(&self, session: &mut Session, complete: &WorkspaceSyncComplete) {
        info!(
            final_workspace = %complete.final_workspace,
            peer = ?complete.peer_session_id,
            "Workspace coordination complete"
        );
        session.workspace_id = complete.final_workspace.clone();
        session.peer_session_id = complete.peer_session_id.clone();
        session.paired = true;
    }
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}
