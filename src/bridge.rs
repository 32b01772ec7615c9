//! Bridge session object
//!
//! One [`Bridge`] owns everything for the lifetime of the process: the relay
//! connection, the pending request table, the session identity and the
//! capability announcer. It is the [`RelayHandler`] for its own connection,
//! so every inbound frame is dispatched here.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::announcer::{AnnouncerConfig, CapabilityAnnouncer};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::facade::RequestFacade;
use crate::operations::{InputKind, OperationHost};
use crate::relay::protocol::{WorkspaceSyncComplete, WorkspaceSyncRequest};
use crate::relay::{
    ConnectionSnapshot, ConnectionState, InboundMessage, PendingRequestTable, RelayConnection,
    RelayHandler,
};
use crate::session::{Session, SessionRegistrar};

struct BridgeInner {
    registrar: SessionRegistrar,
    connection: Arc<RelayConnection>,
    pending: Arc<PendingRequestTable>,
    facade: RequestFacade,
    announcer: Arc<CapabilityAnnouncer>,
    session: Arc<RwLock<Session>>,
}

/// Pairs this process with its companion and carries requests between them.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    pub fn new(config: &BridgeConfig, host: Arc<dyn OperationHost>) -> Self {
        let connection = Arc::new(RelayConnection::new(
            config.relay_url(),
            config.connect_timeout(),
            config.reconnect_delay(),
        ));
        let pending = Arc::new(PendingRequestTable::new());
        let facade = RequestFacade::new(Arc::clone(&connection), Arc::clone(&pending));
        let session = Arc::new(RwLock::new(Session::default()));
        let announcer = Arc::new(CapabilityAnnouncer::new(
            AnnouncerConfig::from(config),
            host,
            facade.clone(),
            Arc::clone(&connection),
            Arc::clone(&session),
        ));

        Self {
            inner: Arc::new(BridgeInner {
                registrar: SessionRegistrar::new(
                    config.client_type.clone(),
                    config.workspace_override.clone(),
                )
                .with_policy(config.match_policy()),
                connection,
                pending,
                facade,
                announcer,
                session,
            }),
        }
    }

    /// Connect to the relay.
    ///
    /// On failure the bridge keeps retrying in the background; the error is
    /// returned so the host can report it.
    pub async fn start(&self) -> Result<(), BridgeError> {
        match self.connect().await {
            Ok(()) => {
                info!(url = %self.inner.connection.url(), "Connected to relay");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to connect to relay; will keep retrying");
                Err(e)
            }
        }
    }

    /// Open the relay link now. Also resumes after a manual disconnection.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        let handler: Arc<dyn RelayHandler> = self.inner.clone();
        self.inner.connection.connect(handler).await
    }

    /// Close the link for good and fail anything still waiting.
    pub async fn stop(&self) {
        info!("Stopping bridge");
        self.inner.connection.stop().await;
        self.inner.announcer.stop().await;
        self.inner.pending.reject_all("bridge stopped").await;
    }

    pub fn facade(&self) -> RequestFacade {
        self.inner.facade.clone()
    }

    /// Shortcut for [`RequestFacade::invoke`].
    pub async fn invoke(&self, kind: InputKind, payload: Value) -> Result<Value, BridgeError> {
        self.inner.facade.invoke(kind, payload).await
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.connection.snapshot()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.inner.connection.subscribe()
    }

    /// Connection attempts made so far, including reconnects.
    pub fn attempts(&self) -> u64 {
        self.inner.connection.attempts()
    }

    /// Copy of the current session identity.
    pub async fn session(&self) -> Session {
        self.inner.session.read().await.clone()
    }

    pub fn capabilities_registered(&self) -> bool {
        self.inner.announcer.is_registered()
    }
}

impl BridgeInner {
    async fn handle_sync_request(&self, request: &WorkspaceSyncRequest) {
        let negotiation = {
            let mut session = self.session.write().await;
            self.registrar.handle_sync_request(&mut session, request)
        };
        let Some(negotiation) = negotiation else {
            return;
        };
        if let Err(e) = self.connection.send(&negotiation.response()).await {
            warn!(error = %e, "Failed to send workspace sync response");
        }
    }

    async fn handle_sync_complete(&self, complete: &WorkspaceSyncComplete) {
        {
            let mut session = self.session.write().await;
            self.registrar.handle_sync_complete(&mut session, complete);
        }
        self.connection.advance(ConnectionState::Paired);
        self.announcer.stop_heartbeat().await;
        self.announcer.register_capabilities();
        info!("Bridge fully operational - operations registered and workspace paired");
    }
}

#[async_trait]
impl RelayHandler for BridgeInner {
    async fn on_open(&self, connection: &RelayConnection) -> Result<(), BridgeError> {
        let register = {
            let mut fresh = self.registrar.begin()?;
            let register = self.registrar.register(&mut fresh);
            *self.session.write().await = fresh;
            register
        };
        connection.send(&register).await?;
        connection.advance(ConnectionState::Registered);
        self.announcer.start().await;
        Ok(())
    }

    async fn on_message(&self, message: InboundMessage) {
        match message {
            InboundMessage::Register => info!("Registration confirmed by relay"),
            InboundMessage::Response {
                request_id,
                response,
            } => {
                self.pending.resolve(&request_id, response).await;
            }
            InboundMessage::WorkspaceSyncRequest(request) => {
                self.handle_sync_request(&request).await;
            }
            InboundMessage::WorkspaceSyncComplete(complete) => {
                self.handle_sync_complete(&complete).await;
            }
            InboundMessage::PairingReady { is_reconnection } => {
                self.announcer.on_pairing_ready(is_reconnection).await;
            }
            InboundMessage::AutoRetryTrigger { reason } => {
                self.announcer.on_auto_retry(reason.as_deref()).await;
            }
            InboundMessage::ManualDisconnection => {
                self.announcer.on_manual_disconnection().await;
            }
            InboundMessage::Unknown => debug!("Ignoring unrecognized relay message"),
        }
    }

    async fn on_closed(&self) {
        let rejected = self.pending.reject_all("relay connection closed").await;
        if rejected > 0 {
            warn!(rejected, "Relay closed with requests outstanding");
        }
        self.announcer.stop().await;
        let mut session = self.session.write().await;
        session.registered = false;
        session.paired = false;
    }
}
