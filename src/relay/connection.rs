//! Relay Connection with Automatic Reconnection
//!
//! Single responsibility: own the one socket to the relay.
//!
//! # State machine
//!
//! ```text
//! Disconnected ─► Connecting ─► Open ─► Registered ─► Paired
//!                     ▲           │          │           │
//!                     │           ▼          ▼           ▼
//!                     └─(delay)── Closed ◄───────────────┘
//! ```
//!
//! # Reconnection Policy
//!
//! Every transition into `Closed` (dropped socket, failed attempt, timeout)
//! schedules exactly one new attempt after `reconnect_delay`, unless:
//! - an attempt is already `Connecting`/`Open`
//! - a reconnect is already scheduled
//! - the peer announced a manual disconnection (parks until the host reconnects)
//! - the host stopped the connection
//!
//! Attempts are serialized by a single in-flight flag, so a late `Closed`
//! event can never spawn a second concurrent attempt.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tracing::{debug, info, warn};

use super::protocol::{decode_frame, InboundMessage, OutboundMessage};
use super::transport::{self, WsStream};
use crate::error::BridgeError;

/// Lifecycle of the relay link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Registered,
    Paired,
    Closed,
}

impl ConnectionState {
    /// True while frames can be sent.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open | Self::Registered | Self::Paired)
    }
}

/// Current state plus the number of times the link has opened.
///
/// The epoch lets a waiter notice a close even if a reconnect already
/// happened by the time it looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub epoch: u64,
}

/// Receives the events of a relay connection.
#[async_trait]
pub trait RelayHandler: Send + Sync + 'static {
    /// The socket just opened; send the registration handshake.
    async fn on_open(&self, connection: &RelayConnection) -> Result<(), BridgeError>;

    /// One decoded inbound frame, in delivery order.
    async fn on_message(&self, message: InboundMessage);

    /// The socket is gone. Called once per opened or failed attempt.
    async fn on_closed(&self);
}

/// The single socket to the shared relay.
pub struct RelayConnection {
    url: String,
    connect_timeout: Duration,
    reconnect_delay: Duration,
    snapshot: watch::Sender<ConnectionSnapshot>,
    /// Outbound frames for the writer task of the live socket
    link: Mutex<Option<mpsc::UnboundedSender<String>>>,
    attempt_in_flight: AtomicBool,
    reconnect_scheduled: AtomicBool,
    parked: AtomicBool,
    stopped: AtomicBool,
    attempts: AtomicU64,
    shutdown: Notify,
}

impl RelayConnection {
    pub fn new(url: impl Into<String>, connect_timeout: Duration, reconnect_delay: Duration) -> Self {
        let (snapshot, _) = watch::channel(ConnectionSnapshot {
            state: ConnectionState::Disconnected,
            epoch: 0,
        });
        Self {
            url: url.into(),
            connect_timeout,
            reconnect_delay,
            snapshot,
            link: Mutex::new(None),
            attempt_in_flight: AtomicBool::new(false),
            reconnect_scheduled: AtomicBool::new(false),
            parked: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            attempts: AtomicU64::new(0),
            shutdown: Notify::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        *self.snapshot.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Number of connection attempts made so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Connect on behalf of the host.
    ///
    /// Resolves once the socket is open and the handshake was handed to the
    /// writer. Clears a previous stop or manual-disconnection park.
    pub async fn connect(self: &Arc<Self>, handler: Arc<dyn RelayHandler>) -> Result<(), BridgeError> {
        self.stopped.store(false, Ordering::SeqCst);
        self.parked.store(false, Ordering::SeqCst);
        self.attempt(handler).await
    }

    /// Serialize and transmit one frame.
    ///
    /// Returns the epoch of the link the frame was written to.
    pub async fn send(&self, message: &OutboundMessage) -> Result<u64, BridgeError> {
        let text = message.encode()?;
        let link = self.link.lock().await;
        // The link and the epoch only change together under this lock
        let snapshot = self.snapshot();
        if !snapshot.state.is_open() {
            return Err(BridgeError::NotConnected);
        }
        match link.as_ref() {
            Some(tx) => tx
                .send(text)
                .map(|()| snapshot.epoch)
                .map_err(|_| BridgeError::NotConnected),
            None => Err(BridgeError::NotConnected),
        }
    }

    /// Move between the open sub-states. Ignored unless the link is open.
    pub fn advance(&self, state: ConnectionState) {
        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.state.is_open() && state.is_open() && snapshot.state != state {
                snapshot.state = state;
                true
            } else {
                false
            }
        });
    }

    /// Skip the automatic reconnect after the next close.
    pub fn park(&self) {
        self.parked.store(true, Ordering::SeqCst);
    }

    /// Tear down for good: close the socket and cancel any pending reconnect.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        // Dropping the sender ends the writer, which closes the socket.
        self.link.lock().await.take();
    }

    /// Resolves once the link opened at `epoch` is no longer open.
    pub async fn lost(&self, epoch: u64) {
        let mut rx = self.snapshot.subscribe();
        let _ = rx
            .wait_for(|s| s.epoch != epoch || !s.state.is_open())
            .await;
    }

    fn set_state(&self, state: ConnectionState) {
        self.snapshot.send_modify(|snapshot| snapshot.state = state);
    }

    /// Install the writer side of a freshly opened socket.
    pub(crate) async fn install_link(&self, tx: mpsc::UnboundedSender<String>) {
        let mut link = self.link.lock().await;
        *link = Some(tx);
        self.snapshot.send_modify(|snapshot| {
            snapshot.state = ConnectionState::Open;
            snapshot.epoch += 1;
        });
    }

    fn attempt(self: &Arc<Self>, handler: Arc<dyn RelayHandler>) -> BoxFuture<'static, Result<(), BridgeError>> {
        let this = Arc::clone(self);
        Box::pin(async move { this.run_attempt(handler).await })
    }

    async fn run_attempt(self: Arc<Self>, handler: Arc<dyn RelayHandler>) -> Result<(), BridgeError> {
        if self.is_open() {
            return Ok(());
        }
        if self
            .attempt_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BridgeError::ConnectInProgress);
        }

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(ConnectionState::Connecting);
        info!(url = %self.url, attempt, "Connecting to relay");

        let opened = tokio::time::timeout(self.connect_timeout, transport::connect(&self.url)).await;
        let (sink, stream) = match opened {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => {
                warn!(error = %e, "Relay connection failed");
                self.handle_closed(&handler).await;
                return Err(e);
            }
            Err(_) => {
                warn!(timeout = ?self.connect_timeout, "Relay connection timed out");
                self.handle_closed(&handler).await;
                return Err(BridgeError::ConnectTimeout(self.connect_timeout));
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(transport::writer_loop(sink, rx));
        self.install_link(tx).await;
        info!(url = %self.url, "Relay connection open");

        if let Err(e) = handler.on_open(&self).await {
            warn!(error = %e, "Registration handshake failed");
            self.handle_closed(&handler).await;
            return Err(e);
        }

        let this = Arc::clone(&self);
        tokio::spawn(async move { this.read_loop(stream, handler).await });
        Ok(())
    }

    /// Dispatch inbound frames until the socket closes.
    async fn read_loop(self: Arc<Self>, mut stream: WsStream, handler: Arc<dyn RelayHandler>) {
        while let Some(text) = transport::next_text(&mut stream).await {
            if let Some(message) = decode_frame(&text) {
                debug!(kind = message.kind(), "Relay message");
                handler.on_message(message).await;
            }
        }
        info!("Relay connection closed");
        self.handle_closed(&handler).await;
    }

    /// Transition to `Closed`, notify the handler, maybe schedule a reconnect.
    pub(crate) async fn handle_closed(self: &Arc<Self>, handler: &Arc<dyn RelayHandler>) {
        {
            let mut link = self.link.lock().await;
            link.take();
            self.set_state(ConnectionState::Closed);
        }
        self.attempt_in_flight.store(false, Ordering::SeqCst);
        handler.on_closed().await;
        self.schedule_reconnect(handler);
    }

    /// Schedule one reconnect after the fixed delay. Returns whether it did.
    pub(crate) fn schedule_reconnect(self: &Arc<Self>, handler: &Arc<dyn RelayHandler>) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        if self.parked.swap(false, Ordering::SeqCst) {
            info!("Peer disconnected manually; waiting for the host to reconnect");
            return false;
        }
        if self.attempt_in_flight.load(Ordering::SeqCst) {
            debug!("Attempt already in flight; not scheduling another");
            return false;
        }
        if self.reconnect_scheduled.swap(true, Ordering::SeqCst) {
            return false;
        }

        let this = Arc::clone(self);
        let handler = Arc::clone(handler);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(this.reconnect_delay) => {}
                _ = this.shutdown.notified() => {}
            }
            this.reconnect_scheduled.store(false, Ordering::SeqCst);
            if this.stopped.load(Ordering::SeqCst) {
                return;
            }
            info!("Attempting to reconnect to relay");
            match this.attempt(handler).await {
                Ok(()) => info!("Reconnected to relay"),
                Err(BridgeError::ConnectInProgress) => {}
                Err(e) => warn!(error = %e, "Failed to reconnect to relay"),
            }
        });
        true
    }
}
