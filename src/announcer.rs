//! Capability announcer
//!
//! ## Overview
//!
//! The companion discovers our operations by polling its own host, and it
//! may reconnect on its own schedule. A single registration at a convenient
//! moment is therefore not enough; the announcer keeps the operation set
//! discoverable during the pairing window:
//!
//! 1. Registers the operation catalog with the host (idempotent)
//! 2. Emits `tools-available-heartbeat` while connected but unpaired
//! 3. Every Nth heartbeat, and on peer request, forces a re-registration
//!
//! ## Forced refresh
//!
//! ```text
//! (delay) clear registered ─► (delay) register again ─► tool-refresh-complete
//! ```

use futures_util::FutureExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::facade::RequestFacade;
use crate::operations::{catalog, OperationHandler, OperationHost};
use crate::relay::protocol::now_millis;
use crate::relay::{OutboundMessage, RelayConnection};
use crate::session::Session;

/// Delay between a refresh-triggering heartbeat and the refresh itself
const HEARTBEAT_REFRESH_DELAY: Duration = Duration::from_millis(200);

/// Offsets of the repeated refreshes after a reconnection announcement
const RECONNECTION_STAGGER_MS: [u64; 4] = [0, 500, 1000, 1500];

/// Delay before acting on `auto-retry-trigger`
const AUTO_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Announcer timing
#[derive(Debug, Clone)]
pub struct AnnouncerConfig {
    /// Interval between heartbeats
    pub heartbeat_interval: Duration,
    /// Force a refresh on every Nth heartbeat (0 disables)
    pub refresh_every: u64,
    /// Pause before each of the two refresh steps
    pub refresh_delay: Duration,
}

impl Default for AnnouncerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(2),
            refresh_every: 3,
            refresh_delay: Duration::from_millis(100),
        }
    }
}

impl From<&BridgeConfig> for AnnouncerConfig {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            refresh_every: config.refresh_every,
            refresh_delay: config.refresh_delay(),
        }
    }
}

/// Keeps the operation catalog visible to the host and the companion.
pub struct CapabilityAnnouncer {
    config: AnnouncerConfig,
    host: Arc<dyn OperationHost>,
    facade: RequestFacade,
    connection: Arc<RelayConnection>,
    session: Arc<RwLock<Session>>,
    registered: AtomicBool,
    sequence: AtomicU64,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    refreshes: Mutex<Vec<JoinHandle<()>>>,
}

impl CapabilityAnnouncer {
    pub fn new(
        config: AnnouncerConfig,
        host: Arc<dyn OperationHost>,
        facade: RequestFacade,
        connection: Arc<RelayConnection>,
        session: Arc<RwLock<Session>>,
    ) -> Self {
        Self {
            config,
            host,
            facade,
            connection,
            session,
            registered: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            heartbeat: Mutex::new(None),
            refreshes: Mutex::new(Vec::new()),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Heartbeats sent since the heartbeat was last started.
    pub fn heartbeats_sent(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Declare the catalog to the host unless already declared.
    ///
    /// Returns whether a registration actually happened.
    pub fn register_capabilities(&self) -> bool {
        if self.registered.swap(true, Ordering::SeqCst) {
            debug!("Operations already registered, skipping duplicate registration");
            return false;
        }

        for spec in catalog() {
            let kind = spec.kind;
            let facade = self.facade.clone();
            let handler: OperationHandler = Arc::new(move |arguments: Value| {
                let facade = facade.clone();
                async move {
                    let payload = kind.prepare_payload(&arguments)?;
                    let response = facade.invoke(kind, payload).await?;
                    Ok::<_, BridgeError>(kind.format_response(&response))
                }
                .boxed()
            });
            self.host.register_operation(spec, handler);
        }
        info!("All operations registered");
        true
    }

    /// Register and begin heartbeating; called when a socket opens.
    pub async fn start(self: &Arc<Self>) {
        self.register_capabilities();
        self.start_heartbeat().await;
    }

    /// Replace any running heartbeat with a fresh one.
    pub async fn start_heartbeat(self: &Arc<Self>) {
        let mut heartbeat = self.heartbeat.lock().await;
        if let Some(previous) = heartbeat.take() {
            previous.abort();
        }
        self.sequence.store(0, Ordering::SeqCst);
        let this = Arc::clone(self);
        *heartbeat = Some(tokio::spawn(async move { this.run_heartbeat().await }));
        drop(heartbeat);
        info!(
            interval = ?self.config.heartbeat_interval,
            "Started capability heartbeat for pairing"
        );
    }

    pub async fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.lock().await.take() {
            handle.abort();
            debug!("Capability heartbeat stopped");
        }
    }

    /// Cancel the heartbeat and every scheduled refresh.
    pub async fn stop(&self) {
        self.stop_heartbeat().await;
        for handle in self.refreshes.lock().await.drain(..) {
            handle.abort();
        }
    }

    async fn run_heartbeat(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let (workspace_id, session_id, paired) = {
                let session = self.session.read().await;
                (
                    session.workspace_id.clone(),
                    session.session_id.clone(),
                    session.paired,
                )
            };
            if paired {
                info!("Pairing complete - stopping capability heartbeat");
                break;
            }
            if !self.connection.is_open() {
                continue;
            }

            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            let beat = OutboundMessage::ToolsAvailableHeartbeat {
                workspace_id,
                session_id,
                timestamp: now_millis(),
                sequence,
            };
            if let Err(e) = self.connection.send(&beat).await {
                debug!(error = %e, "Heartbeat not sent");
                continue;
            }
            debug!(sequence, "Sent capability heartbeat");

            if self.config.refresh_every > 0 && sequence % self.config.refresh_every == 0 {
                debug!("Triggering refresh from heartbeat");
                self.schedule_refresh(HEARTBEAT_REFRESH_DELAY).await;
            }
        }
    }

    /// Clear the registration, register again, tell the relay it happened.
    pub async fn force_refresh(&self) {
        info!("Starting forced capability refresh");
        tokio::time::sleep(self.config.refresh_delay).await;
        self.registered.store(false, Ordering::SeqCst);

        tokio::time::sleep(self.config.refresh_delay).await;
        self.register_capabilities();

        if !self.connection.is_open() {
            return;
        }
        let (workspace_id, session_id) = {
            let session = self.session.read().await;
            (session.workspace_id.clone(), session.session_id.clone())
        };
        let complete = OutboundMessage::ToolRefreshComplete {
            workspace_id,
            session_id,
            timestamp: now_millis(),
        };
        match self.connection.send(&complete).await {
            Ok(_) => info!("Capability refresh complete"),
            Err(e) => warn!(error = %e, "Failed to send refresh complete"),
        }
    }

    /// Run [`force_refresh`](Self::force_refresh) after `after`.
    async fn schedule_refresh(self: &Arc<Self>, after: Duration) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            this.force_refresh().await;
        });
        let mut refreshes = self.refreshes.lock().await;
        refreshes.retain(|h| !h.is_finished());
        refreshes.push(handle);
    }

    /// Peer announced it is ready to pair.
    pub async fn on_pairing_ready(self: &Arc<Self>, is_reconnection: bool) {
        if is_reconnection {
            info!("Companion is pairing-ready (reconnection) - staggered refresh");
            for offset in RECONNECTION_STAGGER_MS {
                self.schedule_refresh(Duration::from_millis(offset)).await;
            }
        } else {
            info!("Companion is pairing-ready - refreshing capabilities");
            self.schedule_refresh(Duration::ZERO).await;
        }
    }

    /// Peer asked for re-registration.
    pub async fn on_auto_retry(self: &Arc<Self>, reason: Option<&str>) {
        info!(reason = reason.unwrap_or("unspecified"), "Auto-retry triggered");
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(AUTO_RETRY_DELAY).await;
            if this.connection.is_open() {
                this.force_refresh().await;
            }
        });
        self.refreshes.lock().await.push(handle);
    }

    /// Peer tore the pairing down on purpose; start the next connection clean.
    pub async fn on_manual_disconnection(&self) {
        info!("Manual disconnection - clearing capability state");
        self.registered.store(false, Ordering::SeqCst);
        self.stop().await;
        self.connection.park();
    }
}
