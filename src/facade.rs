//! Request facade
//!
//! The one call the embedding host makes: send a prompt to the companion and
//! wait for the human's answer.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::BridgeError;
use crate::operations::InputKind;
use crate::relay::{new_request_id, OutboundMessage, PendingRequestTable, RelayConnection};

/// Correlates outbound requests with inbound responses.
#[derive(Clone)]
pub struct RequestFacade {
    connection: Arc<RelayConnection>,
    pending: Arc<PendingRequestTable>,
}

impl RequestFacade {
    pub fn new(connection: Arc<RelayConnection>, pending: Arc<PendingRequestTable>) -> Self {
        Self {
            connection,
            pending,
        }
    }

    /// Send one request and wait for its response.
    ///
    /// Fails at once with [`BridgeError::NotConnected`] when the relay link is
    /// down; nothing is queued. While connected there is no timeout, but a
    /// close of the link the request went out on fails it immediately.
    pub async fn invoke(&self, kind: InputKind, payload: Value) -> Result<Value, BridgeError> {
        if !self.connection.is_open() {
            return Err(BridgeError::NotConnected);
        }

        let request_id = new_request_id();
        let pending = self.pending.create(&request_id).await?;

        let message = OutboundMessage::Request {
            request_id: request_id.clone(),
            input_kind: kind.as_str().to_string(),
            payload,
        };
        let epoch = match self.connection.send(&message).await {
            Ok(epoch) => epoch,
            Err(e) => {
                self.pending.remove(&request_id).await;
                return Err(e);
            }
        };
        info!(request_id = %request_id, kind = %kind, "Request sent to companion");

        tokio::select! {
            result = pending.wait() => result,
            _ = self.connection.lost(epoch) => {
                debug!(request_id = %request_id, "Link closed while waiting for response");
                self.pending.remove(&request_id).await;
                Err(BridgeError::ConnectionLost("relay connection closed".into()))
            }
        }
    }

    /// Number of requests still waiting on a response.
    pub async fn in_flight(&self) -> usize {
        self.pending.len().await
    }
}
