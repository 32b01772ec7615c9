//! Pending Request Table
//!
//! Single responsibility: correlate outbound request ids with the caller
//! waiting on them.
//!
//! There is no per-request timeout: an answer may take as long as
//! a human needs. Instead, every continuation is guaranteed to complete once,
//! either with the relay's response or with the failure passed to
//! [`PendingRequestTable::reject_all`] when the connection closes.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::error::BridgeError;

type Continuation = oneshot::Sender<Result<Value, BridgeError>>;

/// Fresh request identifier: 32 lowercase hex characters.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// The caller's half of a pending request.
#[derive(Debug)]
pub struct PendingResponse {
    id: String,
    rx: oneshot::Receiver<Result<Value, BridgeError>>,
}

impl PendingResponse {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the correlated response.
    pub async fn wait(self) -> Result<Value, BridgeError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::ConnectionLost(
                "request table dropped before a response arrived".into(),
            )),
        }
    }
}

/// In-memory map from request id to the waiting caller.
#[derive(Debug, Default)]
pub struct PendingRequestTable {
    pending: Mutex<HashMap<String, Continuation>>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a continuation under `id`. Fails if `id` is still live.
    pub async fn create(&self, id: &str) -> Result<PendingResponse, BridgeError> {
        let mut pending = self.pending.lock().await;
        if pending.contains_key(id) {
            return Err(BridgeError::DuplicateRequest(id.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(id.to_string(), tx);
        Ok(PendingResponse {
            id: id.to_string(),
            rx,
        })
    }

    /// Complete and remove the continuation for `id`.
    ///
    /// Returns false when `id` is unknown; late or duplicate responses are
    /// ignored.
    pub async fn resolve(&self, id: &str, response: Value) -> bool {
        let tx = self.pending.lock().await.remove(id);
        match tx {
            Some(tx) => {
                // The caller may have stopped waiting; nothing to do then.
                let _ = tx.send(Ok(response));
                true
            }
            None => {
                debug!(request_id = %id, "Ignoring response for unknown request");
                false
            }
        }
    }

    /// Drop the continuation for `id` without completing it.
    pub async fn remove(&self, id: &str) -> bool {
        self.pending.lock().await.remove(id).is_some()
    }

    /// Fail every outstanding continuation. Returns how many were pending.
    pub async fn reject_all(&self, reason: &str) -> usize {
        let drained: Vec<(String, Continuation)> = self.pending.lock().await.drain().collect();
        let count = drained.len();
        for (id, tx) in drained {
            debug!(request_id = %id, "Rejecting pending request");
            let _ = tx.send(Err(BridgeError::ConnectionLost(reason.to_string())));
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}
