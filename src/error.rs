//! Error types for relay-bridge

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Interactive companion not connected. Ensure the editor extension is installed and the relay is running.")]
    NotConnected,

    #[error("A relay connection attempt is already in progress")]
    ConnectInProgress,

    #[error("Relay connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Relay connection lost: {0}")]
    ConnectionLost(String),

    #[error("Request id already pending: {0}")]
    DuplicateRequest(String),

    #[error("Invalid workspace path: {0}")]
    InvalidWorkspace(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation error: {0}")]
    Operation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// True for errors caused by the relay link rather than by the caller.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::ConnectInProgress
                | Self::ConnectTimeout(_)
                | Self::Transport(_)
                | Self::ConnectionLost(_)
        )
    }
}
