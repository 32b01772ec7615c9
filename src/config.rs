//! Configuration for relay-bridge

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::BridgeError;
use crate::workspace::MatchPolicy;

/// Environment variables checked (in order) for an explicit workspace identity.
pub const WORKSPACE_ENV_VARS: [&str; 2] = ["VSCODE_WORKSPACE", "MCP_WORKSPACE"];

/// Default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relay-bridge")
        .join("config.toml")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Relay host name
    #[serde(default = "default_relay_host")]
    pub relay_host: String,

    /// Relay WebSocket port
    #[serde(default = "default_relay_port")]
    pub relay_port: u16,

    /// Explicit workspace identity, used instead of the working directory
    #[serde(default)]
    pub workspace_override: Option<String>,

    /// Compare workspace paths case-insensitively
    #[serde(default = "default_fold_case")]
    pub fold_case: bool,

    /// Client type announced in the `register` handshake
    #[serde(default = "default_client_type")]
    pub client_type: String,

    /// How long `connect()` waits for the socket to open
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Delay between a close and the next connection attempt
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Heartbeat cadence while connected but unpaired
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Every Nth heartbeat also forces a capability refresh
    #[serde(default = "default_refresh_every")]
    pub refresh_every: u64,

    /// Pause between each step of the forced refresh sequence
    #[serde(default = "default_refresh_delay_ms")]
    pub refresh_delay_ms: u64,
}

fn default_relay_host() -> String {
    "localhost".to_string()
}

fn default_relay_port() -> u16 {
    8547
}

fn default_fold_case() -> bool {
    true
}

fn default_client_type() -> String {
    "mcp-server".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_heartbeat_interval_ms() -> u64 {
    2_000
}

fn default_refresh_every() -> u64 {
    3
}

fn default_refresh_delay_ms() -> u64 {
    100
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            relay_host: default_relay_host(),
            relay_port: default_relay_port(),
            workspace_override: None,
            fold_case: default_fold_case(),
            client_type: default_client_type(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            refresh_every: default_refresh_every(),
            refresh_delay_ms: default_refresh_delay_ms(),
        }
    }
}

impl BridgeConfig {
    /// Overlay whichever relay and workspace variables are set.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("MCP_ROUTER_HOST") {
            self.relay_host = host;
        }
        if let Some(port) = lookup("MCP_ROUTER_PORT").and_then(|p| p.parse().ok()) {
            self.relay_port = port;
        }
        if let Some(workspace) = WORKSPACE_ENV_VARS
            .iter()
            .filter_map(|key| lookup(*key))
            .find(|value| !value.trim().is_empty())
        {
            self.workspace_override = Some(workspace);
        }
    }

    /// Path matching policy for pairing decisions
    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy {
            fold_case: self.fold_case,
        }
    }

    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), BridgeError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| BridgeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// WebSocket URL of the relay
    pub fn relay_url(&self) -> String {
        format!("ws://{}:{}", self.relay_host, self.relay_port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }
}
