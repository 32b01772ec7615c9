//! Relay Bridge
//!
//! Serves the prompt operations on stdio and forwards them through the
//! shared relay to the paired editor companion.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults: relay at ws://localhost:8547, workspace = working directory
//! relay-bridge
//!
//! # Explicit relay and workspace
//! MCP_ROUTER_PORT=9000 relay-bridge --workspace /path/to/project
//! ```
//!
//! stdout is reserved for the tool protocol; logs go to stderr.

use clap::Parser;
use relay_bridge::config::default_config_path;
use relay_bridge::stdio::serve_stdio;
use relay_bridge::{Bridge, BridgeConfig, ToolRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relay-bridge")]
#[command(about = "Workspace-paired prompt bridge for an editor companion")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Relay host
    #[arg(long, env = "MCP_ROUTER_HOST")]
    relay_host: Option<String>,

    /// Relay WebSocket port
    #[arg(long, env = "MCP_ROUTER_PORT")]
    relay_port: Option<u16>,

    /// Workspace identity; overrides VSCODE_WORKSPACE and MCP_WORKSPACE
    #[arg(long)]
    workspace: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs must never reach stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("relay_bridge=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path)?,
        None => {
            let path = default_config_path();
            if path.exists() {
                BridgeConfig::load(&path)?
            } else {
                BridgeConfig::default()
            }
        }
    };
    config.apply_env();

    // Apply CLI overrides
    if let Some(host) = args.relay_host {
        config.relay_host = host;
    }
    if let Some(port) = args.relay_port {
        config.relay_port = port;
    }
    if let Some(workspace) = args.workspace {
        config.workspace_override = Some(workspace);
    }

    info!(
        relay = %config.relay_url(),
        workspace = ?config.workspace_override,
        "Starting relay-bridge"
    );

    let registry = Arc::new(ToolRegistry::new());
    let bridge = Bridge::new(&config, registry.clone());

    // Keep serving without the relay; reconnection continues in the background
    if bridge.start().await.is_err() {
        info!("Continuing without relay - the editor companion may not be running");
    }

    serve_stdio(registry).await?;

    bridge.stop().await;
    info!("relay-bridge stopped");
    Ok(())
}
