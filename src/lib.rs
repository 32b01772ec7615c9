//! Relay Bridge - workspace-paired prompts for an editor companion
//!
//! Connects to a shared local relay, pairs with the one editor companion that
//! has the same workspace open, and forwards human prompts to it.
//!
//! ## Architecture
//!
//! ```text
//! host ─► RequestFacade ─► PendingRequestTable + RelayConnection ─► relay ─► companion
//! host ◄─ PendingRequestTable ◄─ RelayConnection ◄─ relay ◄──────────────── companion
//! ```
//!
//! | Component | Role |
//! |-----------|------|
//! | `relay` | The socket, its wire format, request correlation |
//! | `session` | Identity on the relay and pairing decisions |
//! | `workspace` | Path normalization and relatedness |
//! | `announcer` | Heartbeat and forced re-registration while pairing |
//! | `facade` | The single request/response call |
//! | `bridge` | Owns all of the above, dispatches relay events |
//! | `stdio` | MCP tool server for the embedding client |
//!
//! ## Pairing
//!
//! Two processes pair when their workspace paths are related: equal after
//! normalization, or one an ancestor directory of the other. The companion's
//! path wins.

pub mod announcer;
pub mod bridge;
pub mod config;
pub mod error;
pub mod facade;
pub mod operations;
pub mod relay;
pub mod session;
pub mod stdio;
pub mod workspace;

// Re-exports
pub use announcer::{AnnouncerConfig, CapabilityAnnouncer};
pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use facade::RequestFacade;
pub use operations::{InputKind, OperationHandler, OperationHost, OperationSpec};
pub use relay::{ConnectionSnapshot, ConnectionState, RelayConnection};
pub use session::{Session, SessionRegistrar};
pub use stdio::ToolRegistry;
pub use workspace::{normalize, related, MatchPolicy, NormalizedPath, WorkspacePath};
