//! Relay Connection Module
//!
//! Everything between this process and the shared relay socket.
//!
//! # Architecture
//!
//! | Module       | Responsibility                                        |
//! |--------------|-------------------------------------------------------|
//! | `transport`  | WebSocket connect, single writer, text frame reader   |
//! | `protocol`   | JSON frame shapes for both directions                 |
//! | `pending`    | Request id to waiting caller correlation              |
//! | `connection` | Socket lifecycle and serialized reconnection          |
//!
//! # Key Design Principles
//!
//! ## 1. One Socket, One Writer
//!
//! - At most one connection attempt is in flight at any time
//! - All outbound frames go through one writer task per socket
//!
//! ## 2. Every Caller Gets an Answer
//!
//! - A pending request completes exactly once
//! - Closing the socket fails every request still waiting on it
//!
//! ## 3. Events, Not Polling
//!
//! - Inbound frames are pushed to a [`RelayHandler`] in delivery order
//! - Connection state is published on a `watch` channel

// Internal modules - not exposed publicly
mod transport;

// Public modules
pub mod connection;
pub mod pending;
pub mod protocol;

pub use connection::{ConnectionSnapshot, ConnectionState, RelayConnection, RelayHandler};
pub use pending::{new_request_id, PendingRequestTable, PendingResponse};
pub use protocol::{InboundMessage, OutboundMessage};
