//! devtools-link - Request/response correlation and event dispatch over one
//! duplex channel.
//!
//! This library multiplexes many concurrent remote calls and unsolicited
//! push events over a single WebSocket (or any other [`Transport`]) in the
//! style of DevTools-like JSON protocols.
//!
//! # Architecture
//!
//! - **Requests**: each call gets a unique ID and its own wake-up channel;
//!   responses are matched by ID in any arrival order
//! - **Events**: push frames are routed to observers by method and run by a
//!   dedicated dispatcher task (blocking closures on tokio's blocking pool),
//!   never on the reading task
//! - **Waiters**: callers can suspend until an event method fires
//!
//! Key design principles:
//!
//! - One receive loop is the only reader of the transport
//! - Frames are decoded once into a [`Frame`] sum type
//! - Remote errors are classified in one place ([`classify_remote_error`])
//! - Every suspension point takes an explicit timeout
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use devtools_link::{Connection, ConnectionConfig, Result};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let conn = Connection::connect("ws://127.0.0.1:9222/devtools", ConnectionConfig::new()).await?;
//!
//!     conn.subscribe("Page.loadEventFired", |params| {
//!         println!("Page loaded: {params}");
//!         Ok(())
//!     });
//!
//!     let version = conn.send("Browser.getVersion", json!({}), Duration::from_secs(5)).await?;
//!     println!("Remote: {version}");
//!
//!     conn.destroy().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`connection`] | [`Connection`] facade and its configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire frame types and remote error classification |
//! | [`transport`] | [`Transport`] trait, WebSocket and in-memory transports |

// ============================================================================
// Modules
// ============================================================================

/// Connection facade.
///
/// Use [`Connection::connect`] for WebSocket endpoints or
/// [`Connection::open_with`] for any other transport.
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for requests and subscriptions.
pub mod identifiers;

/// Wire protocol frame types.
pub mod protocol;

/// Transport layer.
///
/// Duplex text-frame channels the connection runs over.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Connection types
pub use connection::{AsyncOutcome, Connection, ConnectionConfig, ConnectionState, EventStream};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{RequestId, SubscriptionId};

// Protocol types
pub use protocol::{
    ErrorInfo, Event, Frame, RemoteErrorKind, Request, Response, ResponseOutcome,
    classify_remote_error,
};

// Transport types
pub use transport::{MemoryPeer, MemoryTransport, Transport, WebSocketTransport};
