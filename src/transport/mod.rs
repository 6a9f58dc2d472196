//! Transport layer.
//!
//! A [`Transport`] is a connected duplex channel of text frames. The
//! connection layer only ever calls [`Transport::receive`] from its single
//! receive loop; [`Transport::send`] may be called from any task.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Connection     │         Transport            │  Remote end     │
//! │                 │                              │                 │
//! │  send()  ───────┼─────────────────────────────►│                 │
//! │  receive loop ◄─┼──────────────────────────────┤  responses,     │
//! │                 │                              │  push events    │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `websocket` | WebSocket client transport |
//! | `memory` | In-process transport with a scriptable peer |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// In-process transport.
pub mod memory;

/// WebSocket client transport.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use memory::{MemoryPeer, MemoryTransport};
pub use websocket::WebSocketTransport;

// ============================================================================
// Transport
// ============================================================================

/// A connected duplex channel carrying text frames.
///
/// Implementations must be safe to share: `send` and `close` can race with
/// a `receive` that is already suspended.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Writes one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is broken or closed.
    async fn send(&self, frame: String) -> Result<()>;

    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` on clean end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    async fn receive(&self) -> Result<Option<String>>;

    /// Closes the channel.
    ///
    /// Calling it more than once must be harmless.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails.
    async fn close(&self) -> Result<()>;
}
