//! In-process transport.
//!
//! [`MemoryTransport::pair`] returns the local half, which plugs into a
//! connection like any other [`Transport`], and a [`MemoryPeer`] that plays
//! the remote end: it reads the requests the local side sent and pushes
//! responses and events back.
//!
//! # Example
//!
//! ```ignore
//! let (transport, peer) = MemoryTransport::pair();
//! let conn = Connection::open_with(async { Ok(transport) }, ConnectionConfig::new()).await?;
//!
//! tokio::spawn(async move {
//!     while let Some(request) = peer.recv_request().await {
//!         peer.respond(&request, json!({"ok": true}));
//!     }
//! });
//! ```

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tracing::trace;

use crate::error::{Error, Result};

use super::Transport;

// ============================================================================
// MemoryTransport
// ============================================================================

/// Local half of an in-process channel pair.
pub struct MemoryTransport {
    /// Frames towards the peer.
    outgoing: mpsc::UnboundedSender<String>,
    /// Frames from the peer.
    incoming: AsyncMutex<mpsc::UnboundedReceiver<String>>,
    /// Set once the local side closed.
    closed: watch::Sender<bool>,
}

impl MemoryTransport {
    /// Creates a connected transport/peer pair.
    #[must_use]
    pub fn pair() -> (Self, MemoryPeer) {
        let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel();
        let (to_local_tx, to_local_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        let transport = Self {
            outgoing: to_peer_tx,
            incoming: AsyncMutex::new(to_local_rx),
            closed: closed_tx,
        };

        let peer = MemoryPeer {
            to_local: Mutex::new(Some(to_local_tx)),
            from_local: AsyncMutex::new(to_peer_rx),
            closed: closed_rx,
        };

        (transport, peer)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: String) -> Result<()> {
        if *self.closed.borrow() {
            return Err(Error::ConnectionClosed);
        }
        trace!(len = frame.len(), "Memory frame sent");
        self.outgoing.send(frame).map_err(|_| Error::ConnectionClosed)
    }

    async fn receive(&self) -> Result<Option<String>> {
        let mut incoming = self.incoming.lock().await;
        let mut closed = self.closed.subscribe();

        if *closed.borrow_and_update() {
            return Ok(None);
        }

        tokio::select! {
            biased;
            frame = incoming.recv() => Ok(frame),
            _ = closed.wait_for(|closed| *closed) => Ok(None),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.send_replace(true);
        Ok(())
    }
}

// ============================================================================
// MemoryPeer
// ============================================================================

/// Remote half of an in-process channel pair.
///
/// All methods take `&self`, so the peer can be shared behind an `Arc`
/// between a reader task and test code pushing events.
pub struct MemoryPeer {
    /// Frames towards the local side; `None` once disconnected.
    to_local: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Frames sent by the local side.
    from_local: AsyncMutex<mpsc::UnboundedReceiver<String>>,
    /// Local close flag.
    closed: watch::Receiver<bool>,
}

impl MemoryPeer {
    /// Receives the next raw frame sent by the local side.
    ///
    /// Returns `None` once the local side closed or was dropped and every
    /// frame sent before that has been drained.
    pub async fn recv(&self) -> Option<String> {
        let mut from_local = self.from_local.lock().await;
        if let Ok(frame) = from_local.try_recv() {
            return Some(frame);
        }

        let mut closed = self.closed.clone();
        tokio::select! {
            biased;
            frame = from_local.recv() => frame,
            _ = closed.wait_for(|closed| *closed) => from_local.try_recv().ok(),
        }
    }

    /// Receives the next frame sent by the local side, parsed as JSON.
    ///
    /// Frames that are not valid JSON are skipped.
    pub async fn recv_request(&self) -> Option<Value> {
        loop {
            let frame = self.recv().await?;
            if let Ok(value) = serde_json::from_str(&frame) {
                return Some(value);
            }
        }
    }

    /// Pushes a raw frame to the local side.
    ///
    /// Returns `false` if the peer was disconnected or the local side is gone.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.to_local
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(frame.into()).is_ok())
    }

    /// Pushes a JSON frame to the local side.
    pub fn send_json(&self, value: &Value) -> bool {
        self.send(value.to_string())
    }

    /// Answers `request` with a success result.
    pub fn respond(&self, request: &Value, result: Value) -> bool {
        self.send_json(&json!({ "id": request["id"], "result": result }))
    }

    /// Answers `request` with a remote error.
    pub fn respond_error(&self, request: &Value, message: &str) -> bool {
        self.send_json(&json!({ "id": request["id"], "error": { "message": message } }))
    }

    /// Pushes an event frame.
    pub fn push_event(&self, method: &str, params: Value) -> bool {
        self.send_json(&json!({ "method": method, "params": params }))
    }

    /// Simulates the remote end hanging up.
    ///
    /// The local receive loop sees end of stream.
    pub fn disconnect(&self) {
        self.to_local.lock().take();
    }

    /// Returns `true` once the local side closed the transport.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

// ============================================================================
// Tests
// ============================================================================
