//! Receive loop.
//!
//! The only reader of the transport. Every incoming frame is decoded once
//! and routed:
//!
//! | Frame | Destination |
//! |-------|-------------|
//! | Response | [`RequestTable::resolve`](super::requests::RequestTable::resolve) |
//! | Event | event bus (scheduled on the dispatcher) and method waiters |
//! | Unrecognized / invalid JSON | logged and dropped |
//!
//! Routing never awaits: responses are handed over through per-request
//! channels and observer callbacks only get queued.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::error::Error;
use crate::protocol::Frame;
use crate::transport::Transport;

use super::Shared;

// ============================================================================
// Loop
// ============================================================================

/// Reads and routes frames until the transport ends or shutdown is
/// requested.
pub(super) async fn run(shared: &Shared, transport: &Arc<dyn Transport>) {
    let mut state = shared.state.subscribe();

    loop {
        tokio::select! {
            biased;

            _ = state.wait_for(|s| s.is_terminating()) => {
                debug!("Receive loop stopping on shutdown request");
                break;
            }

            received = transport.receive() => match received {
                Ok(Some(text)) => route(shared, &text),
                Ok(None) => {
                    debug!("Transport closed by remote");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Transport read failed");
                    break;
                }
            },
        }
    }

    debug!("Receive loop terminated");
}

/// Routes one text frame.
pub(super) fn route(shared: &Shared, text: &str) {
    let frame = match Frame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            let anomaly = Error::protocol(format!("undecodable frame: {e}"));
            warn!(error = %anomaly, text = %text, "Discarding frame");
            return;
        }
    };

    match frame {
        Frame::Response(response) => {
            trace!(id = %response.id, "Response received");
            shared.requests.resolve(&response.id, response.outcome);
        }

        Frame::Event(event) => {
            trace!(method = %event.method, "Event received");
            shared.waiters.observe(&event.method);
            shared.events.publish(event, &shared.dispatcher);
        }

        Frame::Unrecognized(value) => {
            let anomaly = Error::protocol("frame has neither id nor method");
            warn!(error = %anomaly, frame = %value, "Discarding frame");
        }
    }
}
