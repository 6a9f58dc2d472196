//! Wire protocol message types.
//!
//! This module defines the logical frame format exchanged with the remote
//! end. Payload bodies are opaque [`serde_json::Value`]s.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Shape |
//! |--------------|-----------|-------|
//! | `Request` | Local → Remote | `{id, method, params}` |
//! | `Response` | Remote → Local | `{id, result}` or `{id, error}` |
//! | `Event` | Remote → Local | `{method, params}` |
//!
//! Presence of `id` versus `method` is the sole discriminator.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Incoming frame decoding |
//! | `remote_error` | Remote error classification |
//! | `request` | Outgoing request type |

// ============================================================================
// Submodules
// ============================================================================

/// Incoming frame decoding.
pub mod frame;

/// Remote error classification heuristics.
pub mod remote_error;

/// Outgoing request type.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{ErrorInfo, Event, Frame, Response, ResponseOutcome};
pub use remote_error::{RemoteErrorKind, classify_remote_error, translate_remote_error};
pub use request::Request;
