//! Classification of remote error objects.
//!
//! The remote protocol carries no structured error codes we can rely on,
//! so errors are sorted by substring heuristics on their text. All such
//! checks live here and nowhere else.
//!
//! Classification is ordered:
//!
//! 1. [`RemoteErrorKind::VersionMismatch`] - text contains an
//!    "unimplemented" marker.
//! 2. [`RemoteErrorKind::BenignClose`] - the target went away. Only when a
//!    close initiated by the local side was in flight do callers see an
//!    empty success; otherwise it is a generic error.
//! 3. [`RemoteErrorKind::Generic`] - anything else.

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Map, Value};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Markers meaning the remote end does not know the method.
///
/// Matched case-insensitively.
pub const UNIMPLEMENTED_MARKERS: &[&str] = &["wasn't found", "unimplemented", "not implemented"];

/// Markers meaning the target disappeared during a controlled close.
///
/// Matched case-insensitively.
pub const BENIGN_CLOSE_MARKERS: &[&str] = &["inspected target navigated or closed", "target closed"];

// ============================================================================
// RemoteErrorKind
// ============================================================================

/// Category assigned to a remote error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Remote end does not implement the method.
    VersionMismatch,
    /// Disconnect caused by the local side; treated as success.
    BenignClose,
    /// Any other remote failure.
    Generic,
}

/// Classifies a remote error message.
///
/// This is a heuristic on free text, not a protocol field.
#[must_use]
pub fn classify_remote_error(message: &str) -> RemoteErrorKind {
    let lowered = message.to_lowercase();

    if UNIMPLEMENTED_MARKERS.iter().any(|m| lowered.contains(m)) {
        return RemoteErrorKind::VersionMismatch;
    }

    if BENIGN_CLOSE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return RemoteErrorKind::BenignClose;
    }

    RemoteErrorKind::Generic
}

/// Translates a remote error message into the caller-visible outcome.
///
/// `close_in_flight` says whether the failed request was itself closing
/// the target. A benign close is an empty success only then.
///
/// # Errors
///
/// - [`Error::VersionMismatch`] for unimplemented methods
/// - [`Error::Remote`] for everything that is not a benign close
pub fn translate_remote_error(method: &str, message: String, close_in_flight: bool) -> Result<Value> {
    match classify_remote_error(&message) {
        RemoteErrorKind::VersionMismatch => Err(Error::version_mismatch(method, message)),
        RemoteErrorKind::BenignClose if close_in_flight => Ok(Value::Object(Map::new())),
        RemoteErrorKind::BenignClose | RemoteErrorKind::Generic => Err(Error::remote(message)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_version_mismatch() {
        assert_eq!(
            classify_remote_error("'Page.frobnicate' wasn't found"),
            RemoteErrorKind::VersionMismatch
        );
        assert_eq!(
            classify_remote_error("Method UNIMPLEMENTED"),
            RemoteErrorKind::VersionMismatch
        );
    }

    #[test]
    fn test_benign_close() {
        assert_eq!(
            classify_remote_error("Inspected target navigated or closed"),
            RemoteErrorKind::BenignClose
        );
        assert_eq!(
            classify_remote_error("Target closed."),
            RemoteErrorKind::BenignClose
        );
    }

    #[test]
    fn test_version_mismatch_wins_over_benign_close() {
        assert_eq!(
            classify_remote_error("target closed: method not implemented"),
            RemoteErrorKind::VersionMismatch
        );
    }

    #[test]
    fn test_translate() {
        let empty = translate_remote_error("Target.closeTarget", "Target closed".into(), true)
            .expect("benign close is success");
        assert_eq!(empty, Value::Object(Map::new()));

        let err =
            translate_remote_error("Page.foo", "'Page.foo' wasn't found".into(), true).unwrap_err();
        assert!(matches!(err, Error::VersionMismatch { ref method, .. } if method == "Page.foo"));

        let err = translate_remote_error("Page.navigate", "Cannot navigate".into(), false).unwrap_err();
        assert!(matches!(err, Error::Remote { ref message } if message == "Cannot navigate"));
    }

    #[test]
    fn test_target_closed_without_local_close_is_an_error() {
        let err = translate_remote_error("Runtime.evaluate", "Target closed".into(), false)
            .unwrap_err();
        assert!(matches!(err, Error::Remote { ref message } if message == "Target closed"));
    }

    proptest! {
        #[test]
        fn prop_text_without_markers_is_generic(message in "[a-df-mo-zA-DF-MO-Z0-9 :.,]{0,60}") {
            // Every marker contains an 'e' or an 'n'.
            prop_assert_eq!(classify_remote_error(&message), RemoteErrorKind::Generic);
        }
    }
}
