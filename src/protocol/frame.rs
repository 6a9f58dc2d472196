//! Incoming frame decoding.
//!
//! Every text frame read from the transport is decoded once, at the
//! boundary, into the [`Frame`] sum type. The rest of the crate matches on
//! it exhaustively instead of probing JSON fields.
//!
//! # Discrimination
//!
//! | Field present | Frame |
//! |---------------|-------|
//! | `id` (non-null) | [`Frame::Response`] |
//! | `method` (string), no `id` | [`Frame::Event`] |
//! | neither | [`Frame::Unrecognized`] |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

use super::remote_error::translate_remote_error;

// ============================================================================
// Frame
// ============================================================================

/// A decoded incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Reply to a prior request.
    Response(Response),
    /// Unsolicited push event.
    Event(Event),
    /// Valid JSON of no known shape.
    Unrecognized(Value),
}

impl Frame {
    /// Decodes a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the text is not valid JSON. Well-formed
    /// JSON of an unknown shape decodes to [`Frame::Unrecognized`].
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from_value(value))
    }

    /// Classifies an already-parsed JSON value.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut object) = value else {
            return Self::Unrecognized(value);
        };

        if let Some(id) = object.remove("id").filter(|id| !id.is_null()) {
            let Some(id) = id_to_string(&id) else {
                object.insert("id".to_string(), id);
                return Self::Unrecognized(Value::Object(object));
            };

            let outcome = match object.remove("error") {
                Some(error) if !error.is_null() => ResponseOutcome::Error(ErrorInfo::from_value(error)),
                _ => ResponseOutcome::Result(object.remove("result").unwrap_or(Value::Null)),
            };

            return Self::Response(Response { id, outcome });
        }

        match object.remove("method") {
            Some(Value::String(method)) => {
                let params = object.remove("params").unwrap_or(Value::Null);
                Self::Event(Event { method, params })
            }
            Some(other) => {
                object.insert("method".to_string(), other);
                Self::Unrecognized(Value::Object(object))
            }
            None => Self::Unrecognized(Value::Object(object)),
        }
    }
}

/// Renders a response ID as a string.
///
/// Numeric IDs are tolerated and compared by their decimal text.
fn id_to_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ============================================================================
// Response
// ============================================================================

/// A response frame.
///
/// # Format
///
/// Success:
/// ```json
/// { "id": "uuid", "result": { ... } }
/// ```
///
/// Error:
/// ```json
/// { "id": "uuid", "error": { "code": -32000, "message": "..." } }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Correlation ID as sent by the remote end.
    pub id: String,
    /// Result or error payload.
    pub outcome: ResponseOutcome,
}

/// Payload of a response frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// Success payload (`Null` when the frame had no `result`).
    Result(Value),
    /// Remote error object.
    Error(ErrorInfo),
}

impl ResponseOutcome {
    /// Converts the outcome into the value handed to the waiting caller.
    ///
    /// Remote errors are translated by
    /// [`translate_remote_error`](super::remote_error::translate_remote_error);
    /// `close_in_flight` is passed through to it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Remote`] or [`crate::Error::VersionMismatch`].
    pub fn into_result(self, method: &str, close_in_flight: bool) -> Result<Value> {
        match self {
            Self::Result(value) => Ok(value),
            Self::Error(info) => translate_remote_error(method, info.text(), close_in_flight),
        }
    }
}

// ============================================================================
// ErrorInfo
// ============================================================================

/// Error object carried by a response frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Numeric code, if the remote end sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,

    /// Human readable message.
    #[serde(default)]
    pub message: String,

    /// Extra detail, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorInfo {
    /// Builds an error object from whatever the remote end put under `error`.
    ///
    /// A bare string becomes the message. An object without a usable
    /// `message` keeps its JSON text as the message.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(message) => Self {
                message,
                ..Self::default()
            },
            Value::Object(object) if object.get("message").is_some_and(Value::is_string) => {
                let value = Value::Object(object);
                serde_json::from_value(value.clone()).unwrap_or_else(|_| Self {
                    message: value.to_string(),
                    ..Self::default()
                })
            }
            other => Self {
                message: other.to_string(),
                ..Self::default()
            },
        }
    }

    /// Full text used for classification and display.
    #[must_use]
    pub fn text(&self) -> String {
        match &self.data {
            Some(Value::String(data)) => format!("{}: {data}", self.message),
            Some(data) if !data.is_null() => format!("{}: {data}", self.message),
            _ => self.message.clone(),
        }
    }
}

// ============================================================================
// Event
// ============================================================================

/// An unsolicited push event.
///
/// # Format
///
/// ```json
/// { "method": "Domain.eventName", "params": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name.
    pub method: String,
    /// Event payload (`Null` when absent).
    #[serde(default)]
    pub params: Value,
}

impl Event {
    /// Creates an event.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Gets a string value from the params.
    ///
    /// Returns `None` if the key is missing or not a string.
    #[inline]
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

// ============================================================================
// Tests
// ============================================================================
