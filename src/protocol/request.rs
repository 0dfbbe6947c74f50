//! Request and Response message types.
//!
//! Defines the JSON-RPC 2.0 framing used on the Electrum wire. Each message
//! is one JSON value on one line; batches are JSON arrays.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::Notification;

// ============================================================================
// Constants
// ============================================================================

/// JSON-RPC version tag carried by every request.
pub const JSONRPC_VERSION: &str = "2.0";

// ============================================================================
// Request
// ============================================================================

/// A call from the client to the server.
///
/// # Format
///
/// ```json
/// {"jsonrpc": "2.0", "id": 7, "method": "blockchain.scripthash.get_balance", "params": ["8b01df4e..."]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version tag.
    pub jsonrpc: String,

    /// Correlation id.
    pub id: RequestId,

    /// Method name, e.g. `server.version`.
    pub method: String,

    /// Positional parameters.
    pub params: Value,
}

impl Request {
    /// Creates a new request.
    ///
    /// A non-array `params` value is wrapped in a one-element array, and
    /// `null` becomes an empty array.
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Array(_) => params,
            Value::Null => Value::Array(Vec::new()),
            other => Value::Array(vec![other]),
        };

        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// A reply from the server to one request.
///
/// Exactly one of `result` / `error` is meaningful. ElectrumX sends
/// `{"code": .., "message": ..}` error objects, some older servers send a
/// bare string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    /// Matches the request `id`.
    pub id: RequestId,

    /// Result payload (if success).
    #[serde(default)]
    pub result: Option<Value>,

    /// Error payload (if error).
    #[serde(default)]
    pub error: Option<Value>,
}

impl Response {
    /// Returns `true` if the server reported an error.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self.error, Some(ref e) if !e.is_null())
    }

    /// Extracts the result value, converting a server error into [`Error::Server`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Server`] if the response carried an error.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) if !error.is_null() => Err(server_error(&error)),
            _ => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Converts a JSON-RPC error payload into a crate error.
fn server_error(error: &Value) -> Error {
    match error {
        Value::String(message) => Error::server(0, message.clone()),
        Value::Object(map) => {
            let code = map.get("code").and_then(Value::as_i64).unwrap_or_default();
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            Error::server(code, message)
        }
        other => Error::server(0, other.to_string()),
    }
}

// ============================================================================
// Incoming
// ============================================================================

/// A decoded message from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Reply to a request issued by this client.
    Response(Response),
    /// Unsolicited push (subscription update).
    Notification(Notification),
}

impl Incoming {
    /// Classifies one decoded JSON value.
    ///
    /// Anything carrying a `method` is a notification; anything else must
    /// be a response with an `id`. Batch replies arrive as arrays and are
    /// flattened by [`Incoming::parse_line`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when the value fits neither shape.
    pub fn from_value(value: Value) -> Result<Self> {
        if value.get("method").is_some_and(Value::is_string) {
            let notification: Notification = serde_json::from_value(value)?;
            return Ok(Self::Notification(notification));
        }

        if value.get("id").is_some_and(|id| !id.is_null()) {
            let response: Response = serde_json::from_value(value)?;
            return Ok(Self::Response(response));
        }

        Err(Error::protocol(format!("Unrecognised message: {value}")))
    }

    /// Decodes one newline-delimited frame into zero or more messages.
    ///
    /// Batch arrays yield one entry per element; each element is classified
    /// independently so one bad element does not poison its siblings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the frame is not valid JSON.
    pub fn parse_line(line: &str) -> Result<Vec<Result<Self>>> {
        let value: Value = serde_json::from_str(line)?;
        Ok(match value {
            Value::Array(items) => items.into_iter().map(Self::from_value).collect(),
            single => vec![Self::from_value(single)],
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
