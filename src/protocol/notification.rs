//! Server push notifications.
//!
//! Notifications are sent by the server without a matching request once a
//! `*.subscribe` call has been made.
//!
//! | Method | Params |
//! |--------|--------|
//! | `blockchain.headers.subscribe` | `[{"height": .., "hex": ..}]` |
//! | `blockchain.scripthash.subscribe` | `[scripthash, status]` |
//! | `server.peers.subscribe` | `[[ip, host, features], ..]` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Notification
// ============================================================================

/// An unsolicited message from the server.
///
/// # Format
///
/// ```json
/// {"jsonrpc": "2.0", "method": "blockchain.scripthash.subscribe", "params": ["8b01df4e...", "a1b2..."]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Method name the notification is keyed by.
    pub method: String,

    /// Notification payload.
    #[serde(default)]
    pub params: Value,
}

impl Notification {
    /// Creates a notification.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Returns the positional parameter at `index`.
    #[inline]
    #[must_use]
    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.as_array().and_then(|p| p.get(index))
    }

    /// Returns the first positional parameter as a string.
    ///
    /// For scripthash notifications this is the script hash.
    #[inline]
    #[must_use]
    pub fn first_str(&self) -> Option<&str> {
        self.param(0).and_then(Value::as_str)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scripthash_notification() {
        let n: Notification = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "method": "blockchain.scripthash.subscribe",
            "params": ["abcd", "status-hash"]
        }))
        .expect("parse");

        assert_eq!(n.first_str(), Some("abcd"));
        assert_eq!(n.param(1), Some(&json!("status-hash")));
        assert_eq!(n.param(2), None);
    }

    #[test]
    fn test_missing_params_default_to_null() {
        let n: Notification =
            serde_json::from_value(json!({"method": "server.peers.subscribe"})).expect("parse");
        assert!(n.params.is_null());
        assert_eq!(n.first_str(), None);
    }
}
