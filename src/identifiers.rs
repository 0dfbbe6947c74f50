//! Type-safe identifiers.
//!
//! Newtype wrappers keep request ids and subscription handles from being
//! mixed up at compile time.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// RequestId
// ============================================================================

/// Numeric JSON-RPC request id.
///
/// Unique among the requests pending on one connection. Ids restart from 1
/// when a new connection is opened, so they may be reused once retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Creates a request id from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    #[inline]
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

/// Handle returned by the subscription router.
///
/// Pass it back to `unsubscribe` to remove exactly one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Creates a subscription id from a raw value.
    #[inline]
    #[must_use]
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_serializes_as_number() {
        let id = RequestId::new(42);
        assert_eq!(serde_json::to_string(&id).expect("serialize"), "42");

        let parsed: RequestId = serde_json::from_str("7").expect("parse");
        assert_eq!(parsed, RequestId::new(7));
    }

    #[test]
    fn test_display() {
        assert_eq!(RequestId::new(3).to_string(), "3");
        assert_eq!(SubscriptionId::new(9).to_string(), "sub-9");
    }
}
