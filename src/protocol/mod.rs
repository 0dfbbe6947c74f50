//! Electrum wire message types.
//!
//! This module defines the message format exchanged with an Electrum
//! server: JSON-RPC 2.0 values, one per line.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Client → Server | Method call with positional params |
//! | `Response` | Server → Client | `result` or `error` for one request id |
//! | `Notification` | Server → Client | Subscription push, no id |
//!
//! Requests may be sent as a JSON array (batch); the server answers with
//! an array of responses in arbitrary order.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `method` | Method name constants by module |
//! | `notification` | Notification type |
//! | `request` | Request, Response and incoming classification |

// ============================================================================
// Submodules
// ============================================================================

/// Method name constants.
pub mod method;

/// Notification message type.
pub mod notification;

/// Request and Response message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use notification::Notification;
pub use request::{Incoming, JSONRPC_VERSION, Request, Response};
