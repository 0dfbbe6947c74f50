//! Socket transport layer.
//!
//! This module owns the byte stream between the client and one Electrum
//! server and exposes messages in / frames out as its only vocabulary.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Dispatcher     │                              │  Electrum       │
//! │                 │     TCP / TLS, one JSON      │  server         │
//! │  Transport      │◄────────────────────────────►│                 │
//! │  → I/O loop     │      value per line          │  (ElectrumX,    │
//! │                 │                              │   Fulcrum, ..)  │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connector::connect` - Dial TCP, optionally wrap in TLS
//! 2. `Transport::open` - Spawn the I/O loop over the socket
//! 3. `Transport::send` - Queue outgoing frames
//! 4. Inbound channel - Receive decoded responses/notifications
//! 5. `Transport::close` - Shut the socket; the inbound channel ends
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Framing and I/O loop |
//! | `stream` | Socket connectors (plain/TLS) |

// ============================================================================
// Submodules
// ============================================================================

/// Framing and I/O loop.
pub mod connection;

/// Socket connectors.
pub mod stream;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{InboundReceiver, Transport};
pub use stream::{BoxedSocket, Connector, Socket, TcpConnector};
