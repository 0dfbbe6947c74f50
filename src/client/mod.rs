//! Electrum client layers.
//!
//! Each layer wraps the one below it and only exposes what the next layer
//! needs:
//!
//! ```text
//! ElectrumClient (lifecycle, api, batch)
//!   └─ Dispatcher (id correlation) ── SubscriptionRouter (pushes)
//!        └─ Transport (socket + line framing)
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `api` | Typed protocol methods on [`ElectrumClient`] |
//! | `batch` | Per-address fan-out queries |
//! | `dispatcher` | Request/response correlation |
//! | `lifecycle` | Connection state machine, keep-alive, retry |
//! | `router` | Notification fan-out by method |
//! | `types` | Typed response payloads |

// ============================================================================
// Submodules
// ============================================================================

/// Typed protocol methods.
pub mod api;

/// Batch query engine.
pub mod batch;

/// Request dispatcher.
pub mod dispatcher;

/// Connection lifecycle manager.
pub mod lifecycle;

/// Subscription router.
pub mod router;

/// Response payloads.
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use batch::{AddressDescriptor, BatchQuery, Settled, Tagged, TransactionRecord};
pub use dispatcher::Dispatcher;
pub use lifecycle::{ConnectionState, ElectrumClient};
pub use router::{NotificationHandler, SubscriptionRouter};
pub use types::{Balance, HeaderNotification, HistoryItem, MerkleProof, ServerVersion, Utxo};
