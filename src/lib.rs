//! Electrum sync - Electrum protocol client for wallet synchronization.
//!
//! This library speaks newline-delimited JSON-RPC 2.0 to Electrum servers
//! (ElectrumX, Fulcrum, electrs) over plain TCP or TLS, keeps the
//! connection alive, and fans wallet queries out over many addresses.
//!
//! # Architecture
//!
//! Each layer wraps the one below it:
//!
//! - **Transport**: one socket, line framing, message in / message out
//! - **Dispatcher**: request ids, pending table, response correlation
//! - **Router**: server pushes delivered to method-keyed handlers
//! - **Lifecycle**: connect, handshake, keep-alive, retry, exhaustion
//! - **Batch**: per-address fan-out with results tagged by address
//!
//! Key design principles:
//!
//! - Responses are matched by id, never by arrival order
//! - A dropped connection rejects every pending call exactly once
//! - Only the lifecycle supervisor changes [`ConnectionState`]
//! - Notification handlers survive reconnects
//!
//! # Quick Start
//!
//! ```no_run
//! use electrum_sync::{AddressDescriptor, ElectrumClient, PersistencePolicy, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = ElectrumClient::builder()
//!         .server_url("ssl://electrum.blockstream.info:50002")
//!         .persistence_policy(PersistencePolicy::new().with_max_retry(10))
//!         .build()?;
//!
//!     let version = client.connect().await?;
//!     println!("Connected to {}", version.software);
//!
//!     let wallet = vec![AddressDescriptor::new("8b01df4e...", "bc1q...", "m/84'/0'/0'/0/0")];
//!     for row in client.batch().balances(&wallet).await {
//!         println!("{}: {}", row.descriptor.address, row.data.confirmed);
//!     }
//!
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`ElectrumClient`], dispatcher, router, batch queries |
//! | [`config`] | Builder, endpoints, retry policy, timers |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`network`] | One client per coin, peer selection |
//! | [`protocol`] | JSON-RPC message types and method names |
//! | [`transport`] | Socket connectors and line framing |

// ============================================================================
// Modules
// ============================================================================

/// Electrum client layers.
///
/// - [`ElectrumClient`] - connection handle with typed methods
/// - [`BatchQuery`] - per-address fan-out
/// - [`SubscriptionRouter`] - notification handlers
pub mod client;

/// Client configuration.
///
/// Use [`ElectrumClient::builder()`] to create a configured client instance.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Per-coin client registry.
pub mod network;

/// JSON-RPC message types.
pub mod protocol;

/// Socket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{
    AddressDescriptor, Balance, BatchQuery, ConnectionState, ElectrumClient, HeaderNotification,
    HistoryItem, MerkleProof, NotificationHandler, ServerVersion, Settled, SubscriptionRouter,
    Tagged, TransactionRecord, Utxo,
};

// Configuration types
pub use config::{
    ClientBuilder, ClientInfo, ExhaustedCallback, PersistencePolicy, Protocol, ServerConfig,
    Timing,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{RequestId, SubscriptionId};

// Network registry
pub use network::{Networks, StartOptions};

// Protocol types
pub use protocol::Notification;

// Transport types
pub use transport::{Connector, TcpConnector};
