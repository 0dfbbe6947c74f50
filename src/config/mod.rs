//! Client configuration.
//!
//! Use [`ElectrumClient::builder()`](crate::ElectrumClient::builder) to
//! create a configured client instance.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Fluent [`ClientBuilder`] |
//! | `options` | Endpoint, handshake, policy and timer values |

// ============================================================================
// Submodules
// ============================================================================

/// Client builder.
pub mod builder;

/// Configuration values.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ClientBuilder;
pub(crate) use builder::ClientSettings;
pub use options::{
    ClientInfo, ExhaustedCallback, PersistencePolicy, Protocol, ServerConfig, Timing,
};
