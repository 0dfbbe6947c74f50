//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`ElectrumClient`] instances.
//!
//! # Example
//!
//! ```no_run
//! use electrum_sync::{ElectrumClient, PersistencePolicy};
//!
//! # async fn example() -> electrum_sync::Result<()> {
//! let client = ElectrumClient::builder()
//!     .server_url("ssl://electrum.blockstream.info:50002")
//!     .client("my-wallet", "1.4")
//!     .persistence_policy(PersistencePolicy::new().with_max_retry(10))
//!     .build()?;
//!
//! let version = client.connect().await?;
//! println!("connected to {}", version.software);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::client::ElectrumClient;
use crate::error::{Error, Result};
use crate::transport::{Connector, TcpConnector};

use super::options::{ClientInfo, PersistencePolicy, ServerConfig, Timing};

// ============================================================================
// ClientSettings
// ============================================================================

/// Validated configuration handed to the client.
#[derive(Clone)]
pub(crate) struct ClientSettings {
    /// Server endpoint.
    pub server: ServerConfig,
    /// Handshake identity.
    pub client_info: ClientInfo,
    /// Reconnect policy.
    pub policy: PersistencePolicy,
    /// Timers.
    pub timing: Timing,
    /// Socket factory.
    pub connector: Arc<dyn Connector>,
    /// Re-issue server subscriptions after reconnect.
    pub resubscribe_on_reconnect: bool,
    /// Server understands JSON-RPC batch arrays.
    pub batch_requests: bool,
}

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring an [`ElectrumClient`].
///
/// Use [`ElectrumClient::builder()`] to create a new builder.
#[derive(Clone)]
pub struct ClientBuilder {
    /// Explicit endpoint.
    server: Option<ServerConfig>,
    /// Endpoint URL, parsed on build.
    server_url: Option<String>,
    /// Handshake identity.
    client_info: ClientInfo,
    /// Reconnect policy.
    policy: PersistencePolicy,
    /// Timers.
    timing: Timing,
    /// Socket factory override.
    connector: Option<Arc<dyn Connector>>,
    /// Re-issue server subscriptions after reconnect.
    resubscribe_on_reconnect: bool,
    /// Server understands JSON-RPC batch arrays.
    batch_requests: bool,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            server: None,
            server_url: None,
            client_info: ClientInfo::default(),
            policy: PersistencePolicy::default(),
            timing: Timing::default(),
            connector: None,
            resubscribe_on_reconnect: true,
            batch_requests: true,
        }
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("server", &self.server)
            .field("server_url", &self.server_url)
            .field("client_info", &self.client_info)
            .field("policy", &self.policy)
            .field("timing", &self.timing)
            .field("custom_connector", &self.connector.is_some())
            .field("resubscribe_on_reconnect", &self.resubscribe_on_reconnect)
            .field("batch_requests", &self.batch_requests)
            .finish()
    }
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a new builder with default settings and no server.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server endpoint.
    #[inline]
    #[must_use]
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.server = Some(server);
        self.server_url = None;
        self
    }

    /// Sets the server endpoint from a `tcp://` / `ssl://` URL.
    ///
    /// The URL is validated by [`build`](Self::build).
    #[inline]
    #[must_use]
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self.server = None;
        self
    }

    /// Sets the handshake client name and protocol version.
    #[inline]
    #[must_use]
    pub fn client(mut self, name: impl Into<String>, protocol_version: impl Into<String>) -> Self {
        self.client_info = ClientInfo::new(name, protocol_version);
        self
    }

    /// Sets the reconnect policy.
    #[inline]
    #[must_use]
    pub fn persistence_policy(mut self, policy: PersistencePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets all timers.
    #[inline]
    #[must_use]
    pub fn timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Replaces the socket factory.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Controls whether server subscriptions are re-issued after reconnect.
    #[inline]
    #[must_use]
    pub fn resubscribe_on_reconnect(mut self, enabled: bool) -> Self {
        self.resubscribe_on_reconnect = enabled;
        self
    }

    /// Controls whether `call_batch` uses JSON-RPC batch arrays.
    ///
    /// Disable for servers that reject batches; calls then go out individually.
    #[inline]
    #[must_use]
    pub fn batch_requests(mut self, enabled: bool) -> Self {
        self.batch_requests = enabled;
        self
    }

    /// Builds the client with validation. The client starts disconnected.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no server is set or the URL is invalid
    /// - [`Error::Config`] if a timer is zero
    pub fn build(self) -> Result<ElectrumClient> {
        Ok(ElectrumClient::from_settings(self.into_settings()?))
    }

    /// Validates and resolves the configuration.
    pub(crate) fn into_settings(self) -> Result<ClientSettings> {
        let server = self.validate_server()?;
        self.timing.validate()?;

        Ok(ClientSettings {
            server,
            client_info: self.client_info,
            policy: self.policy,
            timing: self.timing,
            connector: self
                .connector
                .unwrap_or_else(|| Arc::new(TcpConnector::default())),
            resubscribe_on_reconnect: self.resubscribe_on_reconnect,
            batch_requests: self.batch_requests,
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientBuilder {
    /// Resolves the server endpoint.
    fn validate_server(&self) -> Result<ServerConfig> {
        let server = match (&self.server, &self.server_url) {
            (Some(server), _) => server.clone(),
            (None, Some(url)) => ServerConfig::parse(url)?,
            (None, None) => {
                return Err(Error::config(
                    "Server is required. Use .server() or .server_url() to set it.\n\
                     Example: ElectrumClient::builder().server_url(\"ssl://host:50002\")",
                ));
            }
        };

        if server.host.trim().is_empty() {
            return Err(Error::config("Server host must not be empty"));
        }
        if server.port == 0 {
            return Err(Error::config("Server port must not be zero"));
        }

        Ok(server)
    }
}

// ============================================================================
// Tests
// ============================================================================
