//! Per-coin client registry.
//!
//! A wallet talks to one Electrum server per coin. [`Networks`] keeps
//! exactly one [`ElectrumClient`] per coin key and picks the server from a
//! peer list when a coin is started.
//!
//! # Peer selection
//!
//! - `custom_peers` (user-configured) are tried in the given order
//! - otherwise `peers` are tried in random order, spreading load across
//!   public servers
//! - the first peer that connects and completes the handshake wins
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │               Networks               │
//! │  "bitcoin"  → ElectrumClient (ssl)   │
//! │  "litecoin" → ElectrumClient (tcp)   │
//! └──────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::client::ElectrumClient;
use crate::config::{ClientBuilder, ServerConfig};
use crate::error::{Error, Result};

// ============================================================================
// StartOptions
// ============================================================================

/// Candidate servers for one coin.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Public peers, tried in random order.
    pub peers: Vec<ServerConfig>,
    /// User-configured peers, tried in order before anything else.
    pub custom_peers: Vec<ServerConfig>,
}

impl StartOptions {
    /// Creates options from a public peer list.
    #[inline]
    #[must_use]
    pub fn new(peers: Vec<ServerConfig>) -> Self {
        Self {
            peers,
            custom_peers: Vec::new(),
        }
    }

    /// Sets user-configured peers. When non-empty, public peers are ignored.
    #[inline]
    #[must_use]
    pub fn with_custom_peers(mut self, custom_peers: Vec<ServerConfig>) -> Self {
        self.custom_peers = custom_peers;
        self
    }

    /// Returns the peers to try, in order.
    fn candidates(&self) -> Vec<ServerConfig> {
        if !self.custom_peers.is_empty() {
            return self.custom_peers.clone();
        }

        let mut peers = self.peers.clone();
        peers.shuffle(&mut rand::thread_rng());
        peers
    }
}

// ============================================================================
// Networks
// ============================================================================

/// Running client for one coin.
struct ActiveNetwork {
    server: ServerConfig,
    client: ElectrumClient,
}

/// One Electrum client per coin.
///
/// # Example
///
/// ```no_run
/// # use electrum_sync::{ElectrumClient, Networks, ServerConfig, StartOptions};
/// # async fn example() -> electrum_sync::Result<()> {
/// let networks = Networks::new(ElectrumClient::builder().client("my-wallet", "1.4"));
///
/// let peers = vec![
///     ServerConfig::tls("electrum.blockstream.info", 50002),
///     ServerConfig::tls("electrum.emzy.de", 50002),
/// ];
/// let server = networks.start("bitcoin", StartOptions::new(peers)).await?;
/// println!("bitcoin via {server}");
///
/// let client = networks.get("bitcoin").expect("started");
/// let tip = client.block_header(800_000).await?;
/// # Ok(())
/// # }
/// ```
pub struct Networks {
    /// Settings shared by every coin's client; the server is filled in per peer.
    template: ClientBuilder,
    /// Running clients by coin key.
    active: RwLock<FxHashMap<String, ActiveNetwork>>,
}

impl fmt::Debug for Networks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Networks")
            .field("coins", &self.coins())
            .finish_non_exhaustive()
    }
}

impl Networks {
    /// Creates an empty registry. `template` supplies everything but the server.
    #[inline]
    #[must_use]
    pub fn new(template: ClientBuilder) -> Self {
        Self {
            template,
            active: RwLock::new(FxHashMap::default()),
        }
    }

    /// Connects `coin` to the first reachable peer and returns that peer.
    ///
    /// Any client already running for `coin` is closed first.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no candidate peers were given
    /// - [`Error::Connection`] if no peer could be connected
    pub async fn start(&self, coin: &str, options: StartOptions) -> Result<ServerConfig> {
        let candidates = options.candidates();
        if candidates.is_empty() {
            return Err(Error::config(format!("No peers configured for {coin}")));
        }

        self.stop(coin);

        for server in &candidates {
            let client = self.template.clone().server(server.clone()).build()?;

            match client.connect().await {
                Ok(version) => {
                    info!(coin, %server, software = %version.software, "Network started");
                    self.active.write().insert(
                        coin.to_string(),
                        ActiveNetwork {
                            server: server.clone(),
                            client,
                        },
                    );
                    return Ok(server.clone());
                }
                Err(e) => {
                    warn!(coin, %server, error = %e, "Peer unavailable");
                    client.close();
                }
            }
        }

        Err(Error::connection(format!(
            "No reachable {coin} peer ({} tried)",
            candidates.len()
        )))
    }

    /// Returns the client for `coin`.
    #[must_use]
    pub fn get(&self, coin: &str) -> Option<ElectrumClient> {
        self.active.read().get(coin).map(|n| n.client.clone())
    }

    /// Returns the server `coin` is connected to.
    #[must_use]
    pub fn server(&self, coin: &str) -> Option<ServerConfig> {
        self.active.read().get(coin).map(|n| n.server.clone())
    }

    /// Closes and forgets the client for `coin`. Returns `false` if none was running.
    pub fn stop(&self, coin: &str) -> bool {
        let Some(network) = self.active.write().remove(coin) else {
            return false;
        };

        network.client.close();
        debug!(coin, server = %network.server, "Network stopped");
        true
    }

    /// Closes every client. Returns how many were running.
    pub fn stop_all(&self) -> usize {
        let stopped: Vec<_> = self.active.write().drain().collect();

        for (coin, network) in &stopped {
            network.client.close();
            debug!(%coin, server = %network.server, "Network stopped");
        }

        stopped.len()
    }

    /// Returns the started coin keys, sorted.
    #[must_use]
    pub fn coins(&self) -> Vec<String> {
        let mut coins: Vec<_> = self.active.read().keys().cloned().collect();
        coins.sort();
        coins
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::client::ConnectionState;
    use crate::client::mock::{self, MockConnector};
    use crate::config::PersistencePolicy;

    fn registry() -> (Networks, Arc<MockConnector>, tokio::sync::mpsc::UnboundedReceiver<mock::ServerHandle>) {
        let (connector, servers) = MockConnector::new(mock::electrumx());
        let template = ElectrumClient::builder()
            .connector(connector.clone())
            .persistence_policy(PersistencePolicy::new().with_max_retry(0));
        (Networks::new(template), connector, servers)
    }

    fn peer(host: &str) -> ServerConfig {
        ServerConfig::tcp(host, 50001)
    }

    #[tokio::test]
    async fn test_custom_peers_tried_in_order() {
        let (networks, connector, _servers) = registry();
        connector.refuse_host("custom-a");

        let chosen = networks
            .start(
                "bitcoin",
                StartOptions::new(vec![peer("public")])
                    .with_custom_peers(vec![peer("custom-a"), peer("custom-b"), peer("custom-c")]),
            )
            .await
            .expect("start");

        assert_eq!(chosen.host, "custom-b");
        assert_eq!(connector.dialed(), vec!["custom-a", "custom-b"]);
        assert!(networks.get("bitcoin").expect("client").is_connected());
        assert_eq!(networks.server("bitcoin").expect("server").host, "custom-b");
    }

    #[tokio::test]
    async fn test_public_peers_fall_through_to_reachable_one() {
        let (networks, connector, _servers) = registry();
        for host in ["p1", "p2", "p3"] {
            connector.refuse_host(host);
        }

        let chosen = networks
            .start(
                "litecoin",
                StartOptions::new(vec![peer("p1"), peer("p2"), peer("p3"), peer("p4")]),
            )
            .await
            .expect("start");

        assert_eq!(chosen.host, "p4");
        let mut dialed = connector.dialed();
        assert_eq!(dialed.pop().as_deref(), Some("p4"));
        dialed.sort();
        assert!(dialed.iter().all(|h| ["p1", "p2", "p3"].contains(&h.as_str())));
    }

    #[tokio::test]
    async fn test_no_reachable_peer() {
        let (networks, connector, _servers) = registry();
        connector.set_accept(false);

        let err = networks
            .start("bitcoin", StartOptions::new(vec![peer("p1"), peer("p2")]))
            .await
            .expect_err("unreachable");

        assert!(matches!(err, Error::Connection { .. }));
        assert!(networks.get("bitcoin").is_none());
    }

    #[tokio::test]
    async fn test_no_peers_is_config_error() {
        let (networks, _connector, _servers) = registry();
        let err = networks
            .start("bitcoin", StartOptions::default())
            .await
            .expect_err("no peers");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_restart_closes_previous_client() {
        let (networks, _connector, _servers) = registry();

        networks
            .start("bitcoin", StartOptions::new(vec![peer("first")]))
            .await
            .expect("first");
        let old = networks.get("bitcoin").expect("old");

        networks
            .start("bitcoin", StartOptions::new(vec![peer("second")]))
            .await
            .expect("second");

        assert_eq!(old.state(), ConnectionState::Closing);
        assert_eq!(networks.server("bitcoin").expect("server").host, "second");
        assert_eq!(networks.coins(), vec!["bitcoin"]);
    }

    #[tokio::test]
    async fn test_stop_and_stop_all() {
        let (networks, _connector, _servers) = registry();
        for coin in ["bitcoin", "litecoin", "testnet"] {
            networks
                .start(coin, StartOptions::new(vec![peer(coin)]))
                .await
                .expect("start");
        }
        assert_eq!(networks.coins(), vec!["bitcoin", "litecoin", "testnet"]);

        let litecoin = networks.get("litecoin").expect("client");
        assert!(networks.stop("litecoin"));
        assert!(!networks.stop("litecoin"));
        assert_eq!(litecoin.state(), ConnectionState::Closing);

        assert_eq!(networks.stop_all(), 2);
        assert!(networks.coins().is_empty());
    }
}
