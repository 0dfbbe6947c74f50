//! Electrum method names organized by module.
//!
//! Methods follow the `module.method` (or `module.sub.method`) format.
//!
//! # Method Modules
//!
//! | Module | Methods |
//! |--------|---------|
//! | `server` | Handshake, banner, ping, peers |
//! | `blockchain.scripthash` | Balance, history, mempool, UTXOs, subscription |
//! | `blockchain.address` | Legacy address-keyed variants |
//! | `blockchain.block` | Headers and header chunks |
//! | `blockchain.transaction` | Broadcast, fetch, merkle proofs |
//! | `blockchain` | Fee estimation, header subscription |

/// `server.*` methods.
pub mod server {
    /// Protocol version negotiation; first call on every connection.
    pub const VERSION: &str = "server.version";
    /// Server banner text.
    pub const BANNER: &str = "server.banner";
    /// No-op liveness probe.
    pub const PING: &str = "server.ping";
    /// Server operator donation address.
    pub const DONATION_ADDRESS: &str = "server.donation_address";
    /// Known peer list.
    pub const PEERS_SUBSCRIBE: &str = "server.peers.subscribe";
}

/// `blockchain.scripthash.*` methods.
pub mod scripthash {
    /// Confirmed and unconfirmed balance.
    pub const GET_BALANCE: &str = "blockchain.scripthash.get_balance";
    /// Confirmed and mempool history.
    pub const GET_HISTORY: &str = "blockchain.scripthash.get_history";
    /// Mempool-only history.
    pub const GET_MEMPOOL: &str = "blockchain.scripthash.get_mempool";
    /// Unspent outputs.
    pub const LISTUNSPENT: &str = "blockchain.scripthash.listunspent";
    /// Status-change subscription.
    pub const SUBSCRIBE: &str = "blockchain.scripthash.subscribe";
    /// Cancels a status-change subscription (protocol 1.4.2).
    pub const UNSUBSCRIBE: &str = "blockchain.scripthash.unsubscribe";
}

/// `blockchain.address.*` methods (deprecated by the protocol, still served by older servers).
pub mod address {
    /// Confirmed and unconfirmed balance.
    pub const GET_BALANCE: &str = "blockchain.address.get_balance";
    /// Confirmed and mempool history.
    pub const GET_HISTORY: &str = "blockchain.address.get_history";
    /// Mempool-only history.
    pub const GET_MEMPOOL: &str = "blockchain.address.get_mempool";
    /// Address proof.
    pub const GET_PROOF: &str = "blockchain.address.get_proof";
    /// Unspent outputs.
    pub const LISTUNSPENT: &str = "blockchain.address.listunspent";
    /// Status-change subscription.
    pub const SUBSCRIBE: &str = "blockchain.address.subscribe";
}

/// `blockchain.block.*` methods.
pub mod block {
    /// Deserialized header at a height (legacy).
    pub const GET_HEADER: &str = "blockchain.block.get_header";
    /// Raw header hex at a height.
    pub const HEADER: &str = "blockchain.block.header";
    /// Chunk of 2016 headers (legacy).
    pub const GET_CHUNK: &str = "blockchain.block.get_chunk";
}

/// `blockchain.transaction.*` methods.
pub mod transaction {
    /// Broadcast a raw transaction.
    pub const BROADCAST: &str = "blockchain.transaction.broadcast";
    /// Raw or verbose transaction.
    pub const GET: &str = "blockchain.transaction.get";
    /// Merkle branch for a confirmed transaction.
    pub const GET_MERKLE: &str = "blockchain.transaction.get_merkle";
}

/// Remaining `blockchain.*` methods.
pub mod blockchain {
    /// Fee estimate for confirmation within N blocks.
    pub const ESTIMATEFEE: &str = "blockchain.estimatefee";
    /// Minimum relay fee.
    pub const RELAYFEE: &str = "blockchain.relayfee";
    /// Chain tip subscription.
    pub const HEADERS_SUBSCRIBE: &str = "blockchain.headers.subscribe";
    /// Block count subscription (legacy).
    pub const NUMBLOCKS_SUBSCRIBE: &str = "blockchain.numblocks.subscribe";
    /// Address owning an outpoint (legacy).
    pub const UTXO_GET_ADDRESS: &str = "blockchain.utxo.get_address";
}

/// Returns `true` if `method` opens a server-side subscription.
///
/// Such calls are remembered by the client and re-issued after a reconnect.
/// `server.peers.subscribe` is a plain query despite its name: servers never
/// push peer updates.
#[inline]
#[must_use]
pub fn is_subscription(method: &str) -> bool {
    method.ends_with(".subscribe") && method != server::PEERS_SUBSCRIBE
}

// ============================================================================
// Tests
// ============================================================================
