//! Typed Electrum protocol methods.
//!
//! Thin wrappers over [`ElectrumClient::call`]. Results with a well-known
//! shape are decoded into the structs in [`types`](super::types); the rest
//! are returned as [`Value`].
//!
//! `*_batch` methods send one JSON-RPC batch array (or individual calls
//! when batching is disabled) and return one result per input, in input
//! order.

// ============================================================================
// Imports
// ============================================================================

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::Result;
use crate::identifiers::SubscriptionId;
use crate::protocol::Notification;
use crate::protocol::method::{address, block, blockchain, scripthash, server, transaction};

use super::lifecycle::ElectrumClient;
use super::types::{
    Balance, HeaderNotification, HistoryItem, MerkleProof, ServerVersion, Utxo, decode,
};

// ============================================================================
// ElectrumClient - server.*
// ============================================================================

impl ElectrumClient {
    /// Negotiates the protocol version again on the live connection.
    ///
    /// The handshake already runs on every connect; this is for callers
    /// that want to re-check what the server reports.
    pub async fn version(
        &self,
        client_name: &str,
        protocol_version: &str,
    ) -> Result<ServerVersion> {
        let result = self
            .call(server::VERSION, json!([client_name, protocol_version]))
            .await?;
        ServerVersion::from_value(result)
    }

    /// Returns the server banner.
    pub async fn banner(&self) -> Result<String> {
        self.call_typed(server::BANNER, json!([])).await
    }

    /// Pings the server.
    pub async fn ping(&self) -> Result<()> {
        self.call(server::PING, json!([])).await.map(drop)
    }

    /// Returns the operator's donation address.
    pub async fn donation_address(&self) -> Result<String> {
        self.call_typed(server::DONATION_ADDRESS, json!([])).await
    }

    /// Returns the server's peer list.
    pub async fn peers_subscribe(&self) -> Result<Value> {
        self.call(server::PEERS_SUBSCRIBE, json!([])).await
    }
}

// ============================================================================
// ElectrumClient - blockchain.scripthash.*
// ============================================================================

impl ElectrumClient {
    /// Returns the balance of a script hash.
    pub async fn scripthash_get_balance(&self, script_hash: &str) -> Result<Balance> {
        self.call_typed(scripthash::GET_BALANCE, json!([script_hash]))
            .await
    }

    /// Returns the confirmed and mempool history of a script hash.
    pub async fn scripthash_get_history(&self, script_hash: &str) -> Result<Vec<HistoryItem>> {
        self.call_typed(scripthash::GET_HISTORY, json!([script_hash]))
            .await
    }

    /// Returns the mempool transactions touching a script hash.
    pub async fn scripthash_get_mempool(&self, script_hash: &str) -> Result<Vec<HistoryItem>> {
        self.call_typed(scripthash::GET_MEMPOOL, json!([script_hash]))
            .await
    }

    /// Returns the unspent outputs of a script hash.
    pub async fn scripthash_listunspent(&self, script_hash: &str) -> Result<Vec<Utxo>> {
        self.call_typed(scripthash::LISTUNSPENT, json!([script_hash]))
            .await
    }

    /// Subscribes to status changes of `script_hash`.
    ///
    /// `handler` receives the new status (`None` when the script hash has
    /// no history) and only fires for this script hash. Returns the
    /// handler's id and the current status.
    ///
    /// # Errors
    ///
    /// Returns the call error; the handler is removed again in that case.
    pub async fn subscribe_scripthash<F>(
        &self,
        script_hash: &str,
        handler: F,
    ) -> Result<(SubscriptionId, Option<String>)>
    where
        F: Fn(Option<&str>) -> Result<()> + Send + Sync + 'static,
    {
        let watched = script_hash.to_string();
        let id = self.on_notification(scripthash::SUBSCRIBE, move |n: &Notification| {
            if n.first_str() != Some(watched.as_str()) {
                return Ok(());
            }
            handler(n.param(1).and_then(Value::as_str))
        });

        match self.call(scripthash::SUBSCRIBE, json!([script_hash])).await {
            Ok(status) => {
                debug!(%id, script_hash, "Subscribed to script hash");
                Ok((id, status.as_str().map(str::to_string)))
            }
            Err(e) => {
                self.unsubscribe(id);
                Err(e)
            }
        }
    }

    /// Cancels the server-side subscription for `script_hash`.
    ///
    /// Handlers registered for it stay in place until removed with
    /// [`unsubscribe`](Self::unsubscribe). Returns the server's answer.
    pub async fn unsubscribe_scripthash(&self, script_hash: &str) -> Result<bool> {
        let params = json!([script_hash]);
        self.forget_subscription(scripthash::SUBSCRIBE, &params);
        self.call_typed(scripthash::UNSUBSCRIBE, params).await
    }
}

// ============================================================================
// ElectrumClient - blockchain.address.*
// ============================================================================

impl ElectrumClient {
    /// Returns the balance of an address.
    pub async fn address_get_balance(&self, addr: &str) -> Result<Balance> {
        self.call_typed(address::GET_BALANCE, json!([addr])).await
    }

    /// Returns the history of an address.
    pub async fn address_get_history(&self, addr: &str) -> Result<Vec<HistoryItem>> {
        self.call_typed(address::GET_HISTORY, json!([addr])).await
    }

    /// Returns the mempool transactions touching an address.
    pub async fn address_get_mempool(&self, addr: &str) -> Result<Vec<HistoryItem>> {
        self.call_typed(address::GET_MEMPOOL, json!([addr])).await
    }

    /// Returns the proof for an address.
    pub async fn address_get_proof(&self, addr: &str) -> Result<Value> {
        self.call(address::GET_PROOF, json!([addr])).await
    }

    /// Returns the unspent outputs of an address.
    pub async fn address_listunspent(&self, addr: &str) -> Result<Vec<Utxo>> {
        self.call_typed(address::LISTUNSPENT, json!([addr])).await
    }

    /// Subscribes to status changes of an address. Returns the current status.
    pub async fn address_subscribe(&self, addr: &str) -> Result<Value> {
        self.call(address::SUBSCRIBE, json!([addr])).await
    }
}

// ============================================================================
// ElectrumClient - blocks and headers
// ============================================================================

impl ElectrumClient {
    /// Returns the header at `height` (legacy deserialized form).
    pub async fn block_get_header(&self, height: u64) -> Result<Value> {
        self.call(block::GET_HEADER, json!([height])).await
    }

    /// Returns the raw header at `height`, hex encoded.
    pub async fn block_header(&self, height: u64) -> Result<Value> {
        self.call(block::HEADER, json!([height])).await
    }

    /// Returns a chunk of 2016 raw headers, hex encoded.
    pub async fn block_get_chunk(&self, index: u64) -> Result<String> {
        self.call_typed(block::GET_CHUNK, json!([index])).await
    }

    /// Subscribes to new chain tips.
    ///
    /// `handler` receives every new tip. Returns the handler's id and the
    /// current tip.
    ///
    /// # Errors
    ///
    /// Returns the call error; the handler is removed again in that case.
    pub async fn subscribe_headers<F>(&self, handler: F) -> Result<(SubscriptionId, HeaderNotification)>
    where
        F: Fn(&HeaderNotification) -> Result<()> + Send + Sync + 'static,
    {
        let id = self.on_notification(blockchain::HEADERS_SUBSCRIBE, move |n: &Notification| {
            let header = decode(n.param(0).cloned().unwrap_or_default())?;
            handler(&header)
        });

        match self.call_typed(blockchain::HEADERS_SUBSCRIBE, json!([])).await {
            Ok(tip) => Ok((id, tip)),
            Err(e) => {
                self.unsubscribe(id);
                Err(e)
            }
        }
    }

    /// Subscribes to the block count (legacy servers).
    pub async fn numblocks_subscribe(&self) -> Result<Value> {
        self.call(blockchain::NUMBLOCKS_SUBSCRIBE, json!([])).await
    }
}

// ============================================================================
// ElectrumClient - fees
// ============================================================================

impl ElectrumClient {
    /// Estimated fee rate (coin/kB) to confirm within `blocks` blocks.
    ///
    /// The server answers `-1` when it has no estimate.
    pub async fn estimate_fee(&self, blocks: u32) -> Result<f64> {
        self.call_typed(blockchain::ESTIMATEFEE, json!([blocks]))
            .await
    }

    /// Minimum relay fee rate (coin/kB).
    pub async fn relay_fee(&self) -> Result<f64> {
        self.call_typed(blockchain::RELAYFEE, json!([])).await
    }
}

// ============================================================================
// ElectrumClient - transactions
// ============================================================================

impl ElectrumClient {
    /// Broadcasts a raw transaction. Returns its id.
    pub async fn transaction_broadcast(&self, raw_tx: &str) -> Result<String> {
        self.call_typed(transaction::BROADCAST, json!([raw_tx]))
            .await
    }

    /// Returns a transaction: raw hex, or a decoded object when `verbose`.
    pub async fn transaction_get(&self, tx_hash: &str, verbose: bool) -> Result<Value> {
        self.call(transaction::GET, json!([tx_hash, verbose])).await
    }

    /// Returns the merkle proof of a confirmed transaction.
    pub async fn transaction_get_merkle(&self, tx_hash: &str, height: u64) -> Result<MerkleProof> {
        self.call_typed(transaction::GET_MERKLE, json!([tx_hash, height]))
            .await
    }

    /// Returns the address that funded output `index` of `tx_hash` (legacy servers).
    pub async fn utxo_get_address(&self, tx_hash: &str, index: u32) -> Result<Value> {
        self.call(blockchain::UTXO_GET_ADDRESS, json!([tx_hash, index]))
            .await
    }
}

// ============================================================================
// ElectrumClient - batch arrays
// ============================================================================

impl ElectrumClient {
    /// Balances for many script hashes in one round trip.
    pub async fn scripthash_get_balance_batch(
        &self,
        script_hashes: &[String],
    ) -> Result<Vec<Result<Balance>>> {
        self.batch_typed(scripthash::GET_BALANCE, per_item(script_hashes))
            .await
    }

    /// Unspent outputs for many script hashes in one round trip.
    pub async fn scripthash_listunspent_batch(
        &self,
        script_hashes: &[String],
    ) -> Result<Vec<Result<Vec<Utxo>>>> {
        self.batch_typed(scripthash::LISTUNSPENT, per_item(script_hashes))
            .await
    }

    /// Histories for many script hashes in one round trip.
    pub async fn scripthash_get_history_batch(
        &self,
        script_hashes: &[String],
    ) -> Result<Vec<Result<Vec<HistoryItem>>>> {
        self.batch_typed(scripthash::GET_HISTORY, per_item(script_hashes))
            .await
    }

    /// Many transactions in one round trip.
    pub async fn transaction_get_batch(
        &self,
        tx_hashes: &[String],
        verbose: bool,
    ) -> Result<Vec<Result<Value>>> {
        let params = tx_hashes.iter().map(|h| json!([h, verbose])).collect();
        self.call_batch(transaction::GET, params).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

impl ElectrumClient {
    /// Calls `method` and decodes the result.
    async fn call_typed<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        decode(self.call(method, params).await?)
    }

    /// Batch-calls `method` and decodes each result.
    async fn batch_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Vec<Result<T>>> {
        let results = self.call_batch(method, params).await?;
        Ok(results
            .into_iter()
            .map(|result| result.and_then(decode))
            .collect())
    }
}

/// One single-argument parameter list per item.
fn per_item(items: &[String]) -> Vec<Value> {
    items.iter().map(|item| json!([item])).collect()
}

// ============================================================================
// Tests
// ============================================================================
