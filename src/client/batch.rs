//! Batch query engine.
//!
//! Runs the same protocol method for many wallet addresses at once and
//! tags every result with the [`AddressDescriptor`] it belongs to.
//!
//! One call is issued per descriptor, all in flight together (optionally
//! bounded by [`BatchQuery::with_concurrency`]). Outputs follow input
//! order regardless of response arrival order.
//!
//! # Failure handling
//!
//! | Method | Failed descriptor |
//! |--------|-------------------|
//! | [`fetch_many_settled`](BatchQuery::fetch_many_settled) | reported as `Err` in its [`Settled`] slot |
//! | everything else | omitted from the output (logged at `warn`) |

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;

use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::method::{scripthash, transaction};

use super::lifecycle::ElectrumClient;
use super::types::{Balance, HistoryItem, Utxo, decode};

// ============================================================================
// Types
// ============================================================================

/// Identifies one wallet address in a batch query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressDescriptor {
    /// Electrum script hash of the address.
    #[serde(rename = "scriptHash")]
    pub script_hash: String,
    /// Human-readable address.
    pub address: String,
    /// Derivation path of the address.
    pub path: String,
}

impl AddressDescriptor {
    /// Creates a descriptor.
    #[inline]
    #[must_use]
    pub fn new(
        script_hash: impl Into<String>,
        address: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            script_hash: script_hash.into(),
            address: address.into(),
            path: path.into(),
        }
    }
}

/// A result merged with its descriptor.
///
/// Serializes flat: `{"scriptHash", "address", "path", ..data fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tagged<T> {
    /// Originating descriptor.
    #[serde(flatten)]
    pub descriptor: AddressDescriptor,
    /// Server payload.
    #[serde(flatten)]
    pub data: T,
}

/// Outcome of one descriptor's call.
#[derive(Debug)]
pub struct Settled<T> {
    /// Originating descriptor.
    pub descriptor: AddressDescriptor,
    /// Server payload or the call's error.
    pub outcome: Result<T>,
}

impl<T> Settled<T> {
    /// Returns `true` if the call succeeded.
    #[inline]
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Converts a success into a [`Tagged`] record.
    #[must_use]
    pub fn into_tagged(self) -> Option<Tagged<T>> {
        self.outcome.ok().map(|data| Tagged {
            descriptor: self.descriptor,
            data,
        })
    }
}

/// A history row with its transaction merged in.
///
/// Serializes as one flat object: the row's fields followed by the
/// transaction's. A non-verbose result (raw hex) appears as `hex`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    /// The history row the transaction was fetched for.
    #[serde(flatten)]
    pub row: Tagged<HistoryItem>,
    /// Fields of the `blockchain.transaction.get` result.
    #[serde(flatten)]
    pub transaction: Map<String, Value>,
}

impl TransactionRecord {
    fn merge(row: Tagged<HistoryItem>, transaction: Value) -> Self {
        let transaction = match transaction {
            Value::Object(fields) => fields,
            raw => Map::from_iter([("hex".to_string(), raw)]),
        };
        Self { row, transaction }
    }

    /// Returns the raw transaction hex, if the server sent it.
    #[inline]
    #[must_use]
    pub fn hex(&self) -> Option<&str> {
        self.transaction.get("hex").and_then(Value::as_str)
    }
}

// ============================================================================
// BatchQuery
// ============================================================================

/// Fan-out queries over a set of descriptors.
///
/// # Example
///
/// ```no_run
/// # use electrum_sync::{AddressDescriptor, ElectrumClient};
/// # async fn example(client: ElectrumClient) {
/// let wallet = vec![
///     AddressDescriptor::new("8b01df4e...", "bc1q...", "m/84'/0'/0'/0/0"),
///     AddressDescriptor::new("a1b2c3d4...", "bc1q...", "m/84'/0'/0'/0/1"),
/// ];
///
/// let history = client.batch().histories(&wallet).await;
/// let transactions = client.batch().transactions(&history, true).await;
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BatchQuery {
    /// Client the calls go through.
    client: ElectrumClient,
    /// Maximum calls in flight (`None` = all at once).
    concurrency: Option<usize>,
}

impl ElectrumClient {
    /// Creates a batch query over this client.
    #[inline]
    #[must_use]
    pub fn batch(&self) -> BatchQuery {
        BatchQuery::new(self.clone())
    }
}

impl BatchQuery {
    /// Creates an unbounded batch query.
    #[inline]
    #[must_use]
    pub fn new(client: ElectrumClient) -> Self {
        Self {
            client,
            concurrency: None,
        }
    }

    /// Limits the number of calls in flight.
    #[inline]
    #[must_use]
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit.max(1));
        self
    }

    /// Calls `method` with `[scriptHash]` for every descriptor and reports
    /// every outcome, in input order.
    pub async fn fetch_many_settled<T: DeserializeOwned>(
        &self,
        method: &str,
        descriptors: &[AddressDescriptor],
    ) -> Vec<Settled<T>> {
        let calls = descriptors.iter().map(|descriptor| async move {
            let outcome = self
                .client
                .call(method, json!([descriptor.script_hash]))
                .await
                .and_then(decode);

            Settled {
                descriptor: descriptor.clone(),
                outcome,
            }
        });

        self.settle(calls).await
    }

    /// Like [`fetch_many_settled`](Self::fetch_many_settled), but drops
    /// failed descriptors.
    pub async fn fetch_many<T: DeserializeOwned>(
        &self,
        method: &str,
        descriptors: &[AddressDescriptor],
    ) -> Vec<Tagged<T>> {
        let settled = self.fetch_many_settled(method, descriptors).await;
        let records: Vec<_> = settled
            .into_iter()
            .filter_map(|item| keep_success(method, item))
            .collect();

        debug!(method, requested = descriptors.len(), returned = records.len(), "Batch query done");
        records
    }

    /// Like [`fetch_many`](Self::fetch_many) for methods returning a list
    /// per descriptor; every row is tagged and the lists are concatenated.
    pub async fn fetch_many_flat<T: DeserializeOwned>(
        &self,
        method: &str,
        descriptors: &[AddressDescriptor],
    ) -> Vec<Tagged<T>> {
        self.fetch_many::<Vec<T>>(method, descriptors)
            .await
            .into_iter()
            .flat_map(|Tagged { descriptor, data }| {
                data.into_iter().map(move |row| Tagged {
                    descriptor: descriptor.clone(),
                    data: row,
                })
            })
            .collect()
    }

    /// Balance of every descriptor.
    pub async fn balances(&self, descriptors: &[AddressDescriptor]) -> Vec<Tagged<Balance>> {
        self.fetch_many(scripthash::GET_BALANCE, descriptors).await
    }

    /// Flattened history of every descriptor.
    pub async fn histories(&self, descriptors: &[AddressDescriptor]) -> Vec<Tagged<HistoryItem>> {
        self.fetch_many_flat(scripthash::GET_HISTORY, descriptors)
            .await
    }

    /// Flattened mempool entries of every descriptor.
    pub async fn mempools(&self, descriptors: &[AddressDescriptor]) -> Vec<Tagged<HistoryItem>> {
        self.fetch_many_flat(scripthash::GET_MEMPOOL, descriptors)
            .await
    }

    /// Flattened unspent outputs of every descriptor.
    pub async fn unspent(&self, descriptors: &[AddressDescriptor]) -> Vec<Tagged<Utxo>> {
        self.fetch_many_flat(scripthash::LISTUNSPENT, descriptors)
            .await
    }

    /// Fetches the transaction of every history row.
    ///
    /// Rows whose transaction cannot be fetched are dropped.
    pub async fn transactions(
        &self,
        rows: &[Tagged<HistoryItem>],
        verbose: bool,
    ) -> Vec<TransactionRecord> {
        let calls = rows.iter().map(|row| async move {
            let outcome = self
                .client
                .call(transaction::GET, json!([row.data.tx_hash, verbose]))
                .await;
            (row, outcome)
        });

        self.settle(calls)
            .await
            .into_iter()
            .filter_map(|(row, outcome)| match outcome {
                Ok(transaction) => Some(TransactionRecord::merge(row.clone(), transaction)),
                Err(e) => {
                    warn!(
                        tx_hash = %row.data.tx_hash,
                        address = %row.descriptor.address,
                        error = %e,
                        "Dropping transaction from batch"
                    );
                    None
                }
            })
            .collect()
    }

    /// Drives `calls` to completion, preserving order.
    async fn settle<I, F>(&self, calls: I) -> Vec<F::Output>
    where
        I: IntoIterator<Item = F>,
        F: Future,
    {
        match self.concurrency {
            None => join_all(calls).await,
            Some(limit) => stream::iter(calls).buffered(limit).collect().await,
        }
    }
}

/// Converts a settled call into a record, logging the failure otherwise.
fn keep_success<T>(method: &str, item: Settled<T>) -> Option<Tagged<T>> {
    if let Err(e) = &item.outcome {
        warn!(
            method,
            script_hash = %item.descriptor.script_hash,
            address = %item.descriptor.address,
            error = %e,
            "Dropping descriptor from batch"
        );
    }
    item.into_tagged()
}

// ============================================================================
// Tests
// ============================================================================
