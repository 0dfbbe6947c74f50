//! Typed response payloads.
//!
//! Only responses with a stable, well-known shape get a struct; everything
//! else is returned as [`serde_json::Value`].

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// ServerVersion
// ============================================================================

/// Result of the `server.version` handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerVersion {
    /// Server software identification, e.g. `"ElectrumX 1.16.0"`.
    pub software: String,
    /// Negotiated protocol version.
    pub protocol: String,
}

impl ServerVersion {
    /// Parses a handshake result.
    ///
    /// Accepts `[software, protocol]` and, from old servers, a bare
    /// version string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for any other shape.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(parts) => match parts.as_slice() {
                [Value::String(software), Value::String(protocol), ..] => Ok(Self {
                    software: software.clone(),
                    protocol: protocol.clone(),
                }),
                _ => Err(Error::protocol(format!(
                    "unexpected server.version result: {parts:?}"
                ))),
            },
            Value::String(version) => Ok(Self {
                software: version.clone(),
                protocol: version,
            }),
            other => Err(Error::protocol(format!(
                "unexpected server.version result: {other}"
            ))),
        }
    }
}

// ============================================================================
// Wallet payloads
// ============================================================================

/// Confirmed and unconfirmed balance in satoshis.
///
/// `unconfirmed` is negative when unconfirmed spends exceed unconfirmed receipts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Confirmed balance.
    pub confirmed: i64,
    /// Mempool delta.
    pub unconfirmed: i64,
}

impl Balance {
    /// Confirmed plus unconfirmed.
    #[inline]
    #[must_use]
    pub fn total(&self) -> i64 {
        self.confirmed + self.unconfirmed
    }
}

/// One history or mempool entry.
///
/// Mempool entries have height `0` (all inputs confirmed) or `-1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Block height, or `0` / `-1` for mempool transactions.
    pub height: i64,
    /// Transaction id.
    pub tx_hash: String,
    /// Fee in satoshis, mempool entries only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
}

impl HistoryItem {
    /// Returns `true` for mempool entries.
    #[inline]
    #[must_use]
    pub fn is_unconfirmed(&self) -> bool {
        self.height <= 0
    }
}

/// One unspent output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Block height, `0` when unconfirmed.
    pub height: i64,
    /// Funding transaction id.
    pub tx_hash: String,
    /// Output index.
    pub tx_pos: u32,
    /// Value in satoshis.
    pub value: u64,
}

/// Payload of `blockchain.headers.subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderNotification {
    /// Chain tip height.
    pub height: u64,
    /// Raw header, hex encoded.
    pub hex: String,
}

/// Payload of `blockchain.transaction.get_merkle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Height of the confirming block.
    pub block_height: u64,
    /// Merkle branch, hex encoded.
    pub merkle: Vec<String>,
    /// Position in the block.
    pub pos: u32,
}

/// Deserializes a call result into `T`.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::protocol(format!("unexpected result shape: {e}")))
}

// ============================================================================
// Tests
// ============================================================================
