//! Database models for the bridge.

use ledger::keys::PublicKey;
use ledger::tx::TxId;
use serde::Deserialize;
use serde::Serialize;

/// A block the scanner has processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    /// The height of the block.
    pub height: u64,
    /// The hash of the block, lower-case hex with a `0x` prefix.
    pub hash: String,
    /// The hash of the parent block, lower-case hex with a `0x` prefix.
    pub parent_hash: String,
    /// Transactions of this block that were reported to the ledger.
    #[serde(default)]
    pub transactions: Vec<TxId>,
}

impl BlockMeta {
    /// Create the meta of a block with no reported transactions.
    pub fn new(height: u64, hash: impl Into<String>, parent_hash: impl Into<String>) -> Self {
        Self {
            height,
            hash: hash.into().to_lowercase(),
            parent_hash: parent_hash.into().to_lowercase(),
            transactions: Vec::new(),
        }
    }
}

/// A transaction this bridge signed and broadcast that has not been seen
/// in a block yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTxItem {
    /// The hash of the transaction.
    pub hash: TxId,
    /// The ledger height at which it was signed.
    pub height: u64,
    /// The vault that signed it.
    pub vault_pub_key: PublicKey,
}

/// Cached metadata of a token contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMeta {
    /// The contract address, lower-case hex with a `0x` prefix.
    pub address: String,
    /// The ticker of the token.
    pub symbol: String,
    /// The number of decimals of the token.
    pub decimals: u8,
}
