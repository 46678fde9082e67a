//! Transactions observed on external chains.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::asset::Coin;
use crate::chain::Chain;
use crate::error::Error;
use crate::keys::PublicKey;
use crate::observed::ObservedTx;
use crate::observed::Status;

/// The identifier of an external transaction. It is stored as upper case
/// hex without a `0x` prefix, so that ids reported by different
/// validators compare equal regardless of how their RPC node formats
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TxId(String);

impl TxId {
    /// Create a normalized transaction id.
    pub fn new(id: &str) -> Self {
        let id = id
            .strip_prefix("0x")
            .or_else(|| id.strip_prefix("0X"))
            .unwrap_or(id);
        Self(id.to_uppercase())
    }

    /// Create an id from the raw bytes of a transaction hash.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode_upper(bytes))
    }

    /// Whether the id is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TxId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<String> for TxId {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<TxId> for String {
    fn from(value: TxId) -> Self {
        value.0
    }
}

/// A transaction on an external chain as the ledger sees it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tx {
    /// The transaction id on the external chain.
    pub id: TxId,
    /// The chain the transaction happened on.
    pub chain: Chain,
    /// The sender.
    pub from_address: String,
    /// The recipient. For router calls this is the vault the funds were
    /// sent to, not the router contract.
    pub to_address: String,
    /// The coins moved by the transaction.
    pub coins: Vec<Coin>,
    /// The gas paid by the transaction.
    pub gas: Vec<Coin>,
    /// The memo attached to the transaction.
    pub memo: String,
}

impl Tx {
    /// Validate the transaction for the ledger boundary.
    pub fn validate(&self) -> Result<(), Error> {
        if self.id.is_empty() {
            return Err(Error::InvalidTx(self.id.clone(), "tx id cannot be empty"));
        }
        if self.from_address.is_empty() {
            return Err(Error::InvalidTx(self.id.clone(), "from address cannot be empty"));
        }
        if self.to_address.is_empty() {
            return Err(Error::InvalidTx(self.id.clone(), "to address cannot be empty"));
        }
        if self.coins.is_empty() {
            return Err(Error::InvalidTx(self.id.clone(), "coins cannot be empty"));
        }
        if self.memo.len() > crate::MAX_MEMO_SIZE {
            return Err(Error::MemoTooLong(self.memo.len()));
        }
        Ok(())
    }
}

/// A single transaction extracted by a block scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInItem {
    /// The external block height the transaction was included in.
    pub block_height: u64,
    /// The transaction hash.
    pub tx: TxId,
    /// The sender.
    pub sender: String,
    /// The recipient vault.
    pub to: String,
    /// The coins moved.
    pub coins: Vec<Coin>,
    /// The gas paid.
    pub gas: Vec<Coin>,
    /// The memo.
    pub memo: String,
    /// The vault that received (or sent) the funds.
    pub observed_vault_pub_key: PublicKey,
}

impl TxInItem {
    /// Convert this item into the ledger transaction it describes.
    pub fn to_tx(&self, chain: Chain) -> Tx {
        Tx {
            id: self.tx.clone(),
            chain,
            from_address: self.sender.clone(),
            to_address: self.to.clone(),
            coins: self.coins.clone(),
            gas: self.gas.clone(),
            memo: self.memo.clone(),
        }
    }
}

/// A batch of transactions extracted from one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    /// The chain the transactions were observed on.
    pub chain: Chain,
    /// The transactions.
    pub items: Vec<TxInItem>,
    /// The number of confirmations the transactions need before they are
    /// final.
    pub confirmations_required: u64,
    /// Whether the batch has already been reported as final.
    pub finalised: bool,
    /// Whether the transactions were seen in the mempool rather than in a
    /// block.
    pub mem_pool: bool,
}

impl TxIn {
    /// Create an empty batch for the given chain.
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            items: Vec::new(),
            confirmations_required: 0,
            finalised: false,
            mem_pool: false,
        }
    }

    /// Whether the batch has no transactions.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The highest block height of the transactions in the batch.
    pub fn block_height(&self) -> u64 {
        self.items
            .iter()
            .map(|item| item.block_height)
            .max()
            .unwrap_or_default()
    }

    /// The height at which the batch has enough confirmations.
    pub fn finalise_height(&self) -> u64 {
        self.block_height() + self.confirmations_required
    }

    /// Whether the batch is final at the given chain height.
    pub fn is_final_at(&self, chain_height: u64) -> bool {
        self.confirmations_required == 0 || chain_height >= self.finalise_height()
    }

    /// Convert the batch into observation reports. Final reports carry a
    /// finalise height equal to the block height; non-final reports carry
    /// the height at which the confirmation count will be reached.
    pub fn to_observations(&self, finalised: bool) -> Vec<ObservedTx> {
        self.items
            .iter()
            .map(|item| {
                let finalise_height = if finalised {
                    item.block_height
                } else {
                    item.block_height + self.confirmations_required
                };
                ObservedTx {
                    tx: item.to_tx(self.chain),
                    status: Status::Incomplete,
                    block_height: item.block_height,
                    finalise_height,
                    observed_pub_key: item.observed_vault_pub_key,
                    signers: Default::default(),
                }
            })
            .collect()
    }
}
