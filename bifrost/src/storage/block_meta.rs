//! Per chain view of scanned blocks and in-flight transactions.

use ledger::chain::Chain;
use ledger::tx::TxId;

use crate::error::Error;
use crate::storage::model::BlockMeta;
use crate::storage::model::SignedTxItem;
use crate::storage::model::TokenMeta;
use crate::storage::DbRead;
use crate::storage::DbWrite;

/// The block meta store of one chain client. It is shared by the scanner,
/// which records blocks and clears confirmed transactions, and by the
/// outbound path, which records what it broadcast.
#[derive(Debug, Clone)]
pub struct BlockMetaStore<S> {
    chain: Chain,
    store: S,
}

impl<S> BlockMetaStore<S>
where
    S: DbRead + DbWrite,
{
    /// Create the store of the given chain on top of a store.
    pub fn new(chain: Chain, store: S) -> Self {
        Self { chain, store }
    }

    /// The chain this store belongs to.
    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Get the meta of the block at `height`.
    pub async fn get_block_meta(&self, height: u64) -> Result<Option<BlockMeta>, Error> {
        self.store.get_block_meta(self.chain, height).await
    }

    /// Get every stored block meta, ordered by height.
    pub async fn get_block_metas(&self) -> Result<Vec<BlockMeta>, Error> {
        self.store.get_block_metas(self.chain).await
    }

    /// Save the meta of a scanned block.
    pub async fn save_block_meta(&self, meta: &BlockMeta) -> Result<(), Error> {
        self.store.write_block_meta(self.chain, meta).await
    }

    /// Forget the block at `height`, used when it was orphaned.
    pub async fn delete_block_meta(&self, height: u64) -> Result<(), Error> {
        self.store.delete_block_meta(self.chain, height).await
    }

    /// Delete the metas that fell out of the retention window below
    /// `current_height`.
    pub async fn prune_block_metas(&self, current_height: u64, retention: u64) -> Result<usize, Error> {
        let Some(cutoff) = current_height.checked_sub(retention) else {
            return Ok(0);
        };
        self.store.delete_block_metas_below(self.chain, cutoff).await
    }

    /// The last height the scanner completed.
    pub async fn get_scanner_position(&self) -> Result<Option<u64>, Error> {
        self.store.get_scanner_position(self.chain).await
    }

    /// Record the last height the scanner completed.
    pub async fn set_scanner_position(&self, height: u64) -> Result<(), Error> {
        self.store.set_scanner_position(self.chain, height).await
    }

    /// Start tracking a broadcast transaction.
    pub async fn add_signed_tx_item(&self, item: &SignedTxItem) -> Result<(), Error> {
        self.store.write_signed_tx_item(self.chain, item).await
    }

    /// Stop tracking a broadcast transaction. Returns whether it was tracked.
    pub async fn remove_signed_tx_item(&self, hash: &TxId) -> Result<bool, Error> {
        self.store.delete_signed_tx_item(self.chain, hash).await
    }

    /// Every tracked broadcast transaction.
    pub async fn get_signed_tx_items(&self) -> Result<Vec<SignedTxItem>, Error> {
        self.store.get_signed_tx_items(self.chain).await
    }

    /// Get the cached metadata of a token.
    pub async fn get_token_meta(&self, address: &str) -> Result<Option<TokenMeta>, Error> {
        self.store.get_token_meta(self.chain, address).await
    }

    /// Cache the metadata of a token.
    pub async fn save_token_meta(&self, meta: &TokenMeta) -> Result<(), Error> {
        self.store.write_token_meta(self.chain, meta).await
    }
}
