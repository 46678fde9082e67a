//! Remembers which outbound items this bridge already signed.

use ledger::chain::Chain;
use ledger::tx::TxId;
use ledger::tx_out::TxOutItem;

use crate::error::Error;
use crate::storage::DbRead;
use crate::storage::DbWrite;

/// The idempotency cache of one chain client. An outbound item is
/// identified by its [`TxOutItem::cache_hash`], so the same instruction
/// handed out again by the ledger, possibly with different gas hints, maps
/// to the same entry.
#[derive(Debug, Clone)]
pub struct SignerCache<S> {
    chain: Chain,
    store: S,
}

impl<S> SignerCache<S>
where
    S: DbRead + DbWrite,
{
    /// Create the cache of the given chain on top of a store.
    pub fn new(chain: Chain, store: S) -> Self {
        Self { chain, store }
    }

    /// Whether the item was already signed and broadcast.
    pub async fn has_signed(&self, item: &TxOutItem) -> Result<bool, Error> {
        Ok(self.signed_tx(item).await?.is_some())
    }

    /// The hash of the transaction broadcast for the item.
    pub async fn signed_tx(&self, item: &TxOutItem) -> Result<Option<TxId>, Error> {
        self.store
            .get_signed_outbound(self.chain, &item.cache_hash())
            .await
    }

    /// Record that the item was broadcast as `tx_id`.
    pub async fn set_signed(&self, item: &TxOutItem, tx_id: &TxId) -> Result<(), Error> {
        self.store
            .write_signed_outbound(self.chain, &item.cache_hash(), tx_id)
            .await
    }
}
