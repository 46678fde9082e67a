//! # Bridge storage
//!
//! This module contains the `Read` and `Write` traits representing
//! the interface between the bridge and its internal database.
//!
//! Every record is scoped to a chain. The canonical implementation is the
//! [`sled_store::SledStore`], which lays the records out in one key space
//! with a `<chain>-<concern>-` prefix per record type. The
//! [`in_memory::Store`] is used in tests.
//!
//! Two typed views sit on top of the traits: the [`SignerCache`], which
//! remembers which outbound items were already signed, and the
//! [`BlockMetaStore`], which tracks scanned blocks, the scanner position,
//! broadcast transactions and token metadata.

pub mod block_meta;
pub mod in_memory;
pub mod model;
pub mod signer_cache;
pub mod sled_store;

use std::future::Future;

use ledger::chain::Chain;
use ledger::tx::TxId;

use crate::error::Error;

pub use block_meta::BlockMetaStore;
pub use signer_cache::SignerCache;

/// Represents the ability to read data from the bridge storage.
pub trait DbRead {
    /// Get the meta of the block at the given height.
    fn get_block_meta(
        &self,
        chain: Chain,
        height: u64,
    ) -> impl Future<Output = Result<Option<model::BlockMeta>, Error>> + Send;

    /// Get the metas of every stored block, ordered by height.
    fn get_block_metas(
        &self,
        chain: Chain,
    ) -> impl Future<Output = Result<Vec<model::BlockMeta>, Error>> + Send;

    /// Get the last height the scanner completed.
    fn get_scanner_position(
        &self,
        chain: Chain,
    ) -> impl Future<Output = Result<Option<u64>, Error>> + Send;

    /// Get every broadcast transaction that is still tracked.
    fn get_signed_tx_items(
        &self,
        chain: Chain,
    ) -> impl Future<Output = Result<Vec<model::SignedTxItem>, Error>> + Send;

    /// Get the cached metadata of a token.
    fn get_token_meta(
        &self,
        chain: Chain,
        address: &str,
    ) -> impl Future<Output = Result<Option<model::TokenMeta>, Error>> + Send;

    /// Get the hash of the transaction broadcast for the outbound with the
    /// given cache hash, if it was signed.
    fn get_signed_outbound(
        &self,
        chain: Chain,
        cache_hash: &str,
    ) -> impl Future<Output = Result<Option<TxId>, Error>> + Send;
}

/// Represents the ability to write data to the bridge storage.
pub trait DbWrite {
    /// Write the meta of a scanned block, replacing any meta at its height.
    fn write_block_meta(
        &self,
        chain: Chain,
        meta: &model::BlockMeta,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Delete the meta of the block at the given height.
    fn delete_block_meta(
        &self,
        chain: Chain,
        height: u64,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Delete the metas of every block below the given height, returning
    /// how many were deleted.
    fn delete_block_metas_below(
        &self,
        chain: Chain,
        height: u64,
    ) -> impl Future<Output = Result<usize, Error>> + Send;

    /// Record the last height the scanner completed.
    fn set_scanner_position(
        &self,
        chain: Chain,
        height: u64,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Track a broadcast transaction.
    fn write_signed_tx_item(
        &self,
        chain: Chain,
        item: &model::SignedTxItem,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Stop tracking a broadcast transaction, returning whether it was
    /// tracked.
    fn delete_signed_tx_item(
        &self,
        chain: Chain,
        hash: &TxId,
    ) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Cache the metadata of a token.
    fn write_token_meta(
        &self,
        chain: Chain,
        meta: &model::TokenMeta,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Record that the outbound with the given cache hash was signed and
    /// broadcast as `tx_id`.
    fn write_signed_outbound(
        &self,
        chain: Chain,
        cache_hash: &str,
        tx_id: &TxId,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}
