//! A persistent store backed by sled.
//!
//! Records of all chains share one tree. Keys are strings of the form
//! `<chain>-<concern>-<id>` with the chain in lower case, and values are
//! JSON. Block heights are zero padded so that the lexicographic order of
//! the keys is the height order.

use std::path::Path;

use ledger::chain::Chain;
use ledger::tx::TxId;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;
use crate::storage::model;

/// A sled backed store.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
}

fn chain_prefix(chain: Chain) -> String {
    chain.as_str().to_lowercase()
}

fn block_meta_prefix(chain: Chain) -> String {
    format!("{}-blockmeta-", chain_prefix(chain))
}

fn block_meta_key(chain: Chain, height: u64) -> String {
    format!("{}{height:020}", block_meta_prefix(chain))
}

fn signed_tx_prefix(chain: Chain) -> String {
    format!("{}-signedtx-", chain_prefix(chain))
}

fn signed_tx_key(chain: Chain, hash: &TxId) -> String {
    format!("{}{hash}", signed_tx_prefix(chain))
}

fn token_meta_key(chain: Chain, address: &str) -> String {
    format!("{}-tokenmeta-{}", chain_prefix(chain), address.to_lowercase())
}

fn signer_cache_key(chain: Chain, cache_hash: &str) -> String {
    format!("{}-signercache-{cache_hash}", chain_prefix(chain))
}

fn scanner_position_key(chain: Chain) -> String {
    format!("{}-scanner-position", chain_prefix(chain))
}

impl SledStore {
    /// Open the database at the given path, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Open a database that is deleted when dropped.
    pub fn temporary() -> Result<Self, Error> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), Error> {
        let bytes = serde_json::to_vec(value)?;
        self.db.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, Error> {
        self.db
            .scan_prefix(prefix.as_bytes())
            .map(|entry| -> Result<T, Error> {
                let (_, bytes) = entry?;
                Ok(serde_json::from_slice(&bytes)?)
            })
            .collect()
    }
}

impl super::DbRead for SledStore {
    async fn get_block_meta(
        &self,
        chain: Chain,
        height: u64,
    ) -> Result<Option<model::BlockMeta>, Error> {
        self.get(&block_meta_key(chain, height))
    }

    async fn get_block_metas(&self, chain: Chain) -> Result<Vec<model::BlockMeta>, Error> {
        self.scan(&block_meta_prefix(chain))
    }

    async fn get_scanner_position(&self, chain: Chain) -> Result<Option<u64>, Error> {
        self.get(&scanner_position_key(chain))
    }

    async fn get_signed_tx_items(&self, chain: Chain) -> Result<Vec<model::SignedTxItem>, Error> {
        self.scan(&signed_tx_prefix(chain))
    }

    async fn get_token_meta(
        &self,
        chain: Chain,
        address: &str,
    ) -> Result<Option<model::TokenMeta>, Error> {
        self.get(&token_meta_key(chain, address))
    }

    async fn get_signed_outbound(&self, chain: Chain, cache_hash: &str) -> Result<Option<TxId>, Error> {
        self.get(&signer_cache_key(chain, cache_hash))
    }
}

impl super::DbWrite for SledStore {
    async fn write_block_meta(&self, chain: Chain, meta: &model::BlockMeta) -> Result<(), Error> {
        self.put(&block_meta_key(chain, meta.height), meta)
    }

    async fn delete_block_meta(&self, chain: Chain, height: u64) -> Result<(), Error> {
        self.db.remove(block_meta_key(chain, height).as_bytes())?;
        Ok(())
    }

    async fn delete_block_metas_below(&self, chain: Chain, height: u64) -> Result<usize, Error> {
        let start = block_meta_key(chain, 0);
        let end = block_meta_key(chain, height);
        let doomed = self
            .db
            .range(start.as_bytes()..end.as_bytes())
            .keys()
            .collect::<Result<Vec<_>, _>>()?;

        let mut batch = sled::Batch::default();
        for key in doomed.iter() {
            batch.remove(key.clone());
        }
        self.db.apply_batch(batch)?;
        Ok(doomed.len())
    }

    async fn set_scanner_position(&self, chain: Chain, height: u64) -> Result<(), Error> {
        self.put(&scanner_position_key(chain), &height)
    }

    async fn write_signed_tx_item(
        &self,
        chain: Chain,
        item: &model::SignedTxItem,
    ) -> Result<(), Error> {
        self.put(&signed_tx_key(chain, &item.hash), item)
    }

    async fn delete_signed_tx_item(&self, chain: Chain, hash: &TxId) -> Result<bool, Error> {
        let removed = self.db.remove(signed_tx_key(chain, hash).as_bytes())?;
        Ok(removed.is_some())
    }

    async fn write_token_meta(&self, chain: Chain, meta: &model::TokenMeta) -> Result<(), Error> {
        self.put(&token_meta_key(chain, &meta.address), meta)
    }

    async fn write_signed_outbound(
        &self,
        chain: Chain,
        cache_hash: &str,
        tx_id: &TxId,
    ) -> Result<(), Error> {
        self.put(&signer_cache_key(chain, cache_hash), tx_id)?;
        self.db.flush()?;
        Ok(())
    }
}
