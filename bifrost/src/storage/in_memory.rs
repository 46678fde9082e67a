//! In-memory store implementation - useful for tests

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use ledger::chain::Chain;
use ledger::tx::TxId;
use tokio::sync::Mutex;

use crate::error::Error;
use crate::storage::model;

/// A store wrapped in an Arc<Mutex<...>> for interior mutability
pub type SharedStore = Arc<Mutex<Store>>;

/// In-memory store
#[derive(Debug, Default)]
pub struct Store {
    /// Block metas, by chain and height
    pub block_metas: BTreeMap<(Chain, u64), model::BlockMeta>,

    /// The last completed scanner height of each chain
    pub scanner_positions: HashMap<Chain, u64>,

    /// Tracked broadcast transactions
    pub signed_tx_items: HashMap<(Chain, TxId), model::SignedTxItem>,

    /// Token metadata, keyed by lower-case address
    pub token_metas: HashMap<(Chain, String), model::TokenMeta>,

    /// Signed outbounds, by cache hash
    pub signed_outbounds: HashMap<(Chain, String), TxId>,
}

impl Store {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wrapped in an Arc<Mutex<...>>
    pub fn new_shared() -> SharedStore {
        Arc::new(Mutex::new(Self::new()))
    }
}

impl super::DbRead for SharedStore {
    async fn get_block_meta(
        &self,
        chain: Chain,
        height: u64,
    ) -> Result<Option<model::BlockMeta>, Error> {
        Ok(self.lock().await.block_metas.get(&(chain, height)).cloned())
    }

    async fn get_block_metas(&self, chain: Chain) -> Result<Vec<model::BlockMeta>, Error> {
        Ok(self
            .lock()
            .await
            .block_metas
            .range((chain, 0)..=(chain, u64::MAX))
            .map(|(_, meta)| meta.clone())
            .collect())
    }

    async fn get_scanner_position(&self, chain: Chain) -> Result<Option<u64>, Error> {
        Ok(self.lock().await.scanner_positions.get(&chain).copied())
    }

    async fn get_signed_tx_items(&self, chain: Chain) -> Result<Vec<model::SignedTxItem>, Error> {
        let store = self.lock().await;
        let mut items: Vec<_> = store
            .signed_tx_items
            .iter()
            .filter(|((item_chain, _), _)| *item_chain == chain)
            .map(|(_, item)| item.clone())
            .collect();
        items.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(items)
    }

    async fn get_token_meta(
        &self,
        chain: Chain,
        address: &str,
    ) -> Result<Option<model::TokenMeta>, Error> {
        let key = (chain, address.to_lowercase());
        Ok(self.lock().await.token_metas.get(&key).cloned())
    }

    async fn get_signed_outbound(&self, chain: Chain, cache_hash: &str) -> Result<Option<TxId>, Error> {
        let key = (chain, cache_hash.to_string());
        Ok(self.lock().await.signed_outbounds.get(&key).cloned())
    }
}

impl super::DbWrite for SharedStore {
    async fn write_block_meta(&self, chain: Chain, meta: &model::BlockMeta) -> Result<(), Error> {
        self.lock()
            .await
            .block_metas
            .insert((chain, meta.height), meta.clone());
        Ok(())
    }

    async fn delete_block_meta(&self, chain: Chain, height: u64) -> Result<(), Error> {
        self.lock().await.block_metas.remove(&(chain, height));
        Ok(())
    }

    async fn delete_block_metas_below(&self, chain: Chain, height: u64) -> Result<usize, Error> {
        let mut store = self.lock().await;
        let doomed: Vec<_> = store
            .block_metas
            .range((chain, 0)..(chain, height))
            .map(|(key, _)| *key)
            .collect();
        for key in doomed.iter() {
            store.block_metas.remove(key);
        }
        Ok(doomed.len())
    }

    async fn set_scanner_position(&self, chain: Chain, height: u64) -> Result<(), Error> {
        self.lock().await.scanner_positions.insert(chain, height);
        Ok(())
    }

    async fn write_signed_tx_item(
        &self,
        chain: Chain,
        item: &model::SignedTxItem,
    ) -> Result<(), Error> {
        self.lock()
            .await
            .signed_tx_items
            .insert((chain, item.hash.clone()), item.clone());
        Ok(())
    }

    async fn delete_signed_tx_item(&self, chain: Chain, hash: &TxId) -> Result<bool, Error> {
        let removed = self
            .lock()
            .await
            .signed_tx_items
            .remove(&(chain, hash.clone()));
        Ok(removed.is_some())
    }

    async fn write_token_meta(&self, chain: Chain, meta: &model::TokenMeta) -> Result<(), Error> {
        self.lock()
            .await
            .token_metas
            .insert((chain, meta.address.to_lowercase()), meta.clone());
        Ok(())
    }

    async fn write_signed_outbound(
        &self,
        chain: Chain,
        cache_hash: &str,
        tx_id: &TxId,
    ) -> Result<(), Error> {
        self.lock()
            .await
            .signed_outbounds
            .insert((chain, cache_hash.to_string()), tx_id.clone());
        Ok(())
    }
}
