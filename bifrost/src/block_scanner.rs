//! # Block scanner
//!
//! The block scanner walks one chain height by height and turns what it
//! finds into [`TxIn`] batches for the observer. A transaction is relevant
//! when it
//!
//! * is a native transfer to a vault, in which case the call data is the
//!   memo,
//! * calls a vault router, in which case the router events that involve a
//!   vault are decoded, or
//! * is sent by a vault, in which case it is one of our outbounds and the
//!   matching in-flight [`SignedTxItem`] is cleared.
//!
//! Each scanned block also feeds the [`GasPriceOracle`], may produce a
//! network fee report and may trigger a scheduled solvency check. The
//! scanner keeps a short history of block hashes so that a re-org is
//! noticed when a block does not build on the block we scanned before it.
//!
//! [`SignedTxItem`]: crate::storage::model::SignedTxItem

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use alloy::primitives::Address;
use alloy::primitives::B256;
use alloy::primitives::U256;
use futures::StreamExt as _;
use ledger::asset::Asset;
use ledger::asset::Coin;
use ledger::chain::Chain;
use ledger::keys::PublicKey;
use ledger::tx::TxId;
use ledger::tx::TxIn;
use ledger::tx::TxInItem;
use ledger::vault::ErrataBlock;
use ledger::vault::ErrataTx;
use ledger::vault::NetworkFee;
use ledger::vault::Solvency;
use ledger::MAX_MEMO_SIZE;
use tokio::sync::mpsc;
use tokio::sync::watch;

use crate::chain::router::RouterEvent;
use crate::chain::router::NATIVE_ASSET;
use crate::chain::Block;
use crate::chain::ChainRpc;
use crate::chain::Receipt;
use crate::chain::RpcTransaction;
use crate::config::ChainConfig;
use crate::context::BifrostEvent;
use crate::context::Context;
use crate::context::TerminationHandle;
use crate::error::Error;
use crate::error::RpcError;
use crate::error::RpcErrorKind;
use crate::gas::GasPriceOracle;
use crate::ledger_client::LedgerInteract as _;
use crate::metrics::Metrics;
use crate::profile::ChainProfile;
use crate::profile::NATIVE_DECIMALS;
use crate::solvency::SolvencyReporter;
use crate::storage::model::BlockMeta;
use crate::storage::model::TokenMeta;
use crate::storage::BlockMetaStore;
use crate::storage::DbRead;
use crate::storage::DbWrite;

/// Tracks whether a scanner is keeping up with its chain.
#[derive(Debug, Default)]
pub struct ScannerHealth {
    last_scan: Mutex<Option<Instant>>,
    scanned_height: AtomicU64,
    chain_tip: AtomicU64,
}

impl ScannerHealth {
    /// Create the health of a scanner that has not scanned anything yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a scanned block.
    pub fn record_scan(&self, height: u64) {
        self.scanned_height.store(height, Ordering::Relaxed);
        if let Ok(mut last_scan) = self.last_scan.lock() {
            *last_scan = Some(Instant::now());
        }
    }

    /// Record the tip of the chain.
    pub fn record_tip(&self, tip: u64) {
        self.chain_tip.store(tip, Ordering::Relaxed);
    }

    /// The last scanned height.
    pub fn scanned_height(&self) -> u64 {
        self.scanned_height.load(Ordering::Relaxed)
    }

    /// The last known tip of the chain.
    pub fn chain_tip(&self) -> u64 {
        self.chain_tip.load(Ordering::Relaxed)
    }

    /// Healthy iff a block was scanned within `healthy_period` and the
    /// scanner is no more than `max_lag` blocks behind the tip.
    pub fn is_healthy(&self, healthy_period: Duration, max_lag: u64) -> bool {
        let recent = self
            .last_scan
            .lock()
            .ok()
            .and_then(|last_scan| *last_scan)
            .is_some_and(|last_scan| last_scan.elapsed() <= healthy_period);
        let lag = self.chain_tip().saturating_sub(self.scanned_height());
        recent && lag <= max_lag
    }
}

/// Lower-case hex with a `0x` prefix, the form hashes are stored in.
fn format_hash(hash: &B256) -> String {
    format!("{hash:#x}")
}

/// The vaults and routers a block is matched against.
#[derive(Debug, Default)]
struct Watchlist {
    vaults: HashMap<Address, PublicKey>,
    routers: HashSet<Address>,
}

/// Scans one chain.
pub struct BlockScanner<C, R, P> {
    context: C,
    rpc: R,
    profile: Arc<P>,
    config: ChainConfig,
    oracle: Arc<Mutex<GasPriceOracle>>,
    health: Arc<ScannerHealth>,
    solvency: SolvencyReporter<C, R, P>,
    height_tx: Arc<watch::Sender<u64>>,
}

impl<C, R, P> BlockScanner<C, R, P>
where
    C: Context + 'static,
    R: ChainRpc + Clone + 'static,
    P: ChainProfile,
{
    /// Create a scanner.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: C,
        rpc: R,
        profile: Arc<P>,
        config: ChainConfig,
        oracle: Arc<Mutex<GasPriceOracle>>,
        health: Arc<ScannerHealth>,
        solvency: SolvencyReporter<C, R, P>,
        height_tx: Arc<watch::Sender<u64>>,
    ) -> Self {
        Self {
            context,
            rpc,
            profile,
            config,
            oracle,
            health,
            solvency,
            height_tx,
        }
    }

    fn chain(&self) -> Chain {
        self.profile.chain()
    }

    fn store(&self) -> BlockMetaStore<impl DbRead + DbWrite + Clone + Sync + Send + 'static + use<'_, C, R, P>> {
        BlockMetaStore::new(self.chain(), self.context.get_storage_mut())
    }

    /// Write the metadata of the whitelisted tokens to the store, so that
    /// token amounts can be converted while scanning.
    pub async fn save_whitelist_tokens(&self) -> Result<(), Error> {
        let store = self.store();
        for token in &self.config.whitelist_tokens {
            let meta = TokenMeta {
                address: token.address.to_lowercase(),
                symbol: token.ticker.to_uppercase(),
                decimals: token.decimals,
            };
            store.save_token_meta(&meta).await?;
        }
        Ok(())
    }

    /// The first height to scan: after the stored position, else the
    /// configured start height, else the chain tip.
    pub async fn start_height(&self) -> Result<u64, Error> {
        if let Some(position) = self.store().get_scanner_position().await? {
            return Ok(position + 1);
        }
        if let Some(start) = self.config.start_block_height {
            return Ok(start);
        }
        self.rpc.get_height().await
    }

    /// Fetch the block at `height` and extract its transactions.
    pub async fn scan(&self, height: u64) -> Result<TxIn, Error> {
        let block = self.rpc.get_block(height).await?;
        self.scan_block(&block).await
    }

    /// Extract the transactions of `block`, update the gas price estimate
    /// and run the reports due at this height.
    #[tracing::instrument(skip_all, fields(chain = %self.chain(), height = block.number))]
    pub async fn scan_block(&self, block: &Block) -> Result<TxIn, Error> {
        let watchlist = self.watchlist().await?;

        let results: Vec<Result<Vec<TxInItem>, Error>> = futures::stream::iter(&block.transactions)
            .map(|tx| self.extract(tx, &watchlist))
            .buffer_unordered(self.config.concurrency.get())
            .collect()
            .await;

        let mut items = Vec::new();
        for result in results {
            items.extend(result?);
        }
        items.sort_by(|a, b| a.tx.cmp(&b.tx));

        let tx_in = TxIn {
            chain: self.chain(),
            items,
            confirmations_required: self.config.confirmations_required,
            finalised: self.config.confirmations_required == 0,
            mem_pool: false,
        };

        self.update_gas_price(block).await;

        Ok(tx_in)
    }

    async fn watchlist(&self) -> Result<Watchlist, Error> {
        let vaults = self.context.get_ledger_client().get_asgard_vaults().await?;
        let mut watchlist = Watchlist::default();
        for vault in vaults {
            watchlist
                .vaults
                .insert(self.profile.address_of(&vault.pub_key), vault.pub_key);
            let Some(router) = vault.router(self.chain()) else {
                continue;
            };
            match self.profile.parse_address(router) {
                Ok(router) => {
                    watchlist.routers.insert(router);
                }
                Err(error) => tracing::warn!(%error, "vault has an invalid router address"),
            }
        }
        Ok(watchlist)
    }

    async fn update_gas_price(&self, block: &Block) {
        let prices: Vec<u128> = block
            .transactions
            .iter()
            .map(|tx| tx.gas_price)
            .filter(|price| *price > 0)
            .collect();

        let fee = match self.oracle.lock() {
            Ok(mut oracle) => {
                oracle.observe_block(&prices);
                metrics::gauge!(Metrics::GasPrice, "chain" => self.chain().as_str())
                    .set(oracle.gas_price() as f64);
                oracle
                    .fee_to_report()
                    .map(|_| oracle.network_fee_rate_gwei())
            }
            Err(_) => None,
        };

        let Some(transaction_rate) = fee else {
            return;
        };
        let fee = NetworkFee {
            height: block.number,
            chain: self.chain(),
            transaction_size: self.config.max_contract_gas,
            transaction_rate,
        };
        match self.context.get_ledger_client().post_network_fee(fee).await {
            Ok(()) => {
                tracing::info!(transaction_rate, "posted network fee");
                metrics::counter!(Metrics::NetworkFeesPostedTotal, "chain" => self.chain().as_str())
                    .increment(1);
                if let Ok(mut oracle) = self.oracle.lock() {
                    oracle.mark_reported();
                }
            }
            Err(error) => tracing::warn!(%error, "could not post network fee"),
        }
    }

    async fn receipt(&self, hash: B256) -> Result<Receipt, Error> {
        self.rpc.get_receipt(hash).await?.ok_or_else(|| {
            let error = RpcError::with_kind(RpcErrorKind::NotFound, format!("receipt of {hash}"));
            Error::ChainRpc(self.chain(), error)
        })
    }

    fn gas_coin(&self, receipt: &Receipt) -> Vec<Coin> {
        let fee = self
            .profile
            .to_ledger_amount(U256::from(receipt.fee()), NATIVE_DECIMALS);
        vec![Coin {
            asset: self.profile.gas_asset(),
            amount: fee,
            decimals: NATIVE_DECIMALS,
        }]
    }

    /// The coin for `amount` of the router asset `asset`. Tokens that are
    /// not whitelisted and zero amounts give `None`.
    async fn coin(&self, asset: Address, amount: U256) -> Result<Option<Coin>, Error> {
        let (asset, decimals) = if asset == NATIVE_ASSET {
            (self.profile.gas_asset(), NATIVE_DECIMALS)
        } else {
            let address = format!("{asset:#x}");
            let Some(meta) = self.store().get_token_meta(&address).await? else {
                tracing::debug!(token = %address, "ignoring token that is not whitelisted");
                return Ok(None);
            };
            (Asset::token(self.chain(), &meta.symbol, &address), meta.decimals)
        };

        let amount = self.profile.to_ledger_amount(amount, decimals);
        if amount == 0 {
            return Ok(None);
        }
        Ok(Some(Coin { asset, amount, decimals }))
    }

    fn item(
        &self,
        tx: &RpcTransaction,
        receipt: &Receipt,
        sender: Address,
        to: Address,
        coins: Vec<Coin>,
        memo: String,
        vault: PublicKey,
    ) -> TxInItem {
        TxInItem {
            block_height: receipt.block_number,
            tx: TxId::from_bytes(tx.hash.as_slice()),
            sender: self.profile.format_address(&sender),
            to: self.profile.format_address(&to),
            coins,
            gas: self.gas_coin(receipt),
            memo,
            observed_vault_pub_key: vault,
        }
    }

    /// Extract the items of one transaction. Chain RPC failures are
    /// returned, malformed transactions are logged and skipped.
    async fn extract(&self, tx: &RpcTransaction, watchlist: &Watchlist) -> Result<Vec<TxInItem>, Error> {
        let Some(to) = tx.to else {
            return Ok(Vec::new());
        };
        let from_vault = watchlist.vaults.get(&tx.from).copied();
        let to_vault = watchlist.vaults.get(&to).copied();
        let to_router = watchlist.routers.contains(&to);
        if from_vault.is_none() && to_vault.is_none() && !to_router {
            return Ok(Vec::new());
        }

        let receipt = self.receipt(tx.hash).await?;

        if from_vault.is_some() {
            let tx_id = TxId::from_bytes(tx.hash.as_slice());
            if self.store().remove_signed_tx_item(&tx_id).await? {
                tracing::debug!(%tx_id, "outbound was included in a block");
            }
        }

        if !receipt.status {
            tracing::debug!(tx = %tx.hash, "skipping failed transaction");
            return Ok(Vec::new());
        }

        if to_router {
            return self.extract_router_events(tx, &receipt, to, watchlist).await;
        }

        let vault = match (to_vault, from_vault) {
            (Some(vault), _) | (None, Some(vault)) => vault,
            (None, None) => return Ok(Vec::new()),
        };
        let Some(memo) = decode_memo(tx.input.as_ref()) else {
            tracing::debug!(tx = %tx.hash, "skipping transaction with an invalid memo");
            return Ok(Vec::new());
        };
        let Some(coin) = self.coin(NATIVE_ASSET, tx.value).await? else {
            return Ok(Vec::new());
        };

        Ok(vec![self.item(tx, &receipt, tx.from, to, vec![coin], memo, vault)])
    }

    async fn extract_router_events(
        &self,
        tx: &RpcTransaction,
        receipt: &Receipt,
        router: Address,
        watchlist: &Watchlist,
    ) -> Result<Vec<TxInItem>, Error> {
        let vault_of = |address: &Address| watchlist.vaults.get(address).copied();
        let mut items = Vec::new();

        for log in receipt.logs.iter().filter(|log| log.address == router) {
            let event = match RouterEvent::decode_log(log) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(error) => {
                    tracing::warn!(%error, tx = %tx.hash, "skipping malformed router event");
                    continue;
                }
            };

            // (sender, recipient, vault, [(asset, amount)], memo)
            let (sender, to, vault, assets, memo) = match event {
                RouterEvent::Deposit(event) => {
                    let Some(vault) = vault_of(&event.to) else { continue };
                    (tx.from, event.to, vault, vec![(event.asset, event.amount)], event.memo)
                }
                RouterEvent::TransferOut(event) => {
                    let Some(vault) = vault_of(&event.vault) else { continue };
                    (event.vault, event.to, vault, vec![(event.asset, event.amount)], event.memo)
                }
                RouterEvent::TransferOutAndCall(event) => {
                    let Some(vault) = vault_of(&event.vault) else { continue };
                    (event.vault, event.to, vault, vec![(NATIVE_ASSET, event.amount)], event.memo)
                }
                RouterEvent::TransferAllowance(event) => {
                    let Some(vault) = vault_of(&event.oldVault).or_else(|| vault_of(&event.newVault))
                    else {
                        continue;
                    };
                    let assets = vec![(event.asset, event.amount)];
                    (event.oldVault, event.newVault, vault, assets, event.memo)
                }
                RouterEvent::VaultTransfer(event) => {
                    let Some(vault) = vault_of(&event.oldVault).or_else(|| vault_of(&event.newVault))
                    else {
                        continue;
                    };
                    let assets = event
                        .coins
                        .iter()
                        .map(|coin| (coin.asset, coin.amount))
                        .collect();
                    (event.oldVault, event.newVault, vault, assets, event.memo)
                }
            };

            if memo.len() > MAX_MEMO_SIZE {
                tracing::debug!(tx = %tx.hash, "skipping router event with an oversized memo");
                continue;
            }

            let mut coins = Vec::new();
            for (asset, amount) in assets {
                if let Some(coin) = self.coin(asset, amount).await? {
                    coins.push(coin);
                }
            }
            if coins.is_empty() {
                continue;
            }

            items.push(self.item(tx, receipt, sender, to, coins, memo, vault));
        }

        Ok(items)
    }

    /// Compare `block` with the stored meta of its parent. On a mismatch the
    /// orphaned blocks are walked back, their observed transactions are sent
    /// as errata and the height to rescan from is returned.
    async fn check_reorg(
        &self,
        block: &Block,
        errata: &mpsc::Sender<(Chain, ErrataBlock)>,
    ) -> Result<Option<u64>, Error> {
        let store = self.store();
        let Some(parent_height) = block.number.checked_sub(1) else {
            return Ok(None);
        };
        let Some(parent) = store.get_block_meta(parent_height).await? else {
            return Ok(None);
        };
        if parent.hash == format_hash(&block.parent_hash) {
            return Ok(None);
        }

        tracing::warn!(
            height = block.number,
            expected = %parent.hash,
            actual = %format_hash(&block.parent_hash),
            "re-org detected"
        );
        metrics::counter!(Metrics::ReorgsTotal, "chain" => self.chain().as_str()).increment(1);

        let floor = block.number.saturating_sub(self.config.max_reorg_depth.max(1));
        let mut orphaned = Vec::new();
        let mut height = parent_height;
        loop {
            let Some(meta) = store.get_block_meta(height).await? else {
                break;
            };
            let canonical = self.rpc.get_block(height).await?;
            if meta.hash == format_hash(&canonical.hash) {
                break;
            }
            orphaned.push(meta);
            if height <= floor || height == 0 {
                break;
            }
            height -= 1;
        }

        for meta in &orphaned {
            if !meta.transactions.is_empty() {
                let txs = meta
                    .transactions
                    .iter()
                    .map(|tx_id| ErrataTx { tx_id: tx_id.clone(), chain: self.chain() })
                    .collect();
                errata
                    .send((self.chain(), ErrataBlock { height: meta.height, txs }))
                    .await
                    .map_err(|_| Error::ChannelClosed("errata"))?;
            }
            store.delete_block_meta(meta.height).await?;
        }

        let rescan_from = orphaned
            .iter()
            .map(|meta| meta.height)
            .min()
            .unwrap_or(block.number);
        if let Some(position) = rescan_from.checked_sub(1) {
            store.set_scanner_position(position).await?;
        }
        tracing::info!(rescan_from, orphaned = orphaned.len(), "rescanning after re-org");
        Ok(Some(rescan_from))
    }

    /// Scan the block at `height` and forward its transactions. Returns the
    /// next height to scan, which is lower than `height` after a re-org.
    pub async fn process_height(
        &self,
        height: u64,
        inbound: &mpsc::Sender<TxIn>,
        errata: &mpsc::Sender<(Chain, ErrataBlock)>,
        solvency: &mpsc::Sender<Solvency>,
    ) -> Result<u64, Error> {
        let block = self.rpc.get_block(height).await?;
        if let Some(rescan_from) = self.check_reorg(&block, errata).await? {
            return Ok(rescan_from);
        }

        let tx_in = self.scan_block(&block).await?;

        let store = self.store();
        let mut meta = BlockMeta::new(
            block.number,
            format_hash(&block.hash),
            format_hash(&block.parent_hash),
        );
        meta.transactions = tx_in.items.iter().map(|item| item.tx.clone()).collect();
        meta.transactions.dedup();
        store.save_block_meta(&meta).await?;
        store
            .prune_block_metas(height, self.config.block_meta_retention)
            .await?;
        store.set_scanner_position(height).await?;

        self.health.record_scan(height);
        self.height_tx.send_replace(height);

        if !tx_in.is_empty() {
            tracing::info!(height, count = tx_in.items.len(), "observed transactions");
            inbound
                .send(tx_in)
                .await
                .map_err(|_| Error::ChannelClosed("inbound"))?;
        }

        if self.solvency.is_scheduled(height) {
            if let Err(error) = self.solvency.report(height, false, solvency).await {
                tracing::warn!(%error, height, "scheduled solvency check failed");
            }
        }

        self.context
            .signal(BifrostEvent::BlockScanned { chain: self.chain(), height }.into())?;
        metrics::counter!(Metrics::BlocksScannedTotal, "chain" => self.chain().as_str())
            .increment(1);
        metrics::gauge!(Metrics::ScannedHeight, "chain" => self.chain().as_str())
            .set(height as f64);

        Ok(height + 1)
    }

    /// Run until shutdown is signalled.
    #[tracing::instrument(skip_all, name = "block-scanner", fields(chain = %self.chain()))]
    pub async fn run(
        self,
        inbound: mpsc::Sender<TxIn>,
        errata: mpsc::Sender<(Chain, ErrataBlock)>,
        solvency: mpsc::Sender<Solvency>,
        mut term: TerminationHandle,
    ) -> Result<(), Error> {
        self.save_whitelist_tokens().await?;

        let mut next = loop {
            match self.start_height().await {
                Ok(height) => break height,
                Err(error) => tracing::warn!(%error, "could not determine the start height"),
            }
            tokio::select! {
                _ = term.wait_for_shutdown() => return Ok(()),
                _ = tokio::time::sleep(self.config.block_poll_interval) => {}
            }
        };
        tracing::info!(start_height = next, "starting block scanner");

        loop {
            if term.shutdown_signalled() {
                break;
            }

            match self.rpc.get_height().await {
                Ok(tip) => {
                    self.health.record_tip(tip);
                    let target = tip.saturating_sub(self.config.block_lag);
                    while next <= target && !term.shutdown_signalled() {
                        match self.process_height(next, &inbound, &errata, &solvency).await {
                            Ok(height) => next = height,
                            Err(Error::ChannelClosed(channel)) => {
                                tracing::info!(channel, "queue closed, stopping block scanner");
                                return Ok(());
                            }
                            Err(error) => {
                                tracing::warn!(%error, height = next, "could not scan block");
                                metrics::counter!(
                                    Metrics::BlockScanErrorsTotal,
                                    "chain" => self.chain().as_str()
                                )
                                .increment(1);
                                break;
                            }
                        }
                    }
                }
                Err(error) => tracing::warn!(%error, "could not fetch the chain height"),
            }

            tokio::select! {
                _ = term.wait_for_shutdown() => break,
                _ = tokio::time::sleep(self.config.block_poll_interval) => {}
            }
        }

        tracing::info!("block scanner stopped");
        Ok(())
    }
}

/// The memo carried by native transfer call data. Memos that are not UTF-8
/// or too long are rejected.
fn decode_memo(input: &[u8]) -> Option<String> {
    if input.len() > MAX_MEMO_SIZE {
        return None;
    }
    String::from_utf8(input.to_vec()).ok()
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(b"=:ETH.ETH", Some("=:ETH.ETH"); "ascii")]
    #[test_case(b"", Some(""); "empty")]
    #[test_case(&[0xff, 0xfe], None; "not utf8")]
    #[test_case(&[b'a'; 151], None; "too long")]
    fn memos_are_decoded_from_call_data(input: &[u8], expected: Option<&str>) {
        assert_eq!(decode_memo(input).as_deref(), expected);
    }

    #[test]
    fn health_needs_a_recent_scan_close_to_the_tip() {
        let health = ScannerHealth::new();
        assert!(!health.is_healthy(Duration::from_secs(60), 10));

        health.record_tip(100);
        health.record_scan(95);
        assert!(health.is_healthy(Duration::from_secs(60), 10));
        assert!(!health.is_healthy(Duration::from_secs(60), 4));

        health.record_tip(200);
        assert!(!health.is_healthy(Duration::from_secs(60), 10));
        assert!(!ScannerHealth::new().is_healthy(Duration::ZERO, u64::MAX));
    }

    #[test]
    fn hashes_are_stored_lower_case() {
        let hash = B256::repeat_byte(0xab);
        assert_eq!(format_hash(&hash), format!("0x{}", "ab".repeat(32)));
    }
}
