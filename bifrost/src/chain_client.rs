//! # Chain client
//!
//! A [`ChainClient`] is everything the bridge runs for one external chain.
//! The inbound side is the [`BlockScanner`] together with the solvency and
//! unstuck runners, all started by [`ChainClient::start`]. The outbound
//! side is [`ChainClient::sign_and_broadcast`], which turns a ledger
//! instruction into a signed router call and puts it on chain.
//!
//! Outbounds of one chain are serialised by a mutex shared with the
//! [`UnstuckRunner`], since both pick the vault nonce from the node.

use std::sync::Arc;
use std::sync::Mutex;

use alloy::primitives::keccak256;
use alloy::primitives::Address;
use alloy::primitives::U256;
use ledger::asset::Coin;
use ledger::chain::Chain;
use ledger::keys::PublicKey;
use ledger::memo::Memo;
use ledger::tx::TxId;
use ledger::tx::TxIn;
use ledger::tx_out::TxOutItem;
use ledger::vault::ErrataBlock;
use ledger::vault::Solvency;
use ledger::vault::Vault;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::block_scanner::BlockScanner;
use crate::block_scanner::ScannerHealth;
use crate::chain::router::RouterCall;
use crate::chain::router::NATIVE_ASSET;
use crate::chain::transaction;
use crate::chain::transaction::LegacyTransaction;
use crate::chain::CallRequest;
use crate::chain::ChainRpc;
use crate::config::ChainConfig;
use crate::context::BifrostEvent;
use crate::context::Context;
use crate::context::TerminationHandle;
use crate::error::Error;
use crate::gas::GasPriceOracle;
use crate::ledger_client::LedgerInteract as _;
use crate::metrics::Metrics;
use crate::profile::ChainProfile;
use crate::profile::NATIVE_DECIMALS;
use crate::solvency::SolvencyReporter;
use crate::solvency::SolvencyRunner;
use crate::storage::model::SignedTxItem;
use crate::storage::BlockMetaStore;
use crate::storage::SignerCache;
use crate::tss::SignRequest;
use crate::tss::TssSigner;
use crate::unstuck::UnstuckRunner;

/// Wei per gwei, the unit of the ledger's gas rate.
const WEI_PER_GWEI: u128 = 1_000_000_000;

/// Wei per ledger unit of the gas asset.
const WEI_PER_LEDGER_UNIT: u128 = 10_000_000_000;

/// A signed outbound, ready to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    /// The transaction that was signed.
    pub tx: LegacyTransaction,
    /// The signed encoding.
    pub raw: Vec<u8>,
    /// The hash of the signed transaction.
    pub tx_id: TxId,
}

/// Sign `tx` with the vault key through the TSS daemon and return the
/// signed encoding.
pub(crate) async fn sign_with_vault<C, P>(
    context: &C,
    profile: &P,
    tx: &LegacyTransaction,
    pub_key: PublicKey,
    height: u64,
    memo: String,
    coins: Vec<Coin>,
) -> Result<Vec<u8>, Error>
where
    C: Context,
    P: ChainProfile,
{
    let hash = profile.signing_hash(tx);
    let signer = TssSigner::new(
        context.get_tss_client(),
        context.get_ledger_client(),
        context.config().tss.keysign_timeout,
    );
    let request = SignRequest {
        message: hash.0,
        pub_key,
        height,
        memo,
        coins,
    };
    let compact = signer.sign(&request).await?;
    let signature = transaction::recover_signature(hash, &compact, &pub_key)?;
    Ok(profile.encode_signed(tx, &signature))
}

/// The hash of a signed transaction.
pub fn signed_tx_id(raw: &[u8]) -> TxId {
    TxId::from_bytes(keccak256(raw).as_slice())
}

/// The client of one external chain.
pub struct ChainClient<C, R, P> {
    context: C,
    rpc: R,
    profile: Arc<P>,
    config: ChainConfig,
    oracle: Arc<Mutex<GasPriceOracle>>,
    health: Arc<ScannerHealth>,
    sign_lock: Arc<tokio::sync::Mutex<()>>,
    height_tx: Arc<watch::Sender<u64>>,
    term: TerminationHandle,
    tasks: Mutex<Vec<JoinHandle<Result<(), Error>>>>,
    solvency_tx: Mutex<Option<mpsc::Sender<Solvency>>>,
}

impl<C, R, P> ChainClient<C, R, P>
where
    C: Context + 'static,
    R: ChainRpc + Clone + 'static,
    P: ChainProfile,
{
    /// Create the client of the chain described by `profile`.
    pub fn new(context: C, rpc: R, profile: P, config: ChainConfig) -> Self {
        let oracle = GasPriceOracle::new(
            config.gas_cache_blocks,
            config.gas_price_resolution as u128,
            config.default_gas_price as u128,
        );
        let (height_tx, _) = watch::channel(0);

        Self {
            context,
            rpc,
            profile: Arc::new(profile),
            config,
            oracle: Arc::new(Mutex::new(oracle)),
            health: Arc::new(ScannerHealth::new()),
            sign_lock: Arc::new(tokio::sync::Mutex::new(())),
            height_tx: Arc::new(height_tx),
            term: TerminationHandle::detached(),
            tasks: Mutex::new(Vec::new()),
            solvency_tx: Mutex::new(None),
        }
    }

    /// The chain of this client.
    pub fn get_chain(&self) -> Chain {
        self.profile.chain()
    }

    /// The profile of the chain.
    pub fn profile(&self) -> &P {
        &self.profile
    }

    /// The height of the chain tip.
    pub async fn get_height(&self) -> Result<u64, Error> {
        self.rpc.get_height().await
    }

    /// Follows the last height the scanner completed.
    pub fn height_receiver(&self) -> watch::Receiver<u64> {
        self.height_tx.subscribe()
    }

    /// Whether the scanner keeps up with the chain.
    pub fn is_block_scanner_healthy(&self) -> bool {
        self.health
            .is_healthy(self.config.healthy_period, self.config.max_healthy_lag_blocks)
    }

    /// The current gas price estimate, in wei.
    pub fn gas_price(&self) -> u128 {
        self.oracle
            .lock()
            .map(|oracle| oracle.gas_price())
            .unwrap_or(self.config.default_gas_price as u128)
    }

    /// The balance of `address` in the native coin, or in `token` when
    /// given, in the asset's smallest unit. The latest block is used when
    /// no height is given.
    pub async fn get_balance(
        &self,
        address: &str,
        token: Option<&str>,
        height: Option<u64>,
    ) -> Result<U256, Error> {
        let address = self.profile.parse_address(address)?;
        let token = token
            .map(|token| self.profile.parse_address(token))
            .transpose()?;
        self.rpc.get_balance(address, token, height).await
    }

    fn solvency_reporter(&self) -> SolvencyReporter<C, R, P> {
        SolvencyReporter::new(
            self.context.clone(),
            self.rpc.clone(),
            Arc::clone(&self.profile),
            self.config.clone(),
            Arc::clone(&self.oracle),
            Arc::clone(&self.health),
        )
    }

    /// Start the scanner and the periodic runners. Observed transactions go
    /// to `inbound`, orphaned blocks to `errata` and solvency reports to
    /// `solvency`.
    pub fn start(
        &self,
        inbound: mpsc::Sender<TxIn>,
        errata: mpsc::Sender<(Chain, ErrataBlock)>,
        solvency: mpsc::Sender<Solvency>,
    ) {
        let chain = self.get_chain();
        tracing::info!(%chain, "starting chain client");

        if let Ok(mut solvency_tx) = self.solvency_tx.lock() {
            *solvency_tx = Some(solvency.clone());
        }

        let scanner = BlockScanner::new(
            self.context.clone(),
            self.rpc.clone(),
            Arc::clone(&self.profile),
            self.config.clone(),
            Arc::clone(&self.oracle),
            Arc::clone(&self.health),
            self.solvency_reporter(),
            Arc::clone(&self.height_tx),
        );
        let runner = SolvencyRunner::new(self.solvency_reporter(), solvency.clone());
        let unstuck = UnstuckRunner::new(
            self.context.clone(),
            self.rpc.clone(),
            Arc::clone(&self.profile),
            self.config.clone(),
            Arc::clone(&self.oracle),
            Arc::clone(&self.sign_lock),
        );

        // The client stops when asked to, or when the whole bridge stops.
        let mut global = self.context.get_termination_handle();
        let local = self.term.clone();
        let forwarder = tokio::spawn(async move {
            let mut watched = local.clone();
            tokio::select! {
                _ = global.wait_for_shutdown() => local.signal_shutdown(),
                _ = watched.wait_for_shutdown() => {}
            }
            Ok::<_, Error>(())
        });

        let handles = vec![
            forwarder,
            tokio::spawn(scanner.run(inbound, errata, solvency, self.term.clone())),
            tokio::spawn(runner.run(self.term.clone())),
            tokio::spawn(unstuck.run(self.term.clone())),
        ];
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.extend(handles);
        }
    }

    /// Stop the client and wait for its tasks.
    pub async fn stop(&self) {
        tracing::info!(chain = %self.get_chain(), "stopping chain client");
        self.term.signal_shutdown();

        let handles = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => tracing::warn!(%error, "chain client task failed"),
                Err(error) => tracing::warn!(%error, "chain client task panicked"),
            }
        }
    }

    /// Check the vaults at chain `height` and send the reports to the
    /// solvency queue given to [`ChainClient::start`]. Returns the number of
    /// reports sent.
    pub async fn report_solvency(&self, height: u64, force: bool) -> Result<usize, Error> {
        let sender = self
            .solvency_tx
            .lock()
            .ok()
            .and_then(|sender| sender.clone())
            .ok_or(Error::ChannelClosed("solvency"))?;
        self.solvency_reporter().report(height, force, &sender).await
    }

    /// Resolve the asset of an outbound coin to its router address and its
    /// on-chain decimals.
    async fn router_asset(&self, coin: &Coin) -> Result<(Address, u8), Error> {
        if coin.asset == self.profile.gas_asset() {
            return Ok((NATIVE_ASSET, NATIVE_DECIMALS));
        }
        let contract = coin
            .asset
            .contract_address()
            .ok_or(Error::InvalidTxOutItem("coin is neither the gas asset nor a token"))?;
        let token = self.profile.parse_address(contract)?;
        let decimals = match coin.decimals {
            0 => BlockMetaStore::new(self.get_chain(), self.context.get_storage_mut())
                .get_token_meta(&contract.to_lowercase())
                .await?
                .map(|meta| meta.decimals)
                .unwrap_or(NATIVE_DECIMALS),
            decimals => decimals,
        };
        Ok((token, decimals))
    }

    fn vault_router(&self, vault: &Vault) -> Result<Address, Error> {
        let router = vault
            .router(self.get_chain())
            .ok_or(Error::InvalidTxOutItem("vault has no router on this chain"))?;
        self.profile.parse_address(router)
    }

    /// Parse an address that has to survive a round trip through its
    /// canonical form.
    fn canonical_address(&self, address: &str) -> Option<Address> {
        let parsed = self.profile.parse_address(address).ok()?;
        self.profile
            .format_address(&parsed)
            .eq_ignore_ascii_case(address.trim())
            .then_some(parsed)
    }

    /// Build the router call of an outbound. `Ok(None)` means the item can
    /// not be built and the attempt is abandoned.
    async fn build_call(
        &self,
        item: &TxOutItem,
        memo: &Memo,
        vaults: &[Vault],
    ) -> Result<Option<(Address, RouterCall, bool)>, Error> {
        let to = self.profile.parse_address(&item.to_address)?;
        let (asset, decimals) = self.router_asset(&item.coin).await?;
        let amount = self.profile.from_ledger_amount(item.coin.amount, decimals);

        let source = vaults
            .iter()
            .find(|vault| vault.pub_key == item.vault_pub_key)
            .ok_or(Error::InvalidTxOutItem("unknown vault"))?;
        let target = vaults
            .iter()
            .find(|vault| self.profile.address_of(&vault.pub_key) == to);
        let router = self.vault_router(source)?;

        let call = match memo {
            Memo::Outbound { .. } | Memo::Refund { .. } | Memo::Ragnarok { .. }
                if !item.aggregator.is_empty() =>
            {
                if asset != NATIVE_ASSET {
                    return Err(Error::InvalidTxOutItem("aggregator outbounds must be native"));
                }
                let Some(aggregator) = self.canonical_address(&item.aggregator) else {
                    tracing::warn!(aggregator = %item.aggregator, "dropping outbound with an invalid aggregator");
                    return Ok(None);
                };
                let Some(final_token) = self.canonical_address(&item.aggregator_target_asset) else {
                    tracing::warn!(
                        target_asset = %item.aggregator_target_asset,
                        "dropping outbound with an invalid aggregator target"
                    );
                    return Ok(None);
                };
                RouterCall::TransferOutAndCall {
                    aggregator,
                    final_token,
                    to,
                    amount,
                    amount_out_min: U256::from(item.aggregator_target_limit.unwrap_or_default()),
                    memo: item.memo.clone(),
                }
            }
            Memo::Outbound { .. } | Memo::Refund { .. } | Memo::Ragnarok { .. } => {
                RouterCall::TransferOut { to, asset, amount, memo: item.memo.clone() }
            }
            Memo::Migrate { .. } | Memo::YggdrasilFund { .. } if asset == NATIVE_ASSET => {
                RouterCall::Transfer { to, amount, memo: item.memo.clone() }
            }
            Memo::Migrate { .. } | Memo::YggdrasilFund { .. } => {
                let target_router = match target {
                    Some(vault) => self.vault_router(vault).unwrap_or(router),
                    None => router,
                };
                RouterCall::TransferAllowance {
                    router: target_router,
                    new_vault: to,
                    asset,
                    amount,
                    memo: item.memo.clone(),
                }
            }
            Memo::YggdrasilReturn { .. } => {
                let asgard_router = match target {
                    Some(vault) => self.vault_router(vault).unwrap_or(router),
                    None => router,
                };
                let call = RouterCall::ReturnVaultAssets {
                    router: asgard_router,
                    asgard: to,
                    coins: vec![(asset, amount)],
                    memo: item.memo.clone(),
                };
                return Ok(Some((router, call, asgard_router != router)));
            }
            Memo::Inbound(_) => return Err(Error::InboundMemoOnOutbound(item.memo.clone())),
        };

        Ok(Some((router, call, false)))
    }

    /// Build and sign the transaction of an outbound. Returns `None` when
    /// the item was already signed or the attempt had to be abandoned.
    #[tracing::instrument(skip_all, fields(chain = %self.get_chain(), in_hash = %item.in_hash, height = height))]
    pub async fn sign_tx(&self, item: &TxOutItem, height: u64) -> Result<Option<SignedTx>, Error> {
        if item.chain != self.get_chain() {
            return Err(Error::ChainMismatch(item.chain, self.get_chain()));
        }

        let cache = SignerCache::new(self.get_chain(), self.context.get_storage_mut());
        if let Some(tx_id) = cache.signed_tx(item).await? {
            tracing::info!(%tx_id, "outbound was already signed");
            metrics::counter!(Metrics::OutboundsSkippedTotal, "chain" => self.get_chain().as_str())
                .increment(1);
            return Ok(None);
        }

        if item.to_address.trim().is_empty() {
            return Err(Error::InvalidTxOutItem("empty destination"));
        }
        if item.memo.trim().is_empty() {
            return Err(Error::InvalidTxOutItem("empty memo"));
        }
        self.profile.parse_address(&item.to_address)?;

        let ledger = self.context.get_ledger_client();
        let version = ledger.get_protocol_version().await?;
        let memo = Memo::parse_with_version(version, &item.memo)?;
        if memo.is_inbound() {
            return Err(Error::InboundMemoOnOutbound(item.memo.clone()));
        }

        let vaults = ledger.get_asgard_vaults().await?;
        let Some((router, mut call, router_changed)) = self.build_call(item, &memo, &vaults).await?
        else {
            return Ok(None);
        };

        let from = self.profile.address_of(&item.vault_pub_key);
        let mut gas_price = (item.gas_rate as u128)
            .saturating_mul(WEI_PER_GWEI)
            .max(self.gas_price());

        let contract_call = self.profile.encode_router_call(router, &call);
        let request = CallRequest {
            from,
            to: contract_call.to,
            value: contract_call.value,
            data: contract_call.data.clone(),
        };
        let mut gas_limit = match self.rpc.estimate_gas(&request).await {
            Ok(estimate) => estimate,
            Err(error) => {
                tracing::warn!(%error, "gas estimation failed, abandoning the outbound");
                return Ok(None);
            }
        };
        if router_changed {
            gas_limit = gas_limit.saturating_mul(3) / 2;
        }

        let max_gas = item.max_gas_amount().saturating_mul(WEI_PER_LEDGER_UNIT);
        let cost = (gas_limit as u128).saturating_mul(gas_price);
        if max_gas > 0 && cost > max_gas {
            let value = call.native_value();
            if memo.is_internal() && !value.is_zero() {
                let shortfall = U256::from(cost - max_gas);
                if shortfall >= value {
                    tracing::warn!(%value, %shortfall, "gas exceeds the value of the move, abandoning");
                    return Ok(None);
                }
                tracing::info!(%shortfall, "paying the gas shortfall from the moved value");
                call = call.with_native_value(value - shortfall);
            } else {
                gas_price = max_gas / (gas_limit.max(1) as u128);
                tracing::info!(gas_price, "capping the gas price to the budget");
            }
        }

        let contract_call = self.profile.encode_router_call(router, &call);
        let nonce = self.rpc.get_nonce(from).await?;
        let tx = self
            .profile
            .build_transaction(nonce, gas_price, gas_limit, &contract_call);

        let raw = sign_with_vault(
            &self.context,
            self.profile.as_ref(),
            &tx,
            item.vault_pub_key,
            height,
            item.memo.clone(),
            vec![item.coin.clone()],
        )
        .await?;

        let tx_id = signed_tx_id(&raw);
        tracing::debug!(%tx_id, nonce, gas_price, gas_limit, "signed outbound");
        Ok(Some(SignedTx { tx, raw, tx_id }))
    }

    /// Broadcast a signed outbound. A node that already knows the
    /// transaction, or already moved past its nonce, is not an error.
    pub async fn broadcast_tx(&self, item: &TxOutItem, raw: &[u8]) -> Result<TxId, Error> {
        match self.rpc.send_raw_transaction(raw).await {
            Ok(hash) => Ok(TxId::from_bytes(hash.as_slice())),
            Err(Error::ChainRpc(_, error)) if error.kind.is_benign_broadcast() => {
                let tx_id = signed_tx_id(raw);
                tracing::info!(%tx_id, in_hash = %item.in_hash, kind = ?error.kind, "outbound was already broadcast");
                Ok(tx_id)
            }
            Err(error) => Err(error),
        }
    }

    /// Sign and broadcast an outbound once. Returns the hash of the
    /// broadcast transaction, or `None` when nothing was sent.
    pub async fn sign_and_broadcast(&self, item: &TxOutItem, height: u64) -> Result<Option<TxId>, Error> {
        let _guard = self.sign_lock.lock().await;

        let Some(signed) = self.sign_tx(item, height).await? else {
            return Ok(None);
        };
        let tx_id = self.broadcast_tx(item, &signed.raw).await?;

        let chain = self.get_chain();
        SignerCache::new(chain, self.context.get_storage_mut())
            .set_signed(item, &tx_id)
            .await?;
        let tracked = SignedTxItem {
            hash: tx_id.clone(),
            height,
            vault_pub_key: item.vault_pub_key,
        };
        BlockMetaStore::new(chain, self.context.get_storage_mut())
            .add_signed_tx_item(&tracked)
            .await?;

        tracing::info!(%chain, %tx_id, in_hash = %item.in_hash, "broadcast outbound");
        metrics::counter!(Metrics::OutboundsBroadcastTotal, "chain" => chain.as_str()).increment(1);
        self.context
            .signal(BifrostEvent::OutboundBroadcast { chain, tx_id: tx_id.clone() }.into())?;

        Ok(Some(tx_id))
    }
}
