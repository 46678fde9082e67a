//! Replaces outbounds that stay pending for too long.

use std::sync::Arc;
use std::sync::Mutex;

use alloy::primitives::B256;
use alloy::primitives::Bytes;
use alloy::primitives::U256;
use ledger::chain::Chain;
use ledger::tx::TxId;

use crate::chain::router::ContractCall;
use crate::chain::ChainRpc;
use crate::chain_client::sign_with_vault;
use crate::chain_client::signed_tx_id;
use crate::config::ChainConfig;
use crate::context::BifrostEvent;
use crate::context::Context;
use crate::context::TerminationHandle;
use crate::error::Error;
use crate::error::RpcErrorKind;
use crate::gas::GasPriceOracle;
use crate::ledger_client::LedgerInteract as _;
use crate::metrics::Metrics;
use crate::profile::ChainProfile;
use crate::profile::TRANSFER_GAS;
use crate::storage::model::SignedTxItem;
use crate::storage::BlockMetaStore;

/// What happened to a tracked transaction on one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnstuckOutcome {
    /// It has not waited long enough yet.
    Waiting,
    /// The node does not know it anymore, it is no longer tracked.
    Dropped,
    /// It was included in a block, it is no longer tracked.
    Confirmed,
    /// A replacement was broadcast and is tracked instead.
    Replaced(TxId),
}

/// Finds tracked transactions that have been pending for more than
/// `unstuck_wait_blocks` ledger blocks and cancels them with a zero value
/// self-send at the same nonce and a higher gas price.
pub struct UnstuckRunner<C, R, P> {
    context: C,
    rpc: R,
    profile: Arc<P>,
    config: ChainConfig,
    oracle: Arc<Mutex<GasPriceOracle>>,
    sign_lock: Arc<tokio::sync::Mutex<()>>,
}

impl<C, R, P> UnstuckRunner<C, R, P>
where
    C: Context + 'static,
    R: ChainRpc + Clone + 'static,
    P: ChainProfile,
{
    /// Create a runner. `sign_lock` is the lock outbound signing of the
    /// chain holds.
    pub fn new(
        context: C,
        rpc: R,
        profile: Arc<P>,
        config: ChainConfig,
        oracle: Arc<Mutex<GasPriceOracle>>,
        sign_lock: Arc<tokio::sync::Mutex<()>>,
    ) -> Self {
        Self { context, rpc, profile, config, oracle, sign_lock }
    }

    fn chain(&self) -> Chain {
        self.profile.chain()
    }

    fn parse_hash(tx_id: &TxId) -> Result<B256, Error> {
        let bytes = hex::decode(tx_id.as_str())
            .map_err(|_| Error::UnexpectedChainRpcResponse(format!("invalid hash {tx_id}").into()))?;
        if bytes.len() != 32 {
            return Err(Error::UnexpectedChainRpcResponse(format!("invalid hash {tx_id}").into()));
        }
        Ok(B256::from_slice(&bytes))
    }

    /// Check every tracked transaction once at ledger height `height`.
    pub async fn unstuck(&self, height: u64) -> Result<Vec<(TxId, UnstuckOutcome)>, Error> {
        let _guard = self.sign_lock.lock().await;

        let store = BlockMetaStore::new(self.chain(), self.context.get_storage_mut());
        let mut outcomes = Vec::new();
        for item in store.get_signed_tx_items().await? {
            let outcome = match self.unstuck_item(&item, height).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::warn!(%error, tx_id = %item.hash, "could not unstick transaction");
                    continue;
                }
            };
            outcomes.push((item.hash, outcome));
        }
        Ok(outcomes)
    }

    #[tracing::instrument(skip_all, fields(chain = %self.chain(), tx_id = %item.hash))]
    async fn unstuck_item(&self, item: &SignedTxItem, height: u64) -> Result<UnstuckOutcome, Error> {
        if height < item.height.saturating_add(self.config.unstuck_wait_blocks) {
            return Ok(UnstuckOutcome::Waiting);
        }

        let store = BlockMetaStore::new(self.chain(), self.context.get_storage_mut());
        let hash = Self::parse_hash(&item.hash)?;
        let Some(stuck) = self.rpc.get_transaction(hash).await? else {
            tracing::info!("transaction is unknown to the node, no longer tracking it");
            store.remove_signed_tx_item(&item.hash).await?;
            return Ok(UnstuckOutcome::Dropped);
        };
        if stuck.block_number.is_some() {
            tracing::debug!("transaction was confirmed");
            store.remove_signed_tx_item(&item.hash).await?;
            return Ok(UnstuckOutcome::Confirmed);
        }

        let current = self
            .oracle
            .lock()
            .map(|oracle| oracle.gas_price())
            .unwrap_or(self.config.default_gas_price as u128);
        let gas_price = self.profile.bump_gas_price(stuck.gas_price, current);
        let vault = self.profile.address_of(&item.vault_pub_key);
        let call = ContractCall {
            to: vault,
            value: U256::ZERO,
            data: Bytes::new(),
        };
        let tx = self
            .profile
            .build_transaction(stuck.nonce, gas_price, TRANSFER_GAS, &call);

        let raw = sign_with_vault(
            &self.context,
            self.profile.as_ref(),
            &tx,
            item.vault_pub_key,
            height,
            String::new(),
            Vec::new(),
        )
        .await?;

        let tx_id = match self.rpc.send_raw_transaction(&raw).await {
            Ok(hash) => TxId::from_bytes(hash.as_slice()),
            Err(Error::ChainRpc(_, error)) if error.kind == RpcErrorKind::AlreadyKnown => {
                signed_tx_id(&raw)
            }
            Err(error) => return Err(error),
        };

        let replacement = SignedTxItem {
            hash: tx_id.clone(),
            height,
            vault_pub_key: item.vault_pub_key,
        };
        store.add_signed_tx_item(&replacement).await?;
        store.remove_signed_tx_item(&item.hash).await?;

        tracing::info!(replacement = %tx_id, nonce = stuck.nonce, gas_price, "replaced stuck transaction");
        metrics::counter!(Metrics::UnstuckRebroadcastsTotal, "chain" => self.chain().as_str())
            .increment(1);
        self.context.signal(
            BifrostEvent::UnstuckRebroadcast {
                chain: self.chain(),
                replaced: item.hash.clone(),
                tx_id: tx_id.clone(),
            }
            .into(),
        )?;

        Ok(UnstuckOutcome::Replaced(tx_id))
    }

    /// Run until shutdown is signalled.
    #[tracing::instrument(skip_all, name = "unstuck-runner", fields(chain = %self.chain()))]
    pub async fn run(self, mut term: TerminationHandle) -> Result<(), Error> {
        let mut interval = tokio::time::interval(self.config.unstuck_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if term.shutdown_signalled() {
                break;
            }

            tokio::select! {
                _ = term.wait_for_shutdown() => break,
                _ = interval.tick() => {}
            }

            let height = match self.context.get_ledger_client().get_block_height().await {
                Ok(height) => height,
                Err(error) => {
                    tracing::warn!(%error, "could not fetch the ledger height");
                    continue;
                }
            };
            if let Err(error) = self.unstuck(height).await {
                tracing::warn!(%error, "unstuck pass failed");
            }
        }

        tracing::info!("unstuck runner stopped");
        Ok(())
    }
}
