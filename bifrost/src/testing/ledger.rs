//! An in-memory ledger backed by [`ObservationConsensus`].

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;

use ledger::chain::Chain;
use ledger::consensus::ObservationConsensus;
use ledger::keys::PublicKey;
use ledger::keysign::KeysignFailure;
use ledger::observed::ObservedTx;
use ledger::tx::TxId;
use ledger::tx_out::TxOutItem;
use ledger::vault::ErrataBlock;
use ledger::vault::NetworkFee;
use ledger::vault::Solvency;
use ledger::vault::Vault;
use tokio::sync::Mutex;

use crate::error::Error;
use crate::ledger_client::LedgerInteract;

/// Everything the ledger was told, and what it answers with.
#[derive(Debug, Default)]
pub struct LedgerState {
    /// The observation voters.
    pub consensus: ObservationConsensus,
    /// The ledger height.
    pub height: u64,
    /// The protocol version.
    pub protocol_version: u64,
    /// The vaults.
    pub vaults: Vec<Vault>,
    /// Outbound items by chain, handed out at every height.
    pub outbound_items: BTreeMap<Chain, Vec<TxOutItem>>,
    /// Chains that are halted.
    pub halted: HashSet<Chain>,
    /// Every observation submission, with its submitter.
    pub observations: Vec<(PublicKey, Chain, ObservedTx)>,
    /// Posted network fees.
    pub network_fees: Vec<NetworkFee>,
    /// Posted keysign failures.
    pub keysign_failures: Vec<KeysignFailure>,
    /// Posted errata.
    pub errata: Vec<(Chain, ErrataBlock)>,
    /// Posted solvency reports.
    pub solvency: Vec<Solvency>,
    /// The number of upcoming submissions to fail as if the ledger was
    /// unavailable.
    pub reject_submissions: usize,
    /// The number of upcoming submissions to refuse outright.
    pub refuse_submissions: usize,
}

/// A ledger that keeps everything in memory. Clones share the state; each
/// clone submits as its own validator, see [`InMemoryLedger::with_signer`].
#[derive(Debug, Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    signer: PublicKey,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    /// Create a ledger with `ledger::testing::public_key(1)` as the only
    /// active validator and no vaults.
    pub fn new() -> Self {
        let signer = ledger::testing::public_key(1);
        let state = LedgerState {
            consensus: ObservationConsensus::new([signer]),
            protocol_version: u64::MAX,
            ..LedgerState::default()
        };
        Self { state: Arc::new(Mutex::new(state)), signer }
    }

    /// A handle on the same ledger that submits as `signer`.
    pub fn with_signer(&self, signer: PublicKey) -> Self {
        Self { state: Arc::clone(&self.state), signer }
    }

    /// The validator this handle submits as.
    pub fn signer(&self) -> PublicKey {
        self.signer
    }

    /// Direct access to the state.
    pub async fn state(&self) -> tokio::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().await
    }

    /// Replace the active validator set.
    pub async fn set_active_validators(&self, validators: impl IntoIterator<Item = PublicKey>) {
        self.state.lock().await.consensus.set_active_validators(validators);
    }

    /// Replace the vaults.
    pub async fn set_vaults(&self, vaults: Vec<Vault>) {
        self.state.lock().await.vaults = vaults;
    }

    /// Set the ledger height.
    pub async fn set_height(&self, height: u64) {
        let mut state = self.state.lock().await;
        state.height = height;
        state.consensus.set_height(height);
    }

    /// Halt or resume a chain.
    pub async fn set_halted(&self, chain: Chain, halted: bool) {
        let mut state = self.state.lock().await;
        if halted {
            state.halted.insert(chain);
        } else {
            state.halted.remove(&chain);
        }
    }

    /// Schedule an outbound.
    pub async fn add_outbound_item(&self, item: TxOutItem) {
        let mut state = self.state.lock().await;
        state.outbound_items.entry(item.chain).or_default().push(item);
    }

    /// Fail the next `count` submissions of any kind as if the ledger was
    /// unavailable.
    pub async fn reject_submissions(&self, count: usize) {
        self.state.lock().await.reject_submissions = count;
    }

    /// Refuse the next `count` submissions of any kind.
    pub async fn refuse_submissions(&self, count: usize) {
        self.state.lock().await.refuse_submissions = count;
    }

    /// The observations submitted so far.
    pub async fn observations(&self) -> Vec<(PublicKey, Chain, ObservedTx)> {
        self.state.lock().await.observations.clone()
    }

    /// The network fees posted so far.
    pub async fn network_fees(&self) -> Vec<NetworkFee> {
        self.state.lock().await.network_fees.clone()
    }

    /// The keysign failures posted so far.
    pub async fn keysign_failures(&self) -> Vec<KeysignFailure> {
        self.state.lock().await.keysign_failures.clone()
    }

    /// The errata posted so far.
    pub async fn errata(&self) -> Vec<(Chain, ErrataBlock)> {
        self.state.lock().await.errata.clone()
    }

    /// The solvency reports posted so far.
    pub async fn solvency(&self) -> Vec<Solvency> {
        self.state.lock().await.solvency.clone()
    }

    /// Whether the transaction reached consensus on a final report.
    pub async fn has_finalised(&self, tx_id: &TxId) -> bool {
        self.state.lock().await.consensus.has_finalised(tx_id)
    }

    fn check_rejection(state: &mut LedgerState) -> Result<(), Error> {
        if state.refuse_submissions > 0 {
            state.refuse_submissions -= 1;
            return Err(Error::LedgerRefused("submission refused".into()));
        }
        if state.reject_submissions > 0 {
            state.reject_submissions -= 1;
            return Err(Error::LedgerUnavailable("submission rejected".into()));
        }
        Ok(())
    }
}

impl LedgerInteract for InMemoryLedger {
    async fn get_block_height(&self) -> Result<u64, Error> {
        Ok(self.state.lock().await.height)
    }

    async fn get_protocol_version(&self) -> Result<u64, Error> {
        Ok(self.state.lock().await.protocol_version)
    }

    async fn get_asgard_vaults(&self) -> Result<Vec<Vault>, Error> {
        Ok(self.state.lock().await.vaults.clone())
    }

    async fn submit_observations(&self, chain: Chain, observations: Vec<ObservedTx>) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        Self::check_rejection(&mut state)?;
        for observation in observations {
            state
                .observations
                .push((self.signer, chain, observation.clone()));
            if let Err(error) = state.consensus.observe(self.signer, observation) {
                tracing::debug!(%error, "ledger rejected an observation");
            }
        }
        Ok(())
    }

    async fn post_network_fee(&self, fee: NetworkFee) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        Self::check_rejection(&mut state)?;
        state.network_fees.push(fee);
        Ok(())
    }

    async fn post_keysign_failure(&self, failure: KeysignFailure) -> Result<TxId, Error> {
        let mut state = self.state.lock().await;
        Self::check_rejection(&mut state)?;
        state.keysign_failures.push(failure);
        Ok(TxId::new(&format!("{:064X}", state.keysign_failures.len())))
    }

    async fn post_errata(&self, chain: Chain, errata: ErrataBlock) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        Self::check_rejection(&mut state)?;
        for tx in &errata.txs {
            if let Err(error) = state.consensus.errata(&tx.tx_id) {
                tracing::debug!(%error, "errata for an unknown transaction");
            }
        }
        state.errata.push((chain, errata));
        Ok(())
    }

    async fn post_solvency(&self, solvency: Solvency) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        Self::check_rejection(&mut state)?;
        state.solvency.push(solvency);
        Ok(())
    }

    async fn get_outbound_items(&self, chain: Chain, _height: u64) -> Result<Vec<TxOutItem>, Error> {
        let state = self.state.lock().await;
        Ok(state.outbound_items.get(&chain).cloned().unwrap_or_default())
    }

    async fn is_chain_halted(&self, chain: Chain) -> Result<bool, Error> {
        Ok(self.state.lock().await.halted.contains(&chain))
    }
}
