//! The per transaction record of validator reports.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::asset::Coin;
use crate::error::Error;
use crate::keys::PublicKey;
use crate::observed::ObservedTx;
use crate::observed::Status;
use crate::tx::Tx;
use crate::tx::TxId;
use crate::tx_out::TxOutItem;

/// Collects the reports validators made for one external transaction,
/// together with the outbound actions the ledger scheduled for it and the
/// outbound transactions that were observed fulfilling them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedTxVoter {
    /// The external transaction.
    pub tx_id: TxId,
    /// The agreed upon report, once a supermajority exists.
    pub tx: Option<ObservedTx>,
    /// Every distinct report with the validators that made it.
    pub txs: Vec<ObservedTx>,
    /// The outbound actions expected for this transaction.
    pub actions: Vec<TxOutItem>,
    /// The outbound transactions observed so far.
    pub out_txs: Vec<Tx>,
    /// The ledger height at which consensus was first reached.
    pub height: u64,
    /// The ledger height at which a final report first reached consensus.
    pub finalised_height: u64,
    /// Validators that reported after consensus was reached.
    pub late_signers: BTreeSet<PublicKey>,
    /// Whether the transaction was reverted by errata.
    pub reverted: bool,
}

impl ObservedTxVoter {
    /// Create an empty voter.
    pub fn new(tx_id: TxId) -> Self {
        Self {
            tx_id,
            tx: None,
            txs: Vec::new(),
            actions: Vec::new(),
            out_txs: Vec::new(),
            height: 0,
            finalised_height: 0,
            late_signers: BTreeSet::new(),
            reverted: false,
        }
    }

    /// Record a report made by `signer`.
    ///
    /// Every validator may make one non-final and one final report. A
    /// resubmission of an identical report returns `Ok(false)`; a report
    /// that differs from one the validator already made with the same
    /// finality is rejected.
    pub fn add(&mut self, observation: ObservedTx, signer: PublicKey) -> Result<bool, Error> {
        if self.reverted {
            return Err(Error::VoterReverted(self.tx_id.clone()));
        }

        let previous = self
            .txs
            .iter()
            .find(|existing| existing.is_final() == observation.is_final() && existing.has_signed(&signer));
        if let Some(previous) = previous {
            if previous.equals(&observation) {
                return Ok(false);
            }
            return Err(Error::NoTakeBacks {
                tx_id: self.tx_id.clone(),
                signer: signer.to_string(),
            });
        }

        if self.height > 0 {
            self.late_signers.insert(signer);
        }

        match self.txs.iter_mut().find(|existing| existing.equals(&observation)) {
            Some(existing) => {
                existing.sign(signer);
            }
            None => {
                let mut observation = observation;
                observation.signers.clear();
                observation.status = Status::Incomplete;
                observation.sign(signer);
                self.txs.push(observation);
            }
        }
        Ok(true)
    }

    /// The report group that has a supermajority of the active
    /// validators, preferring final reports over non-final ones.
    ///
    /// Because a validator makes at most one report per finality, at most
    /// one group of each finality can reach a supermajority. The remaining
    /// ordering exists so that the choice never depends on the order the
    /// reports arrived in.
    pub fn consensus_group(&self, active: &BTreeSet<PublicKey>) -> Option<&ObservedTx> {
        self.txs
            .iter()
            .filter(|group| crate::has_super_majority(group.active_signer_count(active), active.len()))
            .max_by(|a, b| {
                a.is_final()
                    .cmp(&b.is_final())
                    .then_with(|| a.active_signer_count(active).cmp(&b.active_signer_count(active)))
                    .then_with(|| b.finalise_height.cmp(&a.finalise_height))
                    .then_with(|| b.observed_pub_key.cmp(&a.observed_pub_key))
            })
    }

    /// Whether any report group has a supermajority.
    pub fn has_consensus(&self, active: &BTreeSet<PublicKey>) -> bool {
        self.consensus_group(active).is_some()
    }

    /// Whether a final report group has a supermajority.
    pub fn has_finalised(&self, active: &BTreeSet<PublicKey>) -> bool {
        self.consensus_group(active).is_some_and(ObservedTx::is_final)
    }

    /// Recompute the consensus report from every recorded report. The
    /// heights at which consensus and finality were first reached are
    /// recorded with the given ledger height.
    pub fn update_consensus(&mut self, active: &BTreeSet<PublicKey>, ledger_height: u64) {
        let Some(group) = self.consensus_group(active).cloned() else {
            return;
        };
        if self.height == 0 {
            self.height = ledger_height;
        }
        if group.is_final() && self.finalised_height == 0 {
            self.finalised_height = ledger_height;
        }
        self.tx = Some(group);
        self.refresh_status();
    }

    /// Register an outbound the ledger expects for this transaction.
    pub fn add_action(&mut self, action: TxOutItem) {
        if !self.actions.contains(&action) {
            self.actions.push(action);
        }
    }

    /// Record an outbound transaction that fulfils one of the expected
    /// actions. Returns `Ok(false)` if the outbound was already recorded
    /// and an error if it does not match any unfulfilled action.
    pub fn add_out_tx(&mut self, tx: Tx) -> Result<bool, Error> {
        if self.reverted {
            return Err(Error::VoterReverted(self.tx_id.clone()));
        }
        if self.out_txs.iter().any(|out| out.id == tx.id) {
            return Ok(false);
        }

        let action = self
            .actions
            .iter_mut()
            .find(|action| action.out_hash.is_empty() && action_matches(action, &tx))
            .ok_or_else(|| Error::UnexpectedOutbound {
                in_hash: self.tx_id.clone(),
                out: tx.id.clone(),
                chain: tx.chain,
            })?;

        action.out_hash = tx.id.clone();
        self.out_txs.push(tx);
        self.refresh_status();
        Ok(true)
    }

    /// Whether every expected outbound has been observed.
    pub fn is_done(&self) -> bool {
        self.out_txs.len() >= self.actions.len()
    }

    /// Revert the voter. It cannot change after this.
    pub fn revert(&mut self) {
        self.reverted = true;
        self.refresh_status();
    }

    fn refresh_status(&mut self) {
        let status = if self.reverted {
            Status::Reverted
        } else if !self.actions.is_empty() && self.is_done() {
            Status::Done
        } else {
            Status::Incomplete
        };
        if let Some(tx) = self.tx.as_mut() {
            tx.status = status;
        }
    }
}

/// Whether the outbound transaction `tx` fulfils `action`. The memo,
/// destination and chain must match. The coin must match exactly, except
/// for gas asset sends which may carry less than the scheduled amount when
/// the vault paid part of it as gas.
fn action_matches(action: &TxOutItem, tx: &Tx) -> bool {
    if action.chain != tx.chain
        || !action.memo.eq_ignore_ascii_case(&tx.memo)
        || !action.to_address.eq_ignore_ascii_case(&tx.to_address)
    {
        return false;
    }

    let coin_matches = |coin: &Coin| {
        if coin.asset != action.coin.asset {
            return false;
        }
        coin.amount == action.coin.amount || (coin.asset.is_gas_asset() && coin.amount <= action.coin.amount)
    };
    tx.coins.iter().any(coin_matches)
}
