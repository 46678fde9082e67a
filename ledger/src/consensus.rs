//! # Observation consensus
//!
//! [`ObservationConsensus`] holds one [`ObservedTxVoter`] per external
//! transaction and moves it through the following states as validators
//! report what they saw:
//!
//! ```text
//! NoObservations -> Pending -> Confirmed -> Finalised
//!                       \           \           \
//!                        +-----------+-----------+--> Reverted
//! ```
//!
//! A voter is `Pending` while no report group has a supermajority of the
//! active validators, `Confirmed` once a non-final group does and
//! `Finalised` once a final group does. Errata moves a voter to
//! `Reverted`, after which it never changes again.
//!
//! The consensus report is always recomputed from the full set of reports,
//! so validators that see reports in a different order end up with the
//! same result.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::error::Error;
use crate::keys::PublicKey;
use crate::memo::Memo;
use crate::observed::ObservedTx;
use crate::tx::Tx;
use crate::tx::TxId;
use crate::tx_out::TxOutItem;
use crate::voter::ObservedTxVoter;

/// The consensus state of one external transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VoterState {
    /// Nobody reported the transaction.
    NoObservations,
    /// Reports exist but no group has a supermajority.
    Pending,
    /// A non-final group has a supermajority.
    Confirmed,
    /// A final group has a supermajority.
    Finalised,
    /// The transaction was reverted by errata.
    Reverted,
}

/// What happened as the result of recording an observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservationEvent {
    /// The validator already made this exact report.
    Duplicate,
    /// The report was recorded and the state did not change.
    Recorded(VoterState),
    /// The transaction reached consensus on a non-final report.
    Confirmed,
    /// The transaction reached consensus on a final report.
    Finalised,
    /// The transaction finalised as an outbound, but the inbound it
    /// references did not expect it. It was not recorded against the
    /// inbound.
    UnexpectedOutbound {
        /// The inbound referenced by the outbound memo.
        in_hash: TxId,
    },
}

/// The ledger side aggregation of validator observations.
#[derive(Debug, Clone, Default)]
pub struct ObservationConsensus {
    voters: BTreeMap<TxId, ObservedTxVoter>,
    active: BTreeSet<PublicKey>,
    height: u64,
}

impl ObservationConsensus {
    /// Create a new instance for the given active validator set.
    pub fn new(active: impl IntoIterator<Item = PublicKey>) -> Self {
        Self {
            voters: BTreeMap::new(),
            active: active.into_iter().collect(),
            height: 0,
        }
    }

    /// Replace the active validator set.
    pub fn set_active_validators(&mut self, active: impl IntoIterator<Item = PublicKey>) {
        self.active = active.into_iter().collect();
    }

    /// The active validator set.
    pub fn active_validators(&self) -> &BTreeSet<PublicKey> {
        &self.active
    }

    /// Set the current ledger height.
    pub fn set_height(&mut self, height: u64) {
        self.height = height;
    }

    /// The current ledger height.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// The voter of the given transaction.
    pub fn voter(&self, tx_id: &TxId) -> Option<&ObservedTxVoter> {
        self.voters.get(tx_id)
    }

    /// The state of the given transaction.
    pub fn state(&self, tx_id: &TxId) -> VoterState {
        match self.voters.get(tx_id) {
            None => VoterState::NoObservations,
            Some(voter) => self.voter_state(voter),
        }
    }

    /// Whether the transaction reached consensus.
    pub fn has_consensus(&self, tx_id: &TxId) -> bool {
        self.state(tx_id) >= VoterState::Confirmed && self.state(tx_id) != VoterState::Reverted
    }

    /// Whether the transaction reached consensus on a final report.
    pub fn has_finalised(&self, tx_id: &TxId) -> bool {
        self.state(tx_id) == VoterState::Finalised
    }

    /// Record an observation made by `signer`.
    pub fn observe(&mut self, signer: PublicKey, observation: ObservedTx) -> Result<ObservationEvent, Error> {
        if !self.active.contains(&signer) {
            return Err(Error::InactiveSigner(signer.to_string()));
        }
        observation.tx.validate()?;

        let tx_id = observation.tx.id.clone();
        let voter = self
            .voters
            .entry(tx_id.clone())
            .or_insert_with(|| ObservedTxVoter::new(tx_id.clone()));

        let before = voter_state(voter, &self.active);
        if !voter.add(observation, signer)? {
            return Ok(ObservationEvent::Duplicate);
        }
        voter.update_consensus(&self.active, self.height);
        let after = voter_state(voter, &self.active);

        if after == before {
            return Ok(ObservationEvent::Recorded(after));
        }
        match after {
            VoterState::Confirmed => {
                tracing::debug!(%tx_id, height = self.height, "observation reached consensus");
                Ok(ObservationEvent::Confirmed)
            }
            VoterState::Finalised => {
                tracing::debug!(%tx_id, height = self.height, "observation finalised");
                let tx = voter.tx.as_ref().map(|consensus| consensus.tx.clone());
                match tx {
                    Some(tx) => Ok(self.settle_outbound(tx)),
                    None => Ok(ObservationEvent::Finalised),
                }
            }
            state => Ok(ObservationEvent::Recorded(state)),
        }
    }

    /// Register an outbound the ledger expects for the inbound `in_hash`.
    pub fn add_action(&mut self, in_hash: &TxId, action: TxOutItem) -> Result<(), Error> {
        let voter = self
            .voters
            .get_mut(in_hash)
            .ok_or_else(|| Error::MissingVoter(in_hash.clone()))?;
        voter.add_action(action);
        Ok(())
    }

    /// Revert the given transaction because its block was orphaned.
    pub fn errata(&mut self, tx_id: &TxId) -> Result<(), Error> {
        let voter = self
            .voters
            .get_mut(tx_id)
            .ok_or_else(|| Error::MissingVoter(tx_id.clone()))?;
        voter.revert();
        tracing::info!(%tx_id, "observation reverted by errata");
        Ok(())
    }

    /// All voters.
    pub fn voters(&self) -> impl Iterator<Item = &ObservedTxVoter> {
        self.voters.values()
    }

    fn voter_state(&self, voter: &ObservedTxVoter) -> VoterState {
        voter_state(voter, &self.active)
    }

    /// Match a finalised outbound against the inbound it settles.
    fn settle_outbound(&mut self, tx: Tx) -> ObservationEvent {
        let in_hash = match Memo::parse(&tx.memo) {
            Ok(memo) => match memo.in_hash() {
                Some(in_hash) => in_hash.clone(),
                None => return ObservationEvent::Finalised,
            },
            Err(_) => return ObservationEvent::Finalised,
        };

        let Some(voter) = self.voters.get_mut(&in_hash) else {
            tracing::warn!(%in_hash, out = %tx.id, "outbound for an unknown inbound");
            return ObservationEvent::UnexpectedOutbound { in_hash };
        };
        match voter.add_out_tx(tx) {
            Ok(_) => ObservationEvent::Finalised,
            Err(error) => {
                tracing::warn!(%error, "rejected outbound");
                ObservationEvent::UnexpectedOutbound { in_hash }
            }
        }
    }
}

fn voter_state(voter: &ObservedTxVoter, active: &BTreeSet<PublicKey>) -> VoterState {
    if voter.reverted {
        return VoterState::Reverted;
    }
    if voter.txs.is_empty() {
        return VoterState::NoObservations;
    }
    match voter.consensus_group(active) {
        None => VoterState::Pending,
        Some(group) if group.is_final() => VoterState::Finalised,
        Some(_) => VoterState::Confirmed,
    }
}
