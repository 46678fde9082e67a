//! Validator reports of external transactions.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::keys::PublicKey;
use crate::tx::Tx;

/// The lifecycle status of an observed transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// The outbound actions of the transaction have not all been observed.
    #[default]
    Incomplete,
    /// Every expected outbound action has been observed.
    Done,
    /// The transaction was reverted by errata.
    Reverted,
}

/// A single validator's report of an external transaction. Reports made by
/// several validators that agree on everything except the signer are merged
/// into one `ObservedTx` with a larger signer set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedTx {
    /// The transaction.
    pub tx: Tx,
    /// The status of the report.
    pub status: Status,
    /// The external block height the transaction was included in.
    pub block_height: u64,
    /// The external height at which the transaction has enough
    /// confirmations.
    pub finalise_height: u64,
    /// The vault that observed the transaction.
    pub observed_pub_key: PublicKey,
    /// The validators that made this report.
    #[serde(default)]
    pub signers: BTreeSet<PublicKey>,
}

impl ObservedTx {
    /// Create a new report with no signers.
    pub fn new(tx: Tx, block_height: u64, observed_pub_key: PublicKey, finalise_height: u64) -> Self {
        Self {
            tx,
            status: Status::Incomplete,
            block_height,
            finalise_height,
            observed_pub_key,
            signers: BTreeSet::new(),
        }
    }

    /// Whether the report was made once the transaction had enough
    /// confirmations.
    pub fn is_final(&self) -> bool {
        self.finalise_height == self.block_height
    }

    /// Whether two reports describe the same transaction with the same
    /// finality. The signers and status are not compared.
    pub fn equals(&self, other: &ObservedTx) -> bool {
        self.tx == other.tx
            && self.block_height == other.block_height
            && self.finalise_height == other.finalise_height
            && self.observed_pub_key == other.observed_pub_key
    }

    /// Whether the given validator is one of the signers of this report.
    pub fn has_signed(&self, signer: &PublicKey) -> bool {
        self.signers.contains(signer)
    }

    /// Add a signer. Returns false if the signer was already present.
    pub fn sign(&mut self, signer: PublicKey) -> bool {
        self.signers.insert(signer)
    }

    /// The number of signers that are part of the active validator set.
    pub fn active_signer_count(&self, active: &BTreeSet<PublicKey>) -> usize {
        self.signers.intersection(active).count()
    }
}

#[cfg(test)]
mod tests {
    use crate::testing;

    use super::*;

    #[test]
    fn equality_ignores_signers_and_status() {
        let mut a = testing::observed_tx("AA", 10, 10);
        let mut b = a.clone();
        a.sign(testing::public_key(1));
        b.sign(testing::public_key(2));
        b.status = Status::Done;
        assert!(a.equals(&b));

        b.finalise_height = 20;
        assert!(!a.equals(&b));
    }

    #[test]
    fn finality_is_block_height_equality() {
        assert!(testing::observed_tx("AA", 10, 10).is_final());
        assert!(!testing::observed_tx("AA", 10, 22).is_final());
    }

    #[test]
    fn only_active_signers_are_counted() {
        let mut obs = testing::observed_tx("AA", 10, 10);
        obs.sign(testing::public_key(1));
        obs.sign(testing::public_key(2));
        obs.sign(testing::public_key(3));

        let active: BTreeSet<_> = [testing::public_key(1), testing::public_key(3)].into();
        assert_eq!(obs.active_signer_count(&active), 2);
        assert!(!obs.sign(testing::public_key(1)));
    }
}
