#![deny(missing_docs)]

//! # Ledger types
//!
//! This library holds the ledger-side view of the bridge: the chains and
//! assets it settles, the observed transactions that validators vote on,
//! the outbound items the ledger hands back to the bridge, and the
//! [`consensus::ObservationConsensus`] state machine that turns a set of
//! validator reports into one agreed transaction.

pub mod asset;
pub mod chain;
pub mod consensus;
pub mod error;
pub mod keys;
pub mod keysign;
pub mod memo;
pub mod observed;
pub mod tx;
pub mod tx_out;
pub mod vault;
pub mod voter;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::Error;

/// The maximum number of bytes of a memo that the ledger accepts on an
/// observed transaction.
pub const MAX_MEMO_SIZE: usize = 150;

/// The number of decimals used for every amount stored on the ledger.
pub const LEDGER_DECIMALS: u8 = 8;

/// Returns true if `signers` out of `total` meets the supermajority
/// threshold, which is two thirds of the total rounded up.
pub fn has_super_majority(signers: usize, total: usize) -> bool {
    if total == 0 {
        return false;
    }
    signers * 3 >= total * 2
}
