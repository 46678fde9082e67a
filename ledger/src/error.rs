//! Top-level error type for the ledger library
//!

use crate::chain::Chain;
use crate::tx::TxId;

/// Errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The chain identifier is not one the ledger knows about.
    #[error("unknown chain: {0}")]
    UnknownChain(String),
    /// The asset string could not be parsed.
    #[error("invalid asset: {0}")]
    InvalidAsset(String),
    /// A transaction failed validation.
    #[error("invalid tx {0}: {1}")]
    InvalidTx(TxId, &'static str),
    /// The memo exceeds the maximum size.
    #[error("memo is {0} bytes, the maximum is {max}", max = crate::MAX_MEMO_SIZE)]
    MemoTooLong(usize),
    /// The memo is empty.
    #[error("memo is empty")]
    EmptyMemo,
    /// The memo could not be parsed.
    #[error("could not parse memo {0:?}: {1}")]
    InvalidMemo(String, &'static str),
    /// The public key could not be parsed.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(#[source] secp256k1::Error),
    /// The public key was not valid hex.
    #[error("invalid public key hex: {0}")]
    InvalidPublicKeyHex(#[source] hex::FromHexError),
    /// A signer tried to replace an observation it already made.
    #[error("signer {signer} already submitted a different observation for {tx_id}")]
    NoTakeBacks {
        /// The transaction being observed.
        tx_id: TxId,
        /// The hex encoded public key of the signer.
        signer: String,
    },
    /// The observation was submitted by a signer that is not active.
    #[error("signer {0} is not an active validator")]
    InactiveSigner(String),
    /// The voter has been reverted by errata and can no longer change.
    #[error("voter for {0} was reverted")]
    VoterReverted(TxId),
    /// No voter exists for the given transaction.
    #[error("no voter for {0}")]
    MissingVoter(TxId),
    /// An outbound transaction did not match any expected action.
    #[error("outbound {out} on {chain} does not match any action of {in_hash}")]
    UnexpectedOutbound {
        /// The inbound transaction whose actions were checked.
        in_hash: TxId,
        /// The outbound transaction that was observed.
        out: TxId,
        /// The chain the outbound was observed on.
        chain: Chain,
    },
}
