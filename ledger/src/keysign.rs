//! Blame information produced by a failed keysign.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::asset::Coin;
use crate::keys::PublicKey;

/// A node blamed for a failed keysign round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameNode {
    /// The public key of the node.
    pub pub_key: PublicKey,
}

/// The structured reason a keysign failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blame {
    /// Why the round failed.
    #[serde(default)]
    pub fail_reason: String,
    /// The round that failed.
    #[serde(default)]
    pub round: String,
    /// The nodes that are blamed. Empty means nobody could be blamed.
    #[serde(default)]
    pub blame_nodes: Vec<BlameNode>,
}

impl Blame {
    /// Whether no node could be identified as the cause.
    pub fn is_empty(&self) -> bool {
        self.blame_nodes.is_empty()
    }
}

impl fmt::Display for Blame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reason: {}, round: {}, nodes: [", self.fail_reason, self.round)?;
        for (i, node) in self.blame_nodes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", node.pub_key)?;
        }
        f.write_str("]")
    }
}

/// A keysign failure reported to the ledger so that the blamed nodes can
/// be slashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysignFailure {
    /// The blame of the failed round.
    pub blame: Blame,
    /// The ledger height of the outbound.
    pub height: u64,
    /// The memo of the outbound.
    pub memo: String,
    /// The coins of the outbound.
    pub coins: Vec<Coin>,
    /// The vault that tried to sign.
    pub pub_key: PublicKey,
}
