//! Typed memos.
//!
//! The bridge only needs to know what kind of instruction a memo carries
//! and, for outbounds, which inbound it settles. The inbound grammar is
//! decoded far enough to tell the kinds apart; the ledger business logic
//! that acts on the fields lives elsewhere.

use std::fmt;

use crate::error::Error;
use crate::tx::TxId;

/// The first protocol version that accepts scientific notation in swap
/// limits, for example `1e8`.
pub const SCIENTIFIC_LIMIT_VERSION: u64 = 2;

/// An inbound instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMemo {
    /// Swap into `asset` and pay `destination`.
    Swap {
        /// The asset to swap into.
        asset: String,
        /// The recipient of the swap.
        destination: String,
        /// The minimum amount to receive.
        limit: Option<u128>,
    },
    /// Add liquidity to the pool of `asset`.
    AddLiquidity {
        /// The pool.
        asset: String,
        /// The paired address on the other side of the pool, if any.
        paired_address: Option<String>,
    },
    /// Withdraw liquidity from the pool of `asset`.
    Withdraw {
        /// The pool.
        asset: String,
        /// The share to withdraw in basis points.
        basis_points: u64,
    },
    /// Donate to the pool of `asset`.
    Donate {
        /// The pool.
        asset: String,
    },
    /// Add funds to the protocol reserve.
    Reserve,
    /// Bond to a node.
    Bond {
        /// The node address.
        node: String,
    },
    /// Unbond from a node.
    Unbond {
        /// The node address.
        node: String,
        /// The amount to unbond.
        amount: u128,
    },
    /// Request a node leaves the validator set.
    Leave {
        /// The node address.
        node: String,
    },
}

/// A decoded memo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Memo {
    /// The outbound leg of an inbound transaction.
    Outbound {
        /// The inbound transaction.
        in_hash: TxId,
    },
    /// A refund of an inbound transaction.
    Refund {
        /// The inbound transaction.
        in_hash: TxId,
    },
    /// Funds returned to users when the network shuts down.
    Ragnarok {
        /// The ledger height of the ragnarok.
        height: u64,
    },
    /// A move of funds from a retiring vault to a new one.
    Migrate {
        /// The ledger height of the migration.
        height: u64,
    },
    /// Funds sent to a yggdrasil vault.
    YggdrasilFund {
        /// The ledger height of the funding.
        height: u64,
    },
    /// Funds returned from a yggdrasil vault.
    YggdrasilReturn {
        /// The ledger height of the return.
        height: u64,
    },
    /// An inbound instruction.
    Inbound(InboundMemo),
}

impl Memo {
    /// Parse a memo with the grammar of the latest protocol version.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        Self::parse_with_version(u64::MAX, raw)
    }

    /// Parse a memo with the grammar of the given protocol version.
    pub fn parse_with_version(version: u64, raw: &str) -> Result<Self, Error> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::EmptyMemo);
        }
        if raw.len() > crate::MAX_MEMO_SIZE {
            return Err(Error::MemoTooLong(raw.len()));
        }

        let parts: Vec<&str> = raw.split(':').collect();
        let invalid = |reason| Error::InvalidMemo(raw.to_string(), reason);
        let field = |index: usize| parts.get(index).copied().filter(|part| !part.is_empty());

        let memo = match parts[0].to_uppercase().as_str() {
            "OUT" => Memo::Outbound {
                in_hash: TxId::new(field(1).ok_or_else(|| invalid("missing inbound hash"))?),
            },
            "REFUND" => Memo::Refund {
                in_hash: TxId::new(field(1).ok_or_else(|| invalid("missing inbound hash"))?),
            },
            "RAGNAROK" => Memo::Ragnarok { height: parse_height(field(1)).ok_or_else(|| invalid("bad height"))? },
            "MIGRATE" => Memo::Migrate { height: parse_height(field(1)).ok_or_else(|| invalid("bad height"))? },
            "YGGDRASIL+" => Memo::YggdrasilFund {
                height: parse_height(field(1)).ok_or_else(|| invalid("bad height"))?,
            },
            "YGGDRASIL-" => Memo::YggdrasilReturn {
                height: parse_height(field(1)).ok_or_else(|| invalid("bad height"))?,
            },
            "SWAP" | "S" | "=" => {
                let asset = field(1).ok_or_else(|| invalid("missing swap asset"))?;
                let destination = field(2).unwrap_or_default();
                let limit = match field(3) {
                    Some(limit) => Some(parse_limit(version, limit).ok_or_else(|| invalid("bad swap limit"))?),
                    None => None,
                };
                Memo::Inbound(InboundMemo::Swap {
                    asset: asset.to_string(),
                    destination: destination.to_string(),
                    limit,
                })
            }
            "ADD" | "A" | "+" => Memo::Inbound(InboundMemo::AddLiquidity {
                asset: field(1).ok_or_else(|| invalid("missing pool asset"))?.to_string(),
                paired_address: field(2).map(str::to_string),
            }),
            "WITHDRAW" | "WD" | "-" => {
                let asset = field(1).ok_or_else(|| invalid("missing pool asset"))?;
                let basis_points = match field(2) {
                    Some(bps) => bps.parse().map_err(|_| invalid("bad basis points"))?,
                    None => 10_000,
                };
                if basis_points > 10_000 {
                    return Err(invalid("basis points above 10000"));
                }
                Memo::Inbound(InboundMemo::Withdraw { asset: asset.to_string(), basis_points })
            }
            "DONATE" | "D" => Memo::Inbound(InboundMemo::Donate {
                asset: field(1).ok_or_else(|| invalid("missing pool asset"))?.to_string(),
            }),
            "RESERVE" => Memo::Inbound(InboundMemo::Reserve),
            "BOND" => Memo::Inbound(InboundMemo::Bond {
                node: field(1).ok_or_else(|| invalid("missing node address"))?.to_string(),
            }),
            "UNBOND" => Memo::Inbound(InboundMemo::Unbond {
                node: field(1).ok_or_else(|| invalid("missing node address"))?.to_string(),
                amount: field(2)
                    .and_then(|amount| amount.parse().ok())
                    .ok_or_else(|| invalid("bad unbond amount"))?,
            }),
            "LEAVE" => Memo::Inbound(InboundMemo::Leave {
                node: field(1).ok_or_else(|| invalid("missing node address"))?.to_string(),
            }),
            _ => return Err(invalid("unknown memo type")),
        };
        Ok(memo)
    }

    /// Whether the memo carries a user instruction.
    pub fn is_inbound(&self) -> bool {
        matches!(self, Memo::Inbound(_))
    }

    /// Whether the memo settles a user instruction.
    pub fn is_outbound(&self) -> bool {
        matches!(self, Memo::Outbound { .. } | Memo::Refund { .. })
    }

    /// Whether the memo moves funds between vaults or back to users on
    /// behalf of the network.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Memo::Ragnarok { .. } | Memo::Migrate { .. } | Memo::YggdrasilFund { .. } | Memo::YggdrasilReturn { .. }
        )
    }

    /// The inbound transaction settled by an outbound or refund memo.
    pub fn in_hash(&self) -> Option<&TxId> {
        match self {
            Memo::Outbound { in_hash } | Memo::Refund { in_hash } => Some(in_hash),
            _ => None,
        }
    }
}

impl fmt::Display for Memo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Memo::Outbound { in_hash } => write!(f, "OUT:{in_hash}"),
            Memo::Refund { in_hash } => write!(f, "REFUND:{in_hash}"),
            Memo::Ragnarok { height } => write!(f, "RAGNAROK:{height}"),
            Memo::Migrate { height } => write!(f, "MIGRATE:{height}"),
            Memo::YggdrasilFund { height } => write!(f, "YGGDRASIL+:{height}"),
            Memo::YggdrasilReturn { height } => write!(f, "YGGDRASIL-:{height}"),
            Memo::Inbound(InboundMemo::Swap { asset, destination, limit }) => {
                write!(f, "SWAP:{asset}:{destination}")?;
                match limit {
                    Some(limit) => write!(f, ":{limit}"),
                    None => Ok(()),
                }
            }
            Memo::Inbound(InboundMemo::AddLiquidity { asset, paired_address }) => match paired_address {
                Some(address) => write!(f, "ADD:{asset}:{address}"),
                None => write!(f, "ADD:{asset}"),
            },
            Memo::Inbound(InboundMemo::Withdraw { asset, basis_points }) => write!(f, "WITHDRAW:{asset}:{basis_points}"),
            Memo::Inbound(InboundMemo::Donate { asset }) => write!(f, "DONATE:{asset}"),
            Memo::Inbound(InboundMemo::Reserve) => f.write_str("RESERVE"),
            Memo::Inbound(InboundMemo::Bond { node }) => write!(f, "BOND:{node}"),
            Memo::Inbound(InboundMemo::Unbond { node, amount }) => write!(f, "UNBOND:{node}:{amount}"),
            Memo::Inbound(InboundMemo::Leave { node }) => write!(f, "LEAVE:{node}"),
        }
    }
}

/// Decodes raw memos into typed instructions for a protocol version.
pub trait MemoDecoder: Send + Sync {
    /// Parse the raw memo.
    fn parse(&self, version: u64, raw: &str) -> Result<Memo, Error>;
}

/// The memo decoder for the grammar implemented in this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardMemoDecoder;

impl MemoDecoder for StandardMemoDecoder {
    fn parse(&self, version: u64, raw: &str) -> Result<Memo, Error> {
        Memo::parse_with_version(version, raw)
    }
}

fn parse_height(value: Option<&str>) -> Option<u64> {
    value.and_then(|height| height.parse().ok())
}

fn parse_limit(version: u64, value: &str) -> Option<u128> {
    if let Ok(limit) = value.parse() {
        return Some(limit);
    }
    if version < SCIENTIFIC_LIMIT_VERSION {
        return None;
    }
    let (mantissa, exponent) = value.split_once(['e', 'E'])?;
    let mantissa: u128 = mantissa.parse().ok()?;
    let exponent: u32 = exponent.parse().ok()?;
    mantissa.checked_mul(10u128.checked_pow(exponent)?)
}
