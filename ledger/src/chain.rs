//! External chains settled by the ledger.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::asset::Asset;
use crate::error::Error;

/// An external chain the bridge observes and signs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Chain {
    /// Ethereum mainnet or one of its test networks.
    Eth,
    /// Avalanche C-Chain.
    Avax,
    /// BNB Smart Chain.
    Bsc,
    /// Base.
    Base,
}

impl Chain {
    /// All known chains.
    pub const ALL: [Chain; 4] = [Chain::Eth, Chain::Avax, Chain::Bsc, Chain::Base];

    /// The ticker used for this chain in asset strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Eth => "ETH",
            Chain::Avax => "AVAX",
            Chain::Bsc => "BSC",
            Chain::Base => "BASE",
        }
    }

    /// The asset used to pay for gas on this chain.
    pub fn gas_asset(&self) -> Asset {
        let symbol = match self {
            Chain::Eth | Chain::Base => "ETH",
            Chain::Avax => "AVAX",
            Chain::Bsc => "BNB",
        };
        Asset::native(*self, symbol)
    }

    /// The number of decimals of the gas asset on chain.
    pub fn gas_asset_decimals(&self) -> u8 {
        18
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Chain::ALL
            .into_iter()
            .find(|chain| chain.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownChain(s.to_string()))
    }
}

impl TryFrom<String> for Chain {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Chain> for String {
    fn from(value: Chain) -> Self {
        value.as_str().to_string()
    }
}
