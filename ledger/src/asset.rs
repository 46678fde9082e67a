//! Assets and coins.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::chain::Chain;
use crate::error::Error;

/// An asset on an external chain, written as `CHAIN.SYMBOL`. Tokens carry
/// their contract address in the symbol as `TICKER-CONTRACT`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Asset {
    /// The chain the asset lives on.
    pub chain: Chain,
    /// The full symbol, including the contract address for tokens.
    pub symbol: String,
    /// The ticker, which is the symbol without the contract address.
    pub ticker: String,
}

impl Asset {
    /// Create the asset for a chain's native coin.
    pub fn native(chain: Chain, ticker: &str) -> Self {
        let ticker = ticker.to_uppercase();
        Self { chain, symbol: ticker.clone(), ticker }
    }

    /// Create a token asset from its ticker and contract address.
    pub fn token(chain: Chain, ticker: &str, contract: &str) -> Self {
        let ticker = ticker.to_uppercase();
        let symbol = format!("{ticker}-{}", contract.to_uppercase());
        Self { chain, symbol, ticker }
    }

    /// Whether this asset is the gas asset of its chain.
    pub fn is_gas_asset(&self) -> bool {
        self == &self.chain.gas_asset()
    }

    /// The contract address of a token, if this asset is one.
    pub fn contract_address(&self) -> Option<&str> {
        self.symbol
            .split_once('-')
            .map(|(_, contract)| contract)
            .filter(|contract| !contract.is_empty())
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.chain, self.symbol)
    }
}

impl FromStr for Asset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (chain, symbol) = s
            .split_once('.')
            .ok_or_else(|| Error::InvalidAsset(s.to_string()))?;
        let chain: Chain = chain.parse()?;
        if symbol.is_empty() {
            return Err(Error::InvalidAsset(s.to_string()));
        }

        let symbol = symbol.to_uppercase();
        let ticker = match symbol.split_once('-') {
            Some((ticker, _)) => ticker.to_string(),
            None => symbol.clone(),
        };
        if ticker.is_empty() {
            return Err(Error::InvalidAsset(s.to_string()));
        }

        Ok(Self { chain, symbol, ticker })
    }
}

impl TryFrom<String> for Asset {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Asset> for String {
    fn from(value: Asset) -> Self {
        value.to_string()
    }
}

/// An amount of an asset. Amounts are denominated in ledger units, which
/// carry [`crate::LEDGER_DECIMALS`] decimals.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coin {
    /// The asset.
    pub asset: Asset,
    /// The amount in ledger units.
    pub amount: u128,
    /// The decimals of the asset on its native chain. Zero means the
    /// ledger default.
    #[serde(default)]
    pub decimals: u8,
}

impl Coin {
    /// Create a new coin with the default decimals.
    pub fn new(asset: Asset, amount: u128) -> Self {
        Self { asset, amount, decimals: 0 }
    }

    /// Whether the coin has no value.
    pub fn is_empty(&self) -> bool {
        self.amount == 0
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.asset)
    }
}

/// Return the amount of `asset` held in `coins`.
pub fn amount_of(coins: &[Coin], asset: &Asset) -> u128 {
    coins
        .iter()
        .filter(|coin| &coin.asset == asset)
        .map(|coin| coin.amount)
        .sum()
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("ETH.ETH", Chain::Eth, "ETH", None; "native")]
    #[test_case("eth.usdc-0xa0b8", Chain::Eth, "USDC", Some("0XA0B8"); "token lower case")]
    #[test_case("BSC.BNB", Chain::Bsc, "BNB", None; "bsc native")]
    fn assets_parse(input: &str, chain: Chain, ticker: &str, contract: Option<&str>) {
        let asset: Asset = input.parse().unwrap();
        assert_eq!(asset.chain, chain);
        assert_eq!(asset.ticker, ticker);
        assert_eq!(asset.contract_address(), contract);
    }

    #[test_case("ETH"; "missing symbol separator")]
    #[test_case("ETH."; "empty symbol")]
    #[test_case("XYZ.ETH"; "unknown chain")]
    #[test_case("ETH.-0XABC"; "empty ticker")]
    fn bad_assets_do_not_parse(input: &str) {
        assert!(input.parse::<Asset>().is_err());
    }

    #[test]
    fn amount_of_sums_only_the_requested_asset() {
        let eth = Chain::Eth.gas_asset();
        let usdc = Asset::token(Chain::Eth, "usdc", "0xa0b8");
        let coins = vec![
            Coin::new(eth.clone(), 10),
            Coin::new(usdc.clone(), 7),
            Coin::new(eth.clone(), 5),
        ];
        assert_eq!(amount_of(&coins, &eth), 15);
        assert_eq!(amount_of(&coins, &usdc), 7);
    }
}
