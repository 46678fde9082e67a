//! Vaults and the reports the bridge posts about them.

use serde::Deserialize;
use serde::Serialize;

use crate::asset::Coin;
use crate::chain::Chain;
use crate::keys::PublicKey;
use crate::tx::TxId;

/// The status of a vault.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultStatus {
    /// The vault accepts inbound funds and signs outbounds.
    #[default]
    Active,
    /// The vault is being migrated away from and only signs outbounds.
    Retiring,
    /// The vault is no longer used.
    Inactive,
}

/// The router contract deployed on a chain for a vault.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainContract {
    /// The chain.
    pub chain: Chain,
    /// The router address.
    pub router: String,
}

/// A TSS controlled vault as described by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    /// The vault public key.
    pub pub_key: PublicKey,
    /// The coins the ledger expects the vault to hold.
    #[serde(default)]
    pub coins: Vec<Coin>,
    /// The status of the vault.
    #[serde(default)]
    pub status: VaultStatus,
    /// The router contracts the vault uses.
    #[serde(default)]
    pub routers: Vec<ChainContract>,
}

impl Vault {
    /// The router this vault uses on the given chain.
    pub fn router(&self, chain: Chain) -> Option<&str> {
        self.routers
            .iter()
            .find(|contract| contract.chain == chain)
            .map(|contract| contract.router.as_str())
    }

    /// The coins the ledger expects this vault to hold on the given chain.
    pub fn coins_on(&self, chain: Chain) -> impl Iterator<Item = &Coin> {
        self.coins.iter().filter(move |coin| coin.asset.chain == chain)
    }
}

/// A snapshot of a vault's balances on an external chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solvency {
    /// The external chain height of the snapshot.
    pub height: u64,
    /// The chain.
    pub chain: Chain,
    /// The vault.
    pub pub_key: PublicKey,
    /// The balances found on chain, in ledger units.
    pub coins: Vec<Coin>,
}

/// A network fee update for a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkFee {
    /// The external chain height the fee was computed at.
    pub height: u64,
    /// The chain.
    pub chain: Chain,
    /// The gas units of a typical outbound.
    pub transaction_size: u64,
    /// The gas rate in gwei.
    pub transaction_rate: u64,
}

/// A transaction reverted by a re-org.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrataTx {
    /// The transaction that is no longer on chain.
    pub tx_id: TxId,
    /// The chain.
    pub chain: Chain,
}

/// The transactions of one orphaned block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrataBlock {
    /// The orphaned block height.
    pub height: u64,
    /// The transactions that were observed in the orphaned block.
    pub txs: Vec<ErrataTx>,
}
