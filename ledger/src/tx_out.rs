//! Outbound instructions handed by the ledger to the bridge.

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest as _;
use sha2::Sha256;

use crate::asset::Coin;
use crate::chain::Chain;
use crate::keys::PublicKey;
use crate::tx::TxId;

/// An instruction to send funds out of a vault on an external chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutItem {
    /// The chain to send on.
    pub chain: Chain,
    /// The destination address.
    pub to_address: String,
    /// The vault that sends the funds and whose key signs.
    pub vault_pub_key: PublicKey,
    /// The coin to send.
    pub coin: Coin,
    /// The memo to attach. Never empty for a valid item.
    pub memo: String,
    /// The maximum gas the vault may spend, in gas-asset ledger units.
    #[serde(default)]
    pub max_gas: Vec<Coin>,
    /// The gas rate prescribed by the ledger, in gwei.
    #[serde(default)]
    pub gas_rate: u64,
    /// The inbound transaction that caused this outbound.
    pub in_hash: TxId,
    /// The outbound transaction hash once it has been observed.
    #[serde(default)]
    pub out_hash: TxId,
    /// The aggregator contract to call, if any.
    #[serde(default)]
    pub aggregator: String,
    /// The token the aggregator should swap into.
    #[serde(default)]
    pub aggregator_target_asset: String,
    /// The minimum amount the aggregator must receive.
    #[serde(default)]
    pub aggregator_target_limit: Option<u128>,
    /// The ledger height at which the item was created.
    #[serde(default)]
    pub height: u64,
}

impl TxOutItem {
    /// The key under which signing this item is recorded in the signer
    /// cache. It covers every field that identifies the outbound, so two
    /// items that only differ in their gas hints share a key.
    pub fn cache_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.chain.as_str());
        hasher.update(self.to_address.as_bytes());
        hasher.update(self.vault_pub_key.serialize());
        hasher.update(self.coin.asset.to_string());
        hasher.update(self.coin.amount.to_be_bytes());
        hasher.update(self.memo.as_bytes());
        hasher.update(self.in_hash.as_str());
        hasher.update(self.aggregator.as_bytes());
        hasher.update(self.aggregator_target_asset.as_bytes());
        if let Some(limit) = self.aggregator_target_limit {
            hasher.update(limit.to_be_bytes());
        }
        hex::encode_upper(hasher.finalize())
    }

    /// The gas budget in gas-asset ledger units.
    pub fn max_gas_amount(&self) -> u128 {
        let gas_asset = self.chain.gas_asset();
        crate::asset::amount_of(&self.max_gas, &gas_asset)
    }
}
