//! Helpers for building ledger values in tests.

use crate::asset::Coin;
use crate::chain::Chain;
use crate::keys::PublicKey;
use crate::observed::ObservedTx;
use crate::tx::Tx;
use crate::tx::TxId;
use crate::tx_out::TxOutItem;

/// The address used as the sender of test inbounds.
pub const SENDER: &str = "0x9f5F8E1F7ad7C1F4c52aF0bbce5C5E9E0C5E4d21";

/// The address used as the recipient of test outbounds.
pub const RECIPIENT: &str = "0x3fC91A3afd70395Cd496C647d5a6CC9D4B2b7FAD";

/// The vault address test inbounds are sent to.
pub const VAULT_ADDRESS: &str = "0x1f9840a85d5aF5bf1D1762F925BDADdC4201F984";

/// The secret key behind [`public_key`]. `n` must not be zero.
pub fn secret_key(n: u8) -> secp256k1::SecretKey {
    let mut bytes = [0u8; 32];
    bytes[31] = n;
    secp256k1::SecretKey::from_slice(&bytes).expect("n must not be zero")
}

/// A deterministic public key. `n` must not be zero.
pub fn public_key(n: u8) -> PublicKey {
    PublicKey::from_secret_key(&secret_key(n))
}

/// A gas asset inbound to the test vault.
pub fn tx(id: &str, amount: u128) -> Tx {
    Tx {
        id: TxId::new(id),
        chain: Chain::Eth,
        from_address: SENDER.to_string(),
        to_address: VAULT_ADDRESS.to_string(),
        coins: vec![Coin::new(Chain::Eth.gas_asset(), amount)],
        gas: vec![Coin::new(Chain::Eth.gas_asset(), 21_000)],
        memo: format!("=:ETH.ETH:{RECIPIENT}"),
    }
}

/// A report of [`tx`] with the given heights.
pub fn observed_tx(id: &str, block_height: u64, finalise_height: u64) -> ObservedTx {
    ObservedTx::new(tx(id, 100_000_000), block_height, public_key(100), finalise_height)
}

/// An outbound settling the inbound `AA`.
pub fn tx_out_item(chain: Chain, amount: u128) -> TxOutItem {
    let gas_asset = chain.gas_asset();
    TxOutItem {
        chain,
        to_address: RECIPIENT.to_string(),
        vault_pub_key: public_key(100),
        coin: Coin::new(gas_asset.clone(), amount),
        memo: "OUT:AA".to_string(),
        max_gas: vec![Coin::new(gas_asset, 240_000)],
        gas_rate: 10,
        in_hash: TxId::new("AA"),
        out_hash: TxId::default(),
        aggregator: String::new(),
        aggregator_target_asset: String::new(),
        aggregator_target_limit: None,
        height: 1,
    }
}

/// The transaction that fulfils `action`.
pub fn outbound_tx(action: &TxOutItem, id: &str) -> Tx {
    Tx {
        id: TxId::new(id),
        chain: action.chain,
        from_address: VAULT_ADDRESS.to_string(),
        to_address: action.to_address.clone(),
        coins: vec![action.coin.clone()],
        gas: vec![Coin::new(action.chain.gas_asset(), 21_000)],
        memo: action.memo.clone(),
    }
}
