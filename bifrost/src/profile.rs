//! # Chain profiles
//!
//! The chain client is one generic engine. What differs between the EVM
//! chains it runs against, such as the chain id, the gas asset or the fee
//! bump rule, is captured by a [`ChainProfile`].

use alloy::primitives::Address;
use alloy::primitives::B256;
use alloy::primitives::U256;
use ledger::asset::Asset;
use ledger::chain::Chain;
use ledger::keys::PublicKey;
use ledger::LEDGER_DECIMALS;

use crate::chain::router::ContractCall;
use crate::chain::router::RouterCall;
use crate::chain::transaction;
use crate::chain::transaction::LegacyTransaction;
use crate::chain::transaction::Signature;
use crate::error::Error;

/// The decimals of the native coin of every EVM chain.
pub const NATIVE_DECIMALS: u8 = 18;

/// Gas units of a plain native transfer.
pub const TRANSFER_GAS: u64 = 21_000;

/// What the chain client needs to know about a chain.
pub trait ChainProfile: Send + Sync + 'static {
    /// The chain.
    fn chain(&self) -> Chain;

    /// The EIP-155 chain id.
    fn chain_id(&self) -> u64;

    /// The asset gas is paid in.
    fn gas_asset(&self) -> Asset {
        self.chain().gas_asset()
    }

    /// The address controlled by a vault key.
    fn address_of(&self, pub_key: &PublicKey) -> Address;

    /// Parse an address as written by the ledger.
    fn parse_address(&self, address: &str) -> Result<Address, Error>;

    /// The canonical textual form of an address.
    fn format_address(&self, address: &Address) -> String;

    /// Convert an on-chain amount with `decimals` decimals to ledger units.
    fn to_ledger_amount(&self, amount: U256, decimals: u8) -> u128;

    /// Convert a ledger amount to an on-chain amount with `decimals`
    /// decimals.
    fn from_ledger_amount(&self, amount: u128, decimals: u8) -> U256;

    /// Encode a router call against `router`.
    fn encode_router_call(&self, router: Address, call: &RouterCall) -> ContractCall {
        call.to_contract_call(router)
    }

    /// Build the unsigned transaction for a call.
    fn build_transaction(
        &self,
        nonce: u64,
        gas_price: u128,
        gas_limit: u64,
        call: &ContractCall,
    ) -> LegacyTransaction {
        LegacyTransaction {
            nonce,
            gas_price,
            gas_limit,
            to: call.to,
            value: call.value,
            data: call.data.clone(),
            chain_id: self.chain_id(),
        }
    }

    /// The hash the vault signs for `tx`.
    fn signing_hash(&self, tx: &LegacyTransaction) -> B256 {
        tx.signing_hash()
    }

    /// Encode `tx` with its signature for broadcast.
    fn encode_signed(&self, tx: &LegacyTransaction, signature: &Signature) -> Vec<u8> {
        tx.encode_signed(signature)
    }

    /// The gas price of a replacement for a transaction stuck at
    /// `original`, given the `current` estimate. It is strictly above both
    /// 110% of the original and twice the current estimate.
    fn bump_gas_price(&self, original: u128, current: u128) -> u128 {
        let by_original = original.saturating_mul(11) / 10 + 1;
        let by_current = current.saturating_mul(2).saturating_add(1);
        by_original.max(by_current)
    }
}

/// The profile shared by the EVM chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvmProfile {
    chain: Chain,
    chain_id: u64,
}

impl EvmProfile {
    /// Create the profile of `chain` running with `chain_id`.
    pub fn new(chain: Chain, chain_id: u64) -> Self {
        Self { chain, chain_id }
    }
}

fn pow10(exponent: u8) -> U256 {
    U256::from(10u64).pow(U256::from(exponent))
}

impl ChainProfile for EvmProfile {
    fn chain(&self) -> Chain {
        self.chain
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn address_of(&self, pub_key: &PublicKey) -> Address {
        transaction::address_of(pub_key)
    }

    fn parse_address(&self, address: &str) -> Result<Address, Error> {
        let trimmed = address.trim();
        let Some(hex) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        else {
            return Err(Error::InvalidAddress(address.to_string()));
        };
        if hex.len() != 40 {
            return Err(Error::InvalidAddress(address.to_string()));
        }
        format!("0x{}", hex.to_lowercase())
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_string()))
    }

    fn format_address(&self, address: &Address) -> String {
        address.to_checksum(None)
    }

    fn to_ledger_amount(&self, amount: U256, decimals: u8) -> u128 {
        let scaled = if decimals >= LEDGER_DECIMALS {
            amount / pow10(decimals - LEDGER_DECIMALS)
        } else {
            amount.saturating_mul(pow10(LEDGER_DECIMALS - decimals))
        };
        u128::try_from(scaled).unwrap_or(u128::MAX)
    }

    fn from_ledger_amount(&self, amount: u128, decimals: u8) -> U256 {
        let amount = U256::from(amount);
        if decimals >= LEDGER_DECIMALS {
            amount.saturating_mul(pow10(decimals - LEDGER_DECIMALS))
        } else {
            amount / pow10(LEDGER_DECIMALS - decimals)
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn profile() -> EvmProfile {
        EvmProfile::new(Chain::Eth, 1)
    }

    #[test_case(1_000_000_000_000_000_000, 18, 100_000_000; "one ether")]
    #[test_case(9_999_999_999, 18, 0; "dust below one ledger unit")]
    #[test_case(1_000_000, 6, 100_000_000; "six decimal token")]
    #[test_case(100_000_000, 8, 100_000_000; "eight decimals")]
    fn amounts_convert_to_ledger_units(amount: u128, decimals: u8, expected: u128) {
        assert_eq!(profile().to_ledger_amount(U256::from(amount), decimals), expected);
    }

    #[test]
    fn ledger_amounts_scale_back() {
        let wei = profile().from_ledger_amount(100_000_000, NATIVE_DECIMALS);
        assert_eq!(wei, U256::from(1_000_000_000_000_000_000u128));
        assert_eq!(profile().from_ledger_amount(150, 6), U256::from(1u64));
    }

    #[test_case("0x3fC91A3afd70395Cd496C647d5a6CC9D4B2b7FAD", true; "checksummed")]
    #[test_case("0X3FC91A3AFD70395CD496C647D5A6CC9D4B2B7FAD", true; "upper case")]
    #[test_case("3fC91A3afd70395Cd496C647d5a6CC9D4B2b7FAD", false; "missing prefix")]
    #[test_case("0x3fC91A3afd70395Cd496C647d5a6CC9D4B2b7F", false; "too short")]
    #[test_case("0xzzC91A3afd70395Cd496C647d5a6CC9D4B2b7FAD", false; "not hex")]
    fn addresses_are_parsed_strictly(address: &str, valid: bool) {
        assert_eq!(profile().parse_address(address).is_ok(), valid);
    }

    #[test_case(100, 10; "original dominates")]
    #[test_case(100, 80; "current dominates")]
    #[test_case(0, 0; "zero prices")]
    #[test_case(7, 3; "rounding")]
    fn bumped_gas_price_beats_both_bounds(original: u128, current: u128) {
        let bumped = profile().bump_gas_price(original, current);
        assert!(bumped * 10 > original * 11);
        assert!(bumped > current * 2);
    }
}
