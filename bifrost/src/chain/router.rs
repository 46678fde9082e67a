//! The vault router contract: its ABI, the calls the bridge makes and the
//! events the scanner decodes.

use alloy::primitives::Address;
use alloy::primitives::Bytes;
use alloy::primitives::U256;
use alloy::sol_types::SolCall as _;
use alloy::sol_types::SolEvent;

use super::Log;
use crate::error::Error;

#[allow(missing_docs)]
mod abi {
    alloy::sol! {
        #![sol(all_derives)]

        /// The vault router. Native assets are addressed as the zero address.
        interface IRouter {
            struct Coin {
                address asset;
                uint256 amount;
            }

            event Deposit(address indexed to, address indexed asset, uint amount, string memo);
            event TransferOut(address indexed vault, address indexed to, address asset, uint amount, string memo);
            event TransferOutAndCall(address indexed vault, address target, uint amount, address finalAsset, address indexed to, uint256 amountOutMin, string memo);
            event TransferAllowance(address indexed oldVault, address indexed newVault, address asset, uint amount, string memo);
            event VaultTransfer(address indexed oldVault, address indexed newVault, Coin[] coins, string memo);

            function transferOut(address to, address asset, uint amount, string memo) external payable;
            function transferOutAndCall(address aggregator, address finalToken, address to, uint256 amountOutMin, string memo) external payable;
            function transferAllowance(address router, address newVault, address asset, uint amount, string memo) external;
            function returnVaultAssets(address router, address asgard, Coin[] coins, string memo) external payable;
        }

        /// The part of ERC-20 the bridge reads.
        interface IERC20 {
            function balanceOf(address account) external view returns (uint256);
        }
    }
}

pub use abi::IRouter;
pub use abi::IERC20;

/// The asset address the router uses for the native coin.
pub const NATIVE_ASSET: Address = Address::ZERO;

/// An outbound the bridge asks a vault to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterCall {
    /// Pay a user through the router.
    TransferOut {
        /// The recipient.
        to: Address,
        /// The asset, [`NATIVE_ASSET`] for the native coin.
        asset: Address,
        /// The amount in the asset's smallest unit.
        amount: U256,
        /// The memo of the outbound.
        memo: String,
    },
    /// Pay a user through an aggregator contract that swaps the native
    /// coin into `final_token`.
    TransferOutAndCall {
        /// The aggregator contract.
        aggregator: Address,
        /// The token the user receives.
        final_token: Address,
        /// The recipient.
        to: Address,
        /// The native amount, in wei.
        amount: U256,
        /// The minimum amount of the final token.
        amount_out_min: U256,
        /// The memo of the outbound.
        memo: String,
    },
    /// Move a token allowance to another vault.
    TransferAllowance {
        /// The router of the receiving vault.
        router: Address,
        /// The receiving vault.
        new_vault: Address,
        /// The token.
        asset: Address,
        /// The amount in the token's smallest unit.
        amount: U256,
        /// The memo of the move.
        memo: String,
    },
    /// Return everything a yggdrasil vault holds to asgard.
    ReturnVaultAssets {
        /// The router of asgard.
        router: Address,
        /// The asgard vault.
        asgard: Address,
        /// The assets and amounts to return.
        coins: Vec<(Address, U256)>,
        /// The memo of the return.
        memo: String,
    },
    /// A plain native transfer carrying the memo as call data, used to move
    /// native funds between vaults.
    Transfer {
        /// The recipient.
        to: Address,
        /// The amount, in wei.
        amount: U256,
        /// The memo of the move.
        memo: String,
    },
}

/// A call ready to be put into a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    /// The contract or account called.
    pub to: Address,
    /// The native value sent along, in wei.
    pub value: U256,
    /// The call data.
    pub data: Bytes,
}

impl RouterCall {
    /// Build the call against the given vault router.
    pub fn to_contract_call(&self, router: Address) -> ContractCall {
        match self {
            RouterCall::TransferOut { to, asset, amount, memo } => ContractCall {
                to: router,
                value: if *asset == NATIVE_ASSET { *amount } else { U256::ZERO },
                data: IRouter::transferOutCall {
                    to: *to,
                    asset: *asset,
                    amount: *amount,
                    memo: memo.clone(),
                }
                .abi_encode()
                .into(),
            },
            RouterCall::TransferOutAndCall {
                aggregator,
                final_token,
                to,
                amount,
                amount_out_min,
                memo,
            } => ContractCall {
                to: router,
                value: *amount,
                data: IRouter::transferOutAndCallCall {
                    aggregator: *aggregator,
                    finalToken: *final_token,
                    to: *to,
                    amountOutMin: *amount_out_min,
                    memo: memo.clone(),
                }
                .abi_encode()
                .into(),
            },
            RouterCall::TransferAllowance { router: new_router, new_vault, asset, amount, memo } => {
                ContractCall {
                    to: router,
                    value: U256::ZERO,
                    data: IRouter::transferAllowanceCall {
                        router: *new_router,
                        newVault: *new_vault,
                        asset: *asset,
                        amount: *amount,
                        memo: memo.clone(),
                    }
                    .abi_encode()
                    .into(),
                }
            }
            RouterCall::ReturnVaultAssets { router: asgard_router, asgard, coins, memo } => {
                let value = coins
                    .iter()
                    .filter(|(asset, _)| *asset == NATIVE_ASSET)
                    .fold(U256::ZERO, |acc, (_, amount)| acc.saturating_add(*amount));
                let coins = coins
                    .iter()
                    .map(|(asset, amount)| IRouter::Coin { asset: *asset, amount: *amount })
                    .collect();
                ContractCall {
                    to: router,
                    value,
                    data: IRouter::returnVaultAssetsCall {
                        router: *asgard_router,
                        asgard: *asgard,
                        coins,
                        memo: memo.clone(),
                    }
                    .abi_encode()
                    .into(),
                }
            }
            RouterCall::Transfer { to, amount, memo } => ContractCall {
                to: *to,
                value: *amount,
                data: Bytes::copy_from_slice(memo.as_bytes()),
            },
        }
    }

    /// The native value the call moves, in wei.
    pub fn native_value(&self) -> U256 {
        self.to_contract_call(Address::ZERO).value
    }

    /// Return a copy of the call that moves `value` wei of the native coin
    /// instead. Calls that move no native value are returned unchanged.
    pub fn with_native_value(&self, value: U256) -> Self {
        let mut call = self.clone();
        match &mut call {
            RouterCall::TransferOut { asset, amount, .. } if *asset == NATIVE_ASSET => *amount = value,
            RouterCall::TransferOutAndCall { amount, .. } | RouterCall::Transfer { amount, .. } => {
                *amount = value
            }
            RouterCall::ReturnVaultAssets { coins, .. } => {
                for (asset, amount) in coins.iter_mut() {
                    if *asset == NATIVE_ASSET {
                        *amount = value;
                    }
                }
            }
            _ => {}
        }
        call
    }
}

/// A router event the scanner understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// A user deposit into a vault.
    Deposit(IRouter::Deposit),
    /// A vault paid a user.
    TransferOut(IRouter::TransferOut),
    /// A vault paid a user through an aggregator.
    TransferOutAndCall(IRouter::TransferOutAndCall),
    /// A vault moved an allowance to another vault.
    TransferAllowance(IRouter::TransferAllowance),
    /// A vault returned its assets.
    VaultTransfer(IRouter::VaultTransfer),
}

impl RouterEvent {
    /// Decode a log emitted by the router. Logs of other events decode to
    /// `None`.
    pub fn decode_log(log: &Log) -> Result<Option<Self>, Error> {
        let Some(signature) = log.topics.first() else {
            return Ok(None);
        };
        let topics = log.topics.iter().copied();
        let data = log.data.as_ref();

        let event = if *signature == IRouter::Deposit::SIGNATURE_HASH {
            RouterEvent::Deposit(IRouter::Deposit::decode_raw_log(topics, data, true)?)
        } else if *signature == IRouter::TransferOut::SIGNATURE_HASH {
            RouterEvent::TransferOut(IRouter::TransferOut::decode_raw_log(topics, data, true)?)
        } else if *signature == IRouter::TransferOutAndCall::SIGNATURE_HASH {
            RouterEvent::TransferOutAndCall(IRouter::TransferOutAndCall::decode_raw_log(
                topics, data, true,
            )?)
        } else if *signature == IRouter::TransferAllowance::SIGNATURE_HASH {
            RouterEvent::TransferAllowance(IRouter::TransferAllowance::decode_raw_log(
                topics, data, true,
            )?)
        } else if *signature == IRouter::VaultTransfer::SIGNATURE_HASH {
            RouterEvent::VaultTransfer(IRouter::VaultTransfer::decode_raw_log(topics, data, true)?)
        } else {
            return Ok(None);
        };
        Ok(Some(event))
    }

    /// Encode the event as a log of `router`.
    #[cfg(any(test, feature = "testing"))]
    pub fn to_log(&self, router: Address) -> Log {
        fn log_of<E: SolEvent>(event: &E, router: Address) -> Log {
            Log {
                address: router,
                topics: event.encode_topics().into_iter().map(|topic| topic.0).collect(),
                data: event.encode_data().into(),
            }
        }

        match self {
            RouterEvent::Deposit(event) => log_of(event, router),
            RouterEvent::TransferOut(event) => log_of(event, router),
            RouterEvent::TransferOutAndCall(event) => log_of(event, router),
            RouterEvent::TransferAllowance(event) => log_of(event, router),
            RouterEvent::VaultTransfer(event) => log_of(event, router),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_transfer_out_carries_value() {
        let to = Address::repeat_byte(0x11);
        let router = Address::repeat_byte(0x22);
        let call = RouterCall::TransferOut {
            to,
            asset: NATIVE_ASSET,
            amount: U256::from(5u64),
            memo: "OUT:AA".to_string(),
        };
        let contract = call.to_contract_call(router);
        assert_eq!(contract.to, router);
        assert_eq!(contract.value, U256::from(5u64));

        let decoded = IRouter::transferOutCall::abi_decode(&contract.data, true).unwrap();
        assert_eq!(decoded.to, to);
        assert_eq!(decoded.memo, "OUT:AA");
    }

    #[test]
    fn token_calls_move_no_native_value() {
        let call = RouterCall::TransferAllowance {
            router: Address::repeat_byte(1),
            new_vault: Address::repeat_byte(2),
            asset: Address::repeat_byte(3),
            amount: U256::from(7u64),
            memo: "MIGRATE:3".to_string(),
        };
        assert_eq!(call.native_value(), U256::ZERO);
        assert_eq!(call.with_native_value(U256::from(1u64)), call);
    }

    #[test]
    fn plain_transfers_carry_the_memo_as_data() {
        let call = RouterCall::Transfer {
            to: Address::repeat_byte(9),
            amount: U256::from(100u64),
            memo: "MIGRATE:3".to_string(),
        };
        let contract = call.to_contract_call(Address::repeat_byte(1));
        assert_eq!(contract.to, Address::repeat_byte(9));
        assert_eq!(contract.data.as_ref(), b"MIGRATE:3");
        assert_eq!(call.with_native_value(U256::from(40u64)).native_value(), U256::from(40u64));
    }

    #[test]
    fn deposit_logs_decode() {
        let event = IRouter::Deposit {
            to: Address::repeat_byte(0xaa),
            asset: NATIVE_ASSET,
            amount: U256::from(1_000u64),
            memo: "=:ETH.ETH".to_string(),
        };
        let log = RouterEvent::Deposit(event.clone()).to_log(Address::repeat_byte(0x01));
        assert_eq!(RouterEvent::decode_log(&log).unwrap(), Some(RouterEvent::Deposit(event)));
    }

    #[test]
    fn unknown_logs_are_ignored() {
        let log = Log {
            address: Address::repeat_byte(1),
            topics: vec![alloy::primitives::B256::repeat_byte(7)],
            data: Bytes::new(),
        };
        assert_eq!(RouterEvent::decode_log(&log).unwrap(), None);
    }
}
