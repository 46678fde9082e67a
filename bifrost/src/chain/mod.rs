//! # External chain access
//!
//! The [`ChainRpc`] trait is the narrow capability the bridge needs from a
//! node of an external chain. The [`evm_rpc::EvmRpcClient`] implements it
//! over JSON-RPC, and several of them can be wrapped in an
//! [`crate::util::ApiFallbackClient`].

pub mod evm_rpc;
pub mod router;
pub mod transaction;

use std::future::Future;

use alloy::primitives::Address;
use alloy::primitives::Bytes;
use alloy::primitives::B256;
use alloy::primitives::U256;

use crate::error::Error;
use crate::util::ApiFallbackClient;

/// A block with its full transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// The height of the block.
    pub number: u64,
    /// The hash of the block.
    pub hash: B256,
    /// The hash of the parent block.
    pub parent_hash: B256,
    /// The transactions of the block, in block order.
    pub transactions: Vec<RpcTransaction>,
}

/// A transaction as returned by a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcTransaction {
    /// The hash of the transaction.
    pub hash: B256,
    /// The sender.
    pub from: Address,
    /// The recipient, none for contract creations.
    pub to: Option<Address>,
    /// The native value transferred, in wei.
    pub value: U256,
    /// The call data.
    pub input: Bytes,
    /// The nonce of the sender.
    pub nonce: u64,
    /// The gas limit.
    pub gas: u64,
    /// The gas price paid, in wei.
    pub gas_price: u128,
    /// The height of the including block, none while pending.
    pub block_number: Option<u64>,
}

/// An event emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    /// The contract that emitted the event.
    pub address: Address,
    /// The indexed topics, starting with the event signature.
    pub topics: Vec<B256>,
    /// The non-indexed data.
    pub data: Bytes,
}

/// The receipt of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// The hash of the transaction.
    pub transaction_hash: B256,
    /// Whether the transaction succeeded.
    pub status: bool,
    /// The gas used by the transaction.
    pub gas_used: u64,
    /// The gas price paid, in wei.
    pub effective_gas_price: u128,
    /// The events emitted by the transaction.
    pub logs: Vec<Log>,
    /// The height of the including block.
    pub block_number: u64,
}

impl Receipt {
    /// The total fee paid, in wei.
    pub fn fee(&self) -> u128 {
        (self.gas_used as u128).saturating_mul(self.effective_gas_price)
    }
}

/// A call used to estimate gas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    /// The sender.
    pub from: Address,
    /// The recipient.
    pub to: Address,
    /// The native value, in wei.
    pub value: U256,
    /// The call data.
    pub data: Bytes,
}

/// The capability the bridge needs from a node of an external chain.
pub trait ChainRpc: Send + Sync {
    /// Get the height of the chain tip.
    fn get_height(&self) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Get the block at the given height with its transactions.
    fn get_block(&self, height: u64) -> impl Future<Output = Result<Block, Error>> + Send;

    /// Get the receipt of a transaction, none if it is not included.
    fn get_receipt(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<Option<Receipt>, Error>> + Send;

    /// Get a transaction, none if the node does not know it.
    fn get_transaction(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<Option<RpcTransaction>, Error>> + Send;

    /// Get the next nonce of the address, counting pending transactions.
    fn get_nonce(&self, address: Address) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Get the balance of the address in wei, or in the token's smallest
    /// unit when a token contract is given. The latest block is used when
    /// no height is given.
    fn get_balance(
        &self,
        address: Address,
        token: Option<Address>,
        height: Option<u64>,
    ) -> impl Future<Output = Result<U256, Error>> + Send;

    /// Estimate the gas units the call needs.
    fn estimate_gas(&self, call: &CallRequest) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Broadcast a signed transaction, returning its hash.
    fn send_raw_transaction(&self, raw: &[u8]) -> impl Future<Output = Result<B256, Error>> + Send;
}

impl<T> ChainRpc for ApiFallbackClient<T>
where
    T: ChainRpc,
{
    async fn get_height(&self) -> Result<u64, Error> {
        self.exec(|client| client.get_height()).await
    }

    async fn get_block(&self, height: u64) -> Result<Block, Error> {
        self.exec(|client| client.get_block(height)).await
    }

    async fn get_receipt(&self, hash: B256) -> Result<Option<Receipt>, Error> {
        self.exec(|client| client.get_receipt(hash)).await
    }

    async fn get_transaction(&self, hash: B256) -> Result<Option<RpcTransaction>, Error> {
        self.exec(|client| client.get_transaction(hash)).await
    }

    async fn get_nonce(&self, address: Address) -> Result<u64, Error> {
        self.exec(|client| client.get_nonce(address)).await
    }

    async fn get_balance(
        &self,
        address: Address,
        token: Option<Address>,
        height: Option<u64>,
    ) -> Result<U256, Error> {
        self.exec(|client| client.get_balance(address, token, height))
            .await
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, Error> {
        self.exec(|client| client.estimate_gas(call)).await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, Error> {
        self.exec(|client| client.send_raw_transaction(raw)).await
    }
}
