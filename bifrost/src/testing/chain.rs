//! An in-memory EVM chain that mines blocks on request.
//!
//! Transactions broadcast through [`ChainRpc::send_raw_transaction`] are
//! decoded and checked like a node would: the signature has to recover,
//! the chain id has to match and the nonce has to be fresh. A transaction
//! with the nonce of a pending one replaces it only when it pays a higher
//! gas price. Pending transactions are included by the next call to
//! [`TestChain::mine`].

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use alloy::primitives::keccak256;
use alloy::primitives::Address;
use alloy::primitives::Bytes;
use alloy::primitives::B256;
use alloy::primitives::U256;
use alloy::sol_types::SolCall as _;
use ledger::chain::Chain;

use crate::chain::router::IRouter;
use crate::chain::router::RouterEvent;
use crate::chain::router::NATIVE_ASSET;
use crate::chain::transaction;
use crate::chain::transaction::LegacyTransaction;
use crate::chain::Block;
use crate::chain::CallRequest;
use crate::chain::ChainRpc;
use crate::chain::Log;
use crate::chain::Receipt;
use crate::chain::RpcTransaction;
use crate::error::Error;
use crate::error::RpcError;
use crate::error::RpcErrorKind;
use crate::profile::TRANSFER_GAS;

/// The gas estimate returned unless set otherwise.
pub const DEFAULT_GAS_ESTIMATE: u64 = 60_000;

/// The gas price of transactions built with [`TestTx`], in wei.
pub const DEFAULT_GAS_PRICE: u128 = 20_000_000_000;

/// A transaction to be mined, built by the test.
#[derive(Debug, Clone)]
pub struct TestTx {
    from: Address,
    to: Option<Address>,
    value: U256,
    input: Bytes,
    gas_price: u128,
    logs: Vec<Log>,
    status: bool,
}

impl TestTx {
    /// A call from `from` to `to`.
    pub fn new(from: Address, to: Address, value: U256, input: impl Into<Bytes>) -> Self {
        Self {
            from,
            to: Some(to),
            value,
            input: input.into(),
            gas_price: DEFAULT_GAS_PRICE,
            logs: Vec::new(),
            status: true,
        }
    }

    /// A native transfer carrying `memo` as call data.
    pub fn transfer(from: Address, to: Address, value: U256, memo: &str) -> Self {
        Self::new(from, to, value, memo.as_bytes().to_vec())
    }

    /// A deposit of `amount` of `asset` into `vault` through `router`.
    pub fn router_deposit(
        from: Address,
        router: Address,
        vault: Address,
        asset: Address,
        amount: U256,
        memo: &str,
    ) -> Self {
        let value = if asset == NATIVE_ASSET { amount } else { U256::ZERO };
        let event = IRouter::Deposit {
            to: vault,
            asset,
            amount,
            memo: memo.to_string(),
        };
        Self::new(from, router, value, Bytes::new())
            .with_log(RouterEvent::Deposit(event).to_log(router))
    }

    /// Pay `gas_price` wei per gas.
    pub fn with_gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = gas_price;
        self
    }

    /// Emit `log`.
    pub fn with_log(mut self, log: Log) -> Self {
        self.logs.push(log);
        self
    }

    /// Revert when mined.
    pub fn failed(mut self) -> Self {
        self.status = false;
        self
    }
}

#[derive(Debug)]
struct Mined {
    tx: RpcTransaction,
    receipt: Receipt,
}

#[derive(Debug, Default)]
struct ChainState {
    blocks: BTreeMap<u64, Block>,
    mined: HashMap<B256, Mined>,
    pending: Vec<(RpcTransaction, Vec<Log>)>,
    balances: HashMap<(Address, Option<Address>), U256>,
    nonces: HashMap<Address, u64>,
    broadcasts: Vec<Vec<u8>>,
    gas_estimate: Option<u64>,
    broadcast_error: Option<RpcErrorKind>,
    offline: bool,
    fork: u64,
    tx_count: u64,
}

impl ChainState {
    fn tip(&self) -> u64 {
        self.blocks.keys().next_back().copied().unwrap_or_default()
    }

    fn block_hash(&self, number: u64) -> B256 {
        keccak256(format!("block-{}-{number}", self.fork))
    }

    fn next_tx_hash(&mut self) -> B256 {
        self.tx_count += 1;
        keccak256(format!("tx-{}", self.tx_count))
    }

    fn pending_nonce(&self, address: Address) -> u64 {
        let confirmed = self.nonces.get(&address).copied().unwrap_or_default();
        let pending = self
            .pending
            .iter()
            .filter(|(tx, _)| tx.from == address)
            .count() as u64;
        confirmed + pending
    }

    fn debit(&mut self, address: Address, token: Option<Address>, amount: U256) {
        let balance = self.balances.entry((address, token)).or_default();
        *balance = balance.saturating_sub(amount);
    }

    fn credit(&mut self, address: Address, token: Option<Address>, amount: U256) {
        let balance = self.balances.entry((address, token)).or_default();
        *balance = balance.saturating_add(amount);
    }
}

/// A chain that lives in memory. Clones share the chain.
#[derive(Debug, Clone)]
pub struct TestChain {
    chain: Chain,
    chain_id: u64,
    state: Arc<Mutex<ChainState>>,
}

impl TestChain {
    /// Create a chain holding only its genesis block.
    pub fn new(chain: Chain, chain_id: u64) -> Self {
        let mut state = ChainState {
            gas_estimate: Some(DEFAULT_GAS_ESTIMATE),
            ..ChainState::default()
        };
        let genesis = Block {
            number: 0,
            hash: state.block_hash(0),
            parent_hash: B256::ZERO,
            transactions: Vec::new(),
        };
        state.blocks.insert(0, genesis);

        Self {
            chain,
            chain_id,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap()
    }

    fn error(&self, kind: RpcErrorKind, message: impl Into<String>) -> Error {
        Error::ChainRpc(self.chain, RpcError::with_kind(kind, message))
    }

    fn check_online(&self) -> Result<(), Error> {
        if self.state().offline {
            return Err(self.error(RpcErrorKind::Timeout, "node is offline"));
        }
        Ok(())
    }

    /// The chain id transactions must be signed for.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Mine a block holding the pending transactions followed by `txs`.
    pub fn mine(&self, txs: Vec<TestTx>) -> Block {
        let mut state = self.state();
        let number = state.tip() + 1;
        let parent_hash = state
            .blocks
            .get(&(number - 1))
            .map(|block| block.hash)
            .unwrap_or_default();

        let mut included = std::mem::take(&mut state.pending);
        for test_tx in txs {
            let nonce = state.pending_nonce(test_tx.from)
                + included
                    .iter()
                    .filter(|(tx, _)| tx.from == test_tx.from)
                    .count() as u64;
            let tx = RpcTransaction {
                hash: state.next_tx_hash(),
                from: test_tx.from,
                to: test_tx.to,
                value: test_tx.value,
                input: test_tx.input,
                nonce,
                gas: DEFAULT_GAS_ESTIMATE,
                gas_price: test_tx.gas_price,
                block_number: None,
            };
            if test_tx.status {
                included.push((tx, test_tx.logs));
            } else {
                // Reverted transactions land in the block without effects.
                let receipt = Receipt {
                    transaction_hash: tx.hash,
                    status: false,
                    gas_used: TRANSFER_GAS,
                    effective_gas_price: tx.gas_price,
                    logs: Vec::new(),
                    block_number: number,
                };
                let mut tx = tx;
                tx.block_number = Some(number);
                *state.nonces.entry(tx.from).or_default() += 1;
                state.mined.insert(tx.hash, Mined { tx, receipt });
            }
        }

        let mut transactions: Vec<RpcTransaction> = state
            .mined
            .values()
            .filter(|mined| mined.receipt.block_number == number)
            .map(|mined| mined.tx.clone())
            .collect();

        for (mut tx, logs) in included {
            tx.block_number = Some(number);
            let receipt = Receipt {
                transaction_hash: tx.hash,
                status: true,
                gas_used: TRANSFER_GAS,
                effective_gas_price: tx.gas_price,
                logs,
                block_number: number,
            };

            let fee = U256::from(receipt.fee());
            state.debit(tx.from, None, tx.value.saturating_add(fee));
            if let Some(to) = tx.to {
                state.credit(to, None, tx.value);
            }
            *state.nonces.entry(tx.from).or_default() += 1;

            transactions.push(tx.clone());
            state.mined.insert(tx.hash, Mined { tx, receipt });
        }

        let block = Block {
            number,
            hash: state.block_hash(number),
            parent_hash,
            transactions,
        };
        state.blocks.insert(number, block.clone());
        block
    }

    /// Mine `count` empty blocks.
    pub fn mine_empty(&self, count: u64) {
        for _ in 0..count {
            self.mine(Vec::new());
        }
    }

    /// Drop every block from `height` on and continue on a fork, so that
    /// blocks mined afterwards get new hashes. Transactions of dropped
    /// blocks are forgotten.
    pub fn fork_at(&self, height: u64) {
        let mut state = self.state();
        let dropped = state.blocks.split_off(&height.max(1));
        for block in dropped.values() {
            for tx in &block.transactions {
                state.mined.remove(&tx.hash);
            }
        }
        state.fork += 1;
    }

    /// Forget a pending transaction, as if the mempool evicted it.
    pub fn drop_pending(&self, hash: B256) {
        self.state().pending.retain(|(tx, _)| tx.hash != hash);
    }

    /// The hashes of the pending transactions.
    pub fn pending(&self) -> Vec<B256> {
        self.state().pending.iter().map(|(tx, _)| tx.hash).collect()
    }

    /// Set the balance of `address` in the native coin, or in `token`.
    pub fn set_balance(&self, address: Address, token: Option<Address>, balance: U256) {
        self.state().balances.insert((address, token), balance);
    }

    /// Set the confirmed nonce of `address`.
    pub fn set_nonce(&self, address: Address, nonce: u64) {
        self.state().nonces.insert(address, nonce);
    }

    /// Set the gas estimate. `None` makes estimation fail.
    pub fn set_gas_estimate(&self, estimate: Option<u64>) {
        self.state().gas_estimate = estimate;
    }

    /// Fail the next broadcast with the given kind.
    pub fn fail_next_broadcast(&self, kind: RpcErrorKind) {
        self.state().broadcast_error = Some(kind);
    }

    /// Fail every request while `offline` is set.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Every raw transaction broadcast so far, accepted or not.
    pub fn broadcasts(&self) -> Vec<Vec<u8>> {
        self.state().broadcasts.clone()
    }

    /// Decode the broadcast transactions.
    pub fn decoded_broadcasts(&self) -> Vec<LegacyTransaction> {
        self.broadcasts()
            .iter()
            .map(|raw| LegacyTransaction::decode_signed(raw).unwrap().0)
            .collect()
    }

    /// The router events a vault transaction emits.
    fn outbound_logs(from: Address, tx: &LegacyTransaction) -> Vec<Log> {
        let Ok(call) = IRouter::transferOutCall::abi_decode(&tx.data, true) else {
            return Vec::new();
        };
        let event = IRouter::TransferOut {
            vault: from,
            to: call.to,
            asset: call.asset,
            amount: call.amount,
            memo: call.memo,
        };
        vec![RouterEvent::TransferOut(event).to_log(tx.to)]
    }
}

impl ChainRpc for TestChain {
    async fn get_height(&self) -> Result<u64, Error> {
        self.check_online()?;
        Ok(self.state().tip())
    }

    async fn get_block(&self, height: u64) -> Result<Block, Error> {
        self.check_online()?;
        self.state()
            .blocks
            .get(&height)
            .cloned()
            .ok_or_else(|| self.error(RpcErrorKind::NotFound, format!("block {height} not found")))
    }

    async fn get_receipt(&self, hash: B256) -> Result<Option<Receipt>, Error> {
        self.check_online()?;
        Ok(self.state().mined.get(&hash).map(|mined| mined.receipt.clone()))
    }

    async fn get_transaction(&self, hash: B256) -> Result<Option<RpcTransaction>, Error> {
        self.check_online()?;
        let state = self.state();
        if let Some(mined) = state.mined.get(&hash) {
            return Ok(Some(mined.tx.clone()));
        }
        Ok(state
            .pending
            .iter()
            .find(|(tx, _)| tx.hash == hash)
            .map(|(tx, _)| tx.clone()))
    }

    async fn get_nonce(&self, address: Address) -> Result<u64, Error> {
        self.check_online()?;
        Ok(self.state().pending_nonce(address))
    }

    async fn get_balance(
        &self,
        address: Address,
        token: Option<Address>,
        _height: Option<u64>,
    ) -> Result<U256, Error> {
        self.check_online()?;
        Ok(self
            .state()
            .balances
            .get(&(address, token))
            .copied()
            .unwrap_or_default())
    }

    async fn estimate_gas(&self, _call: &CallRequest) -> Result<u64, Error> {
        self.check_online()?;
        self.state()
            .gas_estimate
            .ok_or_else(|| self.error(RpcErrorKind::Other, "execution reverted"))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, Error> {
        self.check_online()?;
        let mut state = self.state();
        state.broadcasts.push(raw.to_vec());

        if let Some(kind) = state.broadcast_error.take() {
            return Err(self.error(kind, "broadcast rejected"));
        }

        let (tx, signature) = LegacyTransaction::decode_signed(raw)?;
        if tx.chain_id != self.chain_id {
            return Err(self.error(RpcErrorKind::Other, "invalid chain id"));
        }
        let signer = transaction::recover_signer(&tx, &signature)?;
        let from = transaction::address_of(&signer);
        let hash = keccak256(raw);

        if state.mined.contains_key(&hash) || state.pending.iter().any(|(tx, _)| tx.hash == hash) {
            return Err(self.error(RpcErrorKind::AlreadyKnown, "already known"));
        }
        let confirmed = state.nonces.get(&from).copied().unwrap_or_default();
        if tx.nonce < confirmed {
            return Err(self.error(RpcErrorKind::NonceTooLow, "nonce too low"));
        }

        let replaced = state
            .pending
            .iter()
            .position(|(pending, _)| pending.from == from && pending.nonce == tx.nonce);
        if let Some(index) = replaced {
            if state.pending[index].0.gas_price >= tx.gas_price {
                return Err(self.error(RpcErrorKind::Other, "replacement transaction underpriced"));
            }
            state.pending.remove(index);
        } else if tx.nonce != state.pending_nonce(from) {
            return Err(self.error(RpcErrorKind::Other, "nonce gap"));
        }

        let logs = Self::outbound_logs(from, &tx);
        let pending = RpcTransaction {
            hash,
            from,
            to: Some(tx.to),
            value: tx.value,
            input: tx.data,
            nonce: tx.nonce,
            gas: tx.gas_limit,
            gas_price: tx.gas_price,
            block_number: None,
        };
        state.pending.push((pending, logs));
        Ok(hash)
    }
}
