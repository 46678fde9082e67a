//! Validators scanning the same chain and reporting to the same ledger.

use std::collections::BTreeMap;

use alloy::primitives::Address;
use bifrost::block_scanner::BlockScanner;
use bifrost::observer::Observer;
use bifrost::profile::ChainProfile as _;
use bifrost::profile::EvmProfile;
use bifrost::storage::BlockMetaStore;
use bifrost::testing::chain::TestChain;
use bifrost::testing::chain::TestTx;
use bifrost::testing::context::TestContext;
use ledger::chain::Chain;
use ledger::testing::public_key;
use ledger::testing::tx_out_item;
use ledger::tx::TxId;

use crate::setup::wei;
use crate::setup::Queues;
use crate::setup::TestBridge;
use crate::setup::ONE_ETH;

const SENDER: Address = Address::repeat_byte(0x11);

/// One validator: its bridge, scanner, queues and observer.
struct Node {
    bridge: TestBridge,
    scanner: BlockScanner<TestContext, TestChain, EvmProfile>,
    queues: Queues,
    observer: Observer<TestContext>,
}

impl Node {
    fn new(bridge: TestBridge) -> Self {
        let heights = BTreeMap::from([(Chain::Eth, bridge.heights.subscribe())]);
        Self {
            scanner: bridge.scanner(),
            queues: Queues::new(),
            observer: Observer::new(bridge.context.clone(), heights),
            bridge,
        }
    }

    /// Scan one block and report whatever was found.
    async fn scan(&mut self, height: u64) {
        let queues = &self.queues;
        self.scanner
            .process_height(height, &queues.inbound_tx, &queues.errata_tx, &queues.solvency_tx)
            .await
            .unwrap();
        while let Ok(tx_in) = self.queues.inbound.try_recv() {
            self.observer.process_tx_in(tx_in).await;
        }
        self.observer.tick().await;
    }
}

#[tokio::test]
async fn deposits_finalise_once_a_supermajority_confirms_them() {
    let first = TestBridge::new().await;
    first
        .context
        .ledger
        .set_active_validators([public_key(1), public_key(2), public_key(3)])
        .await;
    let second = first.join(public_key(2)).await;
    let ledger = first.context.ledger.clone();

    let deposit = TestTx::transfer(SENDER, first.vault_address(), wei(ONE_ETH), "ADD:ETH.ETH");
    let block = first.chain.mine(vec![deposit]);
    first.chain.mine_empty(2);
    let tx_id = TxId::from_bytes(block.transactions[0].hash.as_slice());

    let mut first = Node::new(first);
    let mut second = Node::new(second);

    // Two of three validators agree, but the deposit needs two more blocks.
    first.scan(1).await;
    assert!(!ledger.state().await.consensus.has_consensus(&tx_id));
    second.scan(1).await;
    assert!(ledger.state().await.consensus.has_consensus(&tx_id));
    assert!(!ledger.has_finalised(&tx_id).await);
    assert_eq!(first.observer.on_deck().len(), 1);

    for height in 2..=3 {
        first.scan(height).await;
    }
    assert!(first.observer.on_deck().is_empty());
    assert!(!ledger.has_finalised(&tx_id).await);

    for height in 2..=3 {
        second.scan(height).await;
    }
    assert!(ledger.has_finalised(&tx_id).await);

    // Each validator reported the deposit twice, once final.
    let observations = ledger.observations().await;
    assert_eq!(observations.len(), 4);
    let finals: Vec<_> = observations
        .iter()
        .filter(|(_, _, observation)| observation.is_final())
        .map(|(signer, _, _)| *signer)
        .collect();
    assert_eq!(finals, vec![public_key(1), public_key(2)]);
}

#[tokio::test]
async fn broadcast_outbounds_are_observed_and_no_longer_tracked() {
    let bridge = TestBridge::new().await;
    let item = tx_out_item(Chain::Eth, 100_000_000);
    let tx_id = bridge
        .client
        .sign_and_broadcast(&item, 10)
        .await
        .unwrap()
        .unwrap();
    bridge.chain.mine(Vec::new());

    let store = BlockMetaStore::new(Chain::Eth, bridge.context.store.clone());
    assert_eq!(store.get_signed_tx_items().await.unwrap().len(), 1);

    let recipient = bridge.profile.format_address(&bridge.profile.parse_address(&item.to_address).unwrap());
    let vault = bridge.profile.format_address(&bridge.vault_address());
    let mut node = Node::new(bridge);
    let queues = &node.queues;
    node.scanner
        .process_height(1, &queues.inbound_tx, &queues.errata_tx, &queues.solvency_tx)
        .await
        .unwrap();

    let tx_in = node.queues.inbound.try_recv().unwrap();
    assert_eq!(tx_in.items.len(), 1);
    let observed = &tx_in.items[0];
    assert_eq!(observed.tx, tx_id);
    assert_eq!(observed.memo, "OUT:AA");
    assert_eq!(observed.sender, vault);
    assert_eq!(observed.to, recipient);
    assert_eq!(observed.coins[0].amount, 100_000_000);

    assert!(store.get_signed_tx_items().await.unwrap().is_empty());
}
