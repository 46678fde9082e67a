use alloy::primitives::U256;
use bifrost::chain_client::signed_tx_id;
use bifrost::storage::BlockMetaStore;
use bifrost::unstuck::UnstuckOutcome;
use ledger::chain::Chain;
use ledger::testing::tx_out_item;
use ledger::tx::TxId;

use crate::setup::TestBridge;

/// Broadcast one outbound at ledger height 10 and return its hash.
async fn broadcast(bridge: &TestBridge) -> TxId {
    let item = tx_out_item(Chain::Eth, 100_000_000);
    bridge
        .client
        .sign_and_broadcast(&item, 10)
        .await
        .unwrap()
        .unwrap()
}

async fn tracked(bridge: &TestBridge) -> Vec<(TxId, u64)> {
    BlockMetaStore::new(Chain::Eth, bridge.context.store.clone())
        .get_signed_tx_items()
        .await
        .unwrap()
        .into_iter()
        .map(|item| (item.hash, item.height))
        .collect()
}

#[tokio::test]
async fn stuck_outbounds_are_replaced_after_the_wait() {
    let bridge = TestBridge::new().await;
    let runner = bridge.unstuck_runner();
    let stuck = broadcast(&bridge).await;

    let outcomes = runner.unstuck(100).await.unwrap();
    assert_eq!(outcomes, vec![(stuck.clone(), UnstuckOutcome::Waiting)]);
    assert_eq!(bridge.chain.broadcasts().len(), 1);

    let outcomes = runner.unstuck(310).await.unwrap();
    let broadcasts = bridge.chain.broadcasts();
    assert_eq!(broadcasts.len(), 2);
    let replacement = signed_tx_id(&broadcasts[1]);
    assert_eq!(outcomes, vec![(stuck, UnstuckOutcome::Replaced(replacement.clone()))]);

    // A zero value self send at the same nonce and a higher price.
    let tx = &bridge.chain.decoded_broadcasts()[1];
    assert_eq!(tx.nonce, 0);
    assert_eq!(tx.to, bridge.vault_address());
    assert_eq!(tx.value, U256::ZERO);
    assert!(tx.data.is_empty());
    assert_eq!(tx.gas_limit, 21_000);
    assert_eq!(tx.gas_price, 11_000_000_001);

    // The node replaced the stuck transaction.
    assert_eq!(bridge.chain.pending().len(), 1);
    assert_eq!(tracked(&bridge).await, vec![(replacement.clone(), 310)]);

    // The replacement waits again from the height it was sent at.
    let outcomes = runner.unstuck(400).await.unwrap();
    assert_eq!(outcomes, vec![(replacement, UnstuckOutcome::Waiting)]);
    assert_eq!(bridge.chain.broadcasts().len(), 2);
}

#[tokio::test]
async fn confirmed_outbounds_are_no_longer_tracked() {
    let bridge = TestBridge::new().await;
    let runner = bridge.unstuck_runner();
    let tx_id = broadcast(&bridge).await;
    bridge.chain.mine(Vec::new());

    let outcomes = runner.unstuck(310).await.unwrap();

    assert_eq!(outcomes, vec![(tx_id, UnstuckOutcome::Confirmed)]);
    assert!(tracked(&bridge).await.is_empty());
    assert_eq!(bridge.chain.broadcasts().len(), 1);
}

#[tokio::test]
async fn outbounds_unknown_to_the_node_are_dropped() {
    let bridge = TestBridge::new().await;
    let runner = bridge.unstuck_runner();
    let tx_id = broadcast(&bridge).await;
    for hash in bridge.chain.pending() {
        bridge.chain.drop_pending(hash);
    }

    let outcomes = runner.unstuck(310).await.unwrap();

    assert_eq!(outcomes, vec![(tx_id, UnstuckOutcome::Dropped)]);
    assert!(tracked(&bridge).await.is_empty());
    assert_eq!(bridge.context.tss.requests().len(), 1);
}

#[tokio::test]
async fn unreachable_nodes_keep_the_outbound_tracked() {
    let bridge = TestBridge::new().await;
    let runner = bridge.unstuck_runner();
    let tx_id = broadcast(&bridge).await;
    bridge.chain.set_offline(true);

    let outcomes = runner.unstuck(310).await.unwrap();

    assert!(outcomes.is_empty());
    assert_eq!(tracked(&bridge).await, vec![(tx_id, 10)]);
}
