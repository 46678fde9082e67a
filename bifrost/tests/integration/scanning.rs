use alloy::primitives::Address;
use alloy::primitives::U256;
use bifrost::chain::router::NATIVE_ASSET;
use bifrost::chain::ChainRpc as _;
use bifrost::profile::ChainProfile as _;
use bifrost::storage::BlockMetaStore;
use bifrost::testing::chain::TestTx;
use bifrost::testing::context::TestContext;
use ledger::chain::Chain;
use ledger::testing::public_key;
use ledger::tx::TxId;
use ledger::vault::ErrataBlock;
use ledger::vault::ErrataTx;

use crate::setup::wei;
use crate::setup::Queues;
use crate::setup::TestBridge;
use crate::setup::ONE_ETH;
use crate::setup::ROUTER;

const SENDER: Address = Address::repeat_byte(0x11);

#[tokio::test]
async fn native_deposits_to_a_vault_are_observed() {
    let bridge = TestBridge::new().await;
    let mut queues = Queues::new();
    let scanner = bridge.scanner();

    let deposit = TestTx::transfer(SENDER, bridge.vault_address(), wei(ONE_ETH), "ADD:ETH.ETH");
    let block = bridge.chain.mine(vec![deposit]);

    let next = scanner
        .process_height(1, &queues.inbound_tx, &queues.errata_tx, &queues.solvency_tx)
        .await
        .unwrap();
    assert_eq!(next, 2);

    let tx_in = queues.inbound.try_recv().unwrap();
    assert_eq!(tx_in.chain, Chain::Eth);
    assert_eq!(tx_in.confirmations_required, bridge.config.confirmations_required);
    assert_eq!(tx_in.items.len(), 1);

    let item = &tx_in.items[0];
    assert_eq!(item.tx, TxId::from_bytes(block.transactions[0].hash.as_slice()));
    assert_eq!(item.block_height, 1);
    assert_eq!(item.sender, bridge.profile.format_address(&SENDER));
    assert_eq!(item.to, bridge.profile.format_address(&bridge.vault_address()));
    assert_eq!(item.memo, "ADD:ETH.ETH");
    assert_eq!(item.coins[0].asset, Chain::Eth.gas_asset());
    assert_eq!(item.coins[0].amount, 100_000_000);
    // 21000 gas at 20 gwei.
    assert_eq!(item.gas[0].amount, 42_000);
    assert_eq!(item.observed_vault_pub_key, public_key(100));

    let store = BlockMetaStore::new(Chain::Eth, bridge.context.store.clone());
    assert_eq!(store.get_scanner_position().await.unwrap(), Some(1));
    let meta = store.get_block_meta(1).await.unwrap().unwrap();
    assert_eq!(meta.transactions, vec![item.tx.clone()]);
    assert_eq!(*bridge.heights.borrow(), 1);
}

#[tokio::test]
async fn router_deposits_of_whitelisted_assets_are_observed() {
    let bridge = TestBridge::new().await;
    let mut queues = Queues::new();
    let scanner = bridge.scanner();
    let unknown_token = Address::repeat_byte(0x77);

    let native = TestTx::router_deposit(
        SENDER,
        ROUTER,
        bridge.vault_address(),
        NATIVE_ASSET,
        wei(ONE_ETH / 2),
        "SWAP:ETH.ETH:0x3fC91A3afd70395Cd496C647d5a6CC9D4B2b7FAD",
    );
    let token = TestTx::router_deposit(
        SENDER,
        ROUTER,
        bridge.vault_address(),
        unknown_token,
        wei(ONE_ETH),
        "ADD:ETH.TKN",
    );
    bridge.chain.mine(vec![native, token]);

    scanner
        .process_height(1, &queues.inbound_tx, &queues.errata_tx, &queues.solvency_tx)
        .await
        .unwrap();

    let tx_in = queues.inbound.try_recv().unwrap();
    assert_eq!(tx_in.items.len(), 1);
    let item = &tx_in.items[0];
    assert_eq!(item.to, bridge.profile.format_address(&bridge.vault_address()));
    assert_eq!(item.coins[0].amount, 50_000_000);
    assert!(item.memo.starts_with("SWAP:"));
}

#[tokio::test]
async fn failed_and_unrelated_transactions_are_ignored() {
    let bridge = TestBridge::new().await;
    let mut queues = Queues::new();
    let scanner = bridge.scanner();

    let failed = TestTx::transfer(SENDER, bridge.vault_address(), wei(ONE_ETH), "ADD:ETH.ETH").failed();
    let unrelated = TestTx::transfer(SENDER, Address::repeat_byte(0x22), wei(ONE_ETH), "hello");
    bridge.chain.mine(vec![failed, unrelated]);

    let next = scanner
        .process_height(1, &queues.inbound_tx, &queues.errata_tx, &queues.solvency_tx)
        .await
        .unwrap();

    assert_eq!(next, 2);
    assert!(queues.inbound.try_recv().is_err());
}

#[tokio::test]
async fn reorgs_send_errata_and_rescan_from_the_fork() {
    let bridge = TestBridge::new().await;
    let mut queues = Queues::new();
    let scanner = bridge.scanner();

    let deposit = TestTx::transfer(SENDER, bridge.vault_address(), wei(ONE_ETH), "ADD:ETH.ETH");
    let orphaned = bridge.chain.mine(vec![deposit]);
    bridge.chain.mine(Vec::new());
    for height in 1..=2 {
        scanner
            .process_height(height, &queues.inbound_tx, &queues.errata_tx, &queues.solvency_tx)
            .await
            .unwrap();
    }
    assert!(queues.inbound.try_recv().is_ok());

    bridge.chain.fork_at(1);
    bridge.chain.mine_empty(3);

    let next = scanner
        .process_height(3, &queues.inbound_tx, &queues.errata_tx, &queues.solvency_tx)
        .await
        .unwrap();
    assert_eq!(next, 1);

    let orphaned_tx = TxId::from_bytes(orphaned.transactions[0].hash.as_slice());
    let expected = ErrataBlock {
        height: 1,
        txs: vec![ErrataTx { tx_id: orphaned_tx, chain: Chain::Eth }],
    };
    assert_eq!(queues.errata.try_recv().unwrap(), (Chain::Eth, expected));
    assert!(queues.errata.try_recv().is_err());

    let store = BlockMetaStore::new(Chain::Eth, bridge.context.store.clone());
    assert_eq!(store.get_scanner_position().await.unwrap(), Some(0));
    assert!(store.get_block_meta(1).await.unwrap().is_none());
    assert!(store.get_block_meta(2).await.unwrap().is_none());

    // The new branch scans cleanly.
    let mut next = next;
    while next <= 3 {
        next = scanner
            .process_height(next, &queues.inbound_tx, &queues.errata_tx, &queues.solvency_tx)
            .await
            .unwrap();
    }
    assert_eq!(next, 4);
    assert!(queues.inbound.try_recv().is_err());
    let tip = bridge.chain.get_block(3).await.unwrap();
    let meta = store.get_block_meta(3).await.unwrap().unwrap();
    assert_eq!(meta.hash, format!("{:#x}", tip.hash));
}

#[tokio::test]
async fn network_fees_are_posted_when_the_estimate_moves() {
    let context = TestContext::builder()
        .modify_settings(|settings| {
            if let Some(eth) = settings.chains.get_mut(&Chain::Eth) {
                eth.gas_cache_blocks = 2;
            }
        })
        .build();
    let bridge = TestBridge::with_context(context).await;
    let mut queues = Queues::new();
    let scanner = bridge.scanner();
    let other = Address::repeat_byte(0x22);
    let gwei = 1_000_000_000;

    let mut height = 1;
    let mine_at = |price: u128| {
        let tx = TestTx::transfer(SENDER, other, U256::ZERO, "").with_gas_price(price * gwei);
        bridge.chain.mine(vec![tx]);
    };

    // The window needs two blocks before anything is reported.
    mine_at(20);
    mine_at(20);
    for _ in 0..2 {
        height = scanner
            .process_height(height, &queues.inbound_tx, &queues.errata_tx, &queues.solvency_tx)
            .await
            .unwrap();
    }
    let fees = bridge.context.ledger.network_fees().await;
    assert_eq!(fees.len(), 1);
    assert_eq!(fees[0].transaction_rate, 20);
    assert_eq!(fees[0].transaction_size, bridge.config.max_contract_gas);
    assert_eq!(fees[0].height, 2);

    // An unchanged estimate is not reported again.
    mine_at(20);
    height = scanner
        .process_height(height, &queues.inbound_tx, &queues.errata_tx, &queues.solvency_tx)
        .await
        .unwrap();
    assert_eq!(bridge.context.ledger.network_fees().await.len(), 1);

    // Every move of more than one resolution step is.
    mine_at(40);
    mine_at(40);
    let mut rates = Vec::new();
    for _ in 0..2 {
        height = scanner
            .process_height(height, &queues.inbound_tx, &queues.errata_tx, &queues.solvency_tx)
            .await
            .unwrap();
        let fees = bridge.context.ledger.network_fees().await;
        rates.push(fees.last().map(|fee| fee.transaction_rate));
    }
    // The median of 20 and 40 gwei first, then 40 gwei.
    assert_eq!(rates, vec![Some(30), Some(40)]);
    assert_eq!(bridge.context.ledger.network_fees().await.len(), 3);
    assert!(queues.inbound.try_recv().is_err());
}

#[tokio::test]
async fn scheduled_solvency_checks_run_while_scanning() {
    let context = TestContext::builder()
        .modify_settings(|settings| {
            if let Some(eth) = settings.chains.get_mut(&Chain::Eth) {
                eth.solvency_blocks = 2;
            }
        })
        .build();
    let bridge = TestBridge::with_context(context).await;
    let mut queues = Queues::new();
    let scanner = bridge.scanner();
    bridge.context.ledger.set_halted(Chain::Eth, true).await;
    bridge.chain.mine_empty(2);

    scanner
        .process_height(1, &queues.inbound_tx, &queues.errata_tx, &queues.solvency_tx)
        .await
        .unwrap();
    assert!(queues.solvency.try_recv().is_err());

    scanner
        .process_height(2, &queues.inbound_tx, &queues.errata_tx, &queues.solvency_tx)
        .await
        .unwrap();
    let report = queues.solvency.try_recv().unwrap();
    assert_eq!(report.height, 2);
    assert_eq!(report.pub_key, public_key(100));
}
