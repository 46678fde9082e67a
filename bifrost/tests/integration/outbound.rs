use std::sync::Arc;

use alloy::primitives::Address;
use alloy::primitives::U256;
use alloy::sol_types::SolCall as _;
use bifrost::chain::router::IRouter;
use bifrost::chain::router::NATIVE_ASSET;
use bifrost::chain_client::signed_tx_id;
use bifrost::error::Error;
use bifrost::error::RpcErrorKind;
use bifrost::outbound::OutboundSigner;
use bifrost::profile::ChainProfile as _;
use bifrost::storage::BlockMetaStore;
use bifrost::storage::SignerCache;
use bifrost::testing::chain::DEFAULT_GAS_ESTIMATE;
use bifrost::testing::context::TestContext;
use bifrost::testing::tss::LocalTss;
use ledger::asset::Coin;
use ledger::chain::Chain;
use ledger::keysign::Blame;
use ledger::keysign::BlameNode;
use ledger::testing::public_key;
use ledger::testing::tx_out_item;
use ledger::testing::RECIPIENT;
use ledger::tx_out::TxOutItem;
use ledger::vault::ChainContract;
use ledger::vault::Vault;
use test_case::test_case;

use crate::setup::vault;
use crate::setup::TestBridge;
use crate::setup::ONE_ETH;
use crate::setup::ROUTER;

const GWEI: u128 = 1_000_000_000;

/// One ETH to [`RECIPIENT`] from the test vault, at 10 gwei with a budget
/// of 240000 ledger units of gas.
fn item() -> TxOutItem {
    tx_out_item(Chain::Eth, 100_000_000)
}

#[tokio::test]
async fn outbounds_are_signed_and_broadcast() {
    let bridge = TestBridge::new().await;

    let tx_id = bridge
        .client
        .sign_and_broadcast(&item(), 10)
        .await
        .unwrap()
        .unwrap();

    let broadcasts = bridge.chain.broadcasts();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(tx_id, signed_tx_id(&broadcasts[0]));
    assert_eq!(bridge.chain.pending().len(), 1);

    let tx = &bridge.chain.decoded_broadcasts()[0];
    assert_eq!(tx.to, ROUTER);
    assert_eq!(tx.nonce, 0);
    assert_eq!(tx.chain_id, bridge.config.chain_id);
    assert_eq!(tx.gas_price, 10 * GWEI);
    assert_eq!(tx.gas_limit, DEFAULT_GAS_ESTIMATE);
    assert_eq!(tx.value, U256::from(ONE_ETH));

    let call = IRouter::transferOutCall::abi_decode(&tx.data, true).unwrap();
    assert_eq!(call.to, bridge.profile.parse_address(RECIPIENT).unwrap());
    assert_eq!(call.asset, NATIVE_ASSET);
    assert_eq!(call.amount, U256::from(ONE_ETH));
    assert_eq!(call.memo, "OUT:AA");

    let cache = SignerCache::new(Chain::Eth, bridge.context.store.clone());
    assert_eq!(cache.signed_tx(&item()).await.unwrap(), Some(tx_id.clone()));

    let tracked = BlockMetaStore::new(Chain::Eth, bridge.context.store.clone())
        .get_signed_tx_items()
        .await
        .unwrap();
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].hash, tx_id);
    assert_eq!(tracked[0].height, 10);
    assert_eq!(tracked[0].vault_pub_key, public_key(100));
}

#[tokio::test]
async fn outbounds_are_only_signed_once() {
    let bridge = TestBridge::new().await;
    bridge.context.ledger.add_outbound_item(item()).await;
    let signer = OutboundSigner::new(bridge.context.clone(), vec![Arc::clone(&bridge.client)]);

    assert_eq!(signer.process(10).await, vec![(Chain::Eth, 1)]);
    assert_eq!(signer.process(11).await, vec![(Chain::Eth, 0)]);
    assert_eq!(bridge.client.sign_and_broadcast(&item(), 12).await.unwrap(), None);

    assert_eq!(bridge.chain.broadcasts().len(), 1);
    assert_eq!(bridge.context.tss.requests().len(), 1);
}

#[tokio::test]
async fn outbounds_use_consecutive_nonces() {
    let bridge = TestBridge::new().await;
    let mut second = item();
    second.in_hash = ledger::tx::TxId::new("BB");
    second.memo = "OUT:BB".to_string();

    bridge.client.sign_and_broadcast(&item(), 10).await.unwrap();
    bridge.client.sign_and_broadcast(&second, 10).await.unwrap();

    let nonces: Vec<u64> = bridge
        .chain
        .decoded_broadcasts()
        .iter()
        .map(|tx| tx.nonce)
        .collect();
    assert_eq!(nonces, vec![0, 1]);
}

#[tokio::test]
async fn gas_over_budget_lowers_the_gas_price() {
    let bridge = TestBridge::new().await;
    bridge.chain.set_gas_estimate(Some(300_000));

    bridge.client.sign_and_broadcast(&item(), 10).await.unwrap();

    // The budget is 240000 ledger units, 2.4e15 wei.
    let tx = &bridge.chain.decoded_broadcasts()[0];
    assert_eq!(tx.gas_limit, 300_000);
    assert_eq!(tx.gas_price, 8 * GWEI);
    assert!(tx.gas_price * tx.gas_limit as u128 <= 2_400_000_000_000_000);
    assert_eq!(tx.value, U256::from(ONE_ETH));
}

#[tokio::test]
async fn the_gas_price_follows_the_chain_when_it_is_higher() {
    let context = TestContext::builder()
        .modify_settings(|settings| {
            if let Some(eth) = settings.chains.get_mut(&Chain::Eth) {
                eth.default_gas_price = 30 * GWEI as u64;
            }
        })
        .build();
    let bridge = TestBridge::with_context(context).await;

    bridge.client.sign_and_broadcast(&item(), 10).await.unwrap();

    let tx = &bridge.chain.decoded_broadcasts()[0];
    assert_eq!(tx.gas_price, 30 * GWEI);
}

#[tokio::test]
async fn migrations_pay_the_gas_shortfall_from_the_moved_value() {
    let bridge = TestBridge::new().await;
    let new_vault = public_key(101);
    bridge
        .context
        .ledger
        .set_vaults(vec![vault(public_key(100)), vault(new_vault)])
        .await;
    bridge.chain.set_gas_estimate(Some(300_000));

    let mut migrate = item();
    migrate.memo = "MIGRATE:5".to_string();
    migrate.to_address = bridge
        .profile
        .format_address(&bridge.profile.address_of(&new_vault));

    bridge.client.sign_and_broadcast(&migrate, 10).await.unwrap();

    // 300000 gas at 10 gwei is 6e14 wei over a budget of 2.4e15 wei.
    let tx = &bridge.chain.decoded_broadcasts()[0];
    assert_eq!(tx.to, bridge.profile.address_of(&new_vault));
    assert_eq!(tx.gas_price, 10 * GWEI);
    assert_eq!(tx.value, U256::from(ONE_ETH - 600_000_000_000_000));
    assert_eq!(tx.data.as_ref(), b"MIGRATE:5");
}

#[tokio::test]
async fn migrations_worth_less_than_the_shortfall_are_abandoned() {
    let bridge = TestBridge::new().await;
    let new_vault = public_key(101);
    bridge
        .context
        .ledger
        .set_vaults(vec![vault(public_key(100)), vault(new_vault)])
        .await;
    bridge.chain.set_gas_estimate(Some(300_000));

    let mut migrate = tx_out_item(Chain::Eth, 10_000);
    migrate.memo = "MIGRATE:5".to_string();
    migrate.to_address = bridge
        .profile
        .format_address(&bridge.profile.address_of(&new_vault));

    let result = bridge.client.sign_and_broadcast(&migrate, 10).await.unwrap();

    assert_eq!(result, None);
    assert!(bridge.chain.broadcasts().is_empty());
    assert!(bridge.context.tss.requests().is_empty());
}

#[tokio::test]
async fn token_migrations_move_the_allowance() {
    let bridge = TestBridge::new().await;
    let new_vault = public_key(101);
    bridge
        .context
        .ledger
        .set_vaults(vec![vault(public_key(100)), vault(new_vault)])
        .await;
    let token = Address::repeat_byte(0x77);

    let mut migrate = item();
    migrate.memo = "MIGRATE:5".to_string();
    migrate.to_address = bridge
        .profile
        .format_address(&bridge.profile.address_of(&new_vault));
    migrate.coin = Coin {
        asset: ledger::asset::Asset::token(Chain::Eth, "TKN", &format!("{token:#x}")),
        amount: 500,
        decimals: 6,
    };

    bridge.client.sign_and_broadcast(&migrate, 10).await.unwrap();

    let tx = &bridge.chain.decoded_broadcasts()[0];
    assert_eq!(tx.to, ROUTER);
    assert_eq!(tx.value, U256::ZERO);
    let call = IRouter::transferAllowanceCall::abi_decode(&tx.data, true).unwrap();
    assert_eq!(call.router, ROUTER);
    assert_eq!(call.newVault, bridge.profile.address_of(&new_vault));
    assert_eq!(call.asset, token);
    // 500 ledger units of a 6 decimal token.
    assert_eq!(call.amount, U256::from(5));
}

/// Asgard vault 101 on `router`, next to the test vault returning to it.
async fn yggdrasil_return(bridge: &TestBridge, router: Address) -> TxOutItem {
    let asgard = Vault {
        routers: vec![ChainContract {
            chain: Chain::Eth,
            router: format!("{router:#x}"),
        }],
        ..vault(public_key(101))
    };
    bridge
        .context
        .ledger
        .set_vaults(vec![vault(public_key(100)), asgard])
        .await;

    let mut ret = item();
    ret.memo = "YGGDRASIL-:5".to_string();
    ret.to_address = bridge
        .profile
        .format_address(&bridge.profile.address_of(&public_key(101)));
    ret
}

#[test_case(ROUTER, 100_000; "same router")]
#[test_case(Address::repeat_byte(0x43), 150_000; "changed router")]
#[tokio::test]
async fn yggdrasil_returns_to_a_new_router_get_more_gas(asgard_router: Address, gas_limit: u64) {
    let bridge = TestBridge::new().await;
    bridge.chain.set_gas_estimate(Some(100_000));
    let ret = yggdrasil_return(&bridge, asgard_router).await;

    bridge.client.sign_and_broadcast(&ret, 10).await.unwrap().unwrap();

    // Within the budget of 2.4e15 wei, so price and value are untouched.
    let tx = &bridge.chain.decoded_broadcasts()[0];
    assert_eq!(tx.to, ROUTER);
    assert_eq!(tx.gas_limit, gas_limit);
    assert_eq!(tx.gas_price, 10 * GWEI);
    assert_eq!(tx.value, U256::from(ONE_ETH));

    let call = IRouter::returnVaultAssetsCall::abi_decode(&tx.data, true).unwrap();
    assert_eq!(call.router, asgard_router);
    assert_eq!(call.asgard, bridge.profile.address_of(&public_key(101)));
    assert_eq!(call.coins.len(), 1);
    assert_eq!(call.coins[0].asset, NATIVE_ASSET);
    assert_eq!(call.coins[0].amount, U256::from(ONE_ETH));
    assert_eq!(call.memo, "YGGDRASIL-:5");
}

#[tokio::test]
async fn inflated_yggdrasil_returns_pay_the_shortfall_from_the_returned_value() {
    let bridge = TestBridge::new().await;
    bridge.chain.set_gas_estimate(Some(200_000));
    let ret = yggdrasil_return(&bridge, Address::repeat_byte(0x43)).await;

    bridge.client.sign_and_broadcast(&ret, 10).await.unwrap().unwrap();

    // 300000 gas at 10 gwei is 3e15 wei, 6e14 over the budget.
    let tx = &bridge.chain.decoded_broadcasts()[0];
    assert_eq!(tx.gas_limit, 300_000);
    assert_eq!(tx.gas_price, 10 * GWEI);
    let returned = U256::from(ONE_ETH - 600_000_000_000_000);
    assert_eq!(tx.value, returned);
    let call = IRouter::returnVaultAssetsCall::abi_decode(&tx.data, true).unwrap();
    assert_eq!(call.coins[0].amount, returned);
}

#[tokio::test]
async fn aggregator_outbounds_call_the_router_with_the_aggregator() {
    let bridge = TestBridge::new().await;
    let aggregator = Address::repeat_byte(0x55);
    let final_token = Address::repeat_byte(0x66);

    let mut swap = item();
    swap.aggregator = bridge.profile.format_address(&aggregator);
    swap.aggregator_target_asset = bridge.profile.format_address(&final_token);
    swap.aggregator_target_limit = Some(42);

    bridge.client.sign_and_broadcast(&swap, 10).await.unwrap();

    let tx = &bridge.chain.decoded_broadcasts()[0];
    assert_eq!(tx.to, ROUTER);
    assert_eq!(tx.value, U256::from(ONE_ETH));
    let call = IRouter::transferOutAndCallCall::abi_decode(&tx.data, true).unwrap();
    assert_eq!(call.aggregator, aggregator);
    assert_eq!(call.finalToken, final_token);
    assert_eq!(call.amountOutMin, U256::from(42));
}

#[tokio::test]
async fn aggregator_outbounds_with_invalid_addresses_are_dropped() {
    let bridge = TestBridge::new().await;
    let mut swap = item();
    swap.aggregator = "0x12345".to_string();
    swap.aggregator_target_asset = format!("{:#x}", Address::repeat_byte(0x66));

    let result = bridge.client.sign_and_broadcast(&swap, 10).await.unwrap();

    assert_eq!(result, None);
    assert!(bridge.chain.broadcasts().is_empty());
}

#[tokio::test]
async fn inbound_memos_are_never_signed() {
    let bridge = TestBridge::new().await;
    let mut inbound = item();
    inbound.memo = format!("SWAP:ETH.ETH:{RECIPIENT}");

    let error = bridge.client.sign_and_broadcast(&inbound, 10).await.unwrap_err();

    assert!(matches!(error, Error::InboundMemoOnOutbound(_)));
    assert!(bridge.context.tss.requests().is_empty());
}

#[tokio::test]
async fn items_of_another_chain_are_rejected() {
    let bridge = TestBridge::new().await;
    let other = tx_out_item(Chain::Avax, 100_000_000);

    let error = bridge.client.sign_and_broadcast(&other, 10).await.unwrap_err();

    assert!(matches!(error, Error::ChainMismatch(Chain::Avax, Chain::Eth)));
}

#[tokio::test]
async fn failed_gas_estimation_abandons_the_attempt() {
    let bridge = TestBridge::new().await;
    bridge.chain.set_gas_estimate(None);

    let result = bridge.client.sign_and_broadcast(&item(), 10).await.unwrap();

    assert_eq!(result, None);
    // Nothing was cached, so the ledger can schedule the item again.
    let cache = SignerCache::new(Chain::Eth, bridge.context.store.clone());
    assert!(!cache.has_signed(&item()).await.unwrap());
}

#[tokio::test]
async fn keysign_failures_are_reported_with_blame() {
    let blame = Blame {
        fail_reason: "timeout waiting for shares".to_string(),
        round: "SignRound1".to_string(),
        blame_nodes: vec![BlameNode { pub_key: public_key(7) }],
    };
    let context = TestContext::builder()
        .with_tss(LocalTss::failing(blame.clone()))
        .build();
    let bridge = TestBridge::with_context(context).await;

    let error = bridge.client.sign_and_broadcast(&item(), 10).await.unwrap_err();
    assert!(matches!(error, Error::Keysign(_)));

    let failures = bridge.context.ledger.keysign_failures().await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].blame, blame);
    assert_eq!(failures[0].height, 10);
    assert_eq!(failures[0].memo, "OUT:AA");
    assert_eq!(failures[0].pub_key, public_key(100));
    assert!(bridge.chain.broadcasts().is_empty());

    let cache = SignerCache::new(Chain::Eth, bridge.context.store.clone());
    assert!(!cache.has_signed(&item()).await.unwrap());
}

#[tokio::test]
async fn known_transactions_count_as_broadcast() {
    let bridge = TestBridge::new().await;
    bridge.chain.fail_next_broadcast(RpcErrorKind::AlreadyKnown);

    let tx_id = bridge
        .client
        .sign_and_broadcast(&item(), 10)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(tx_id, signed_tx_id(&bridge.chain.broadcasts()[0]));
    let cache = SignerCache::new(Chain::Eth, bridge.context.store.clone());
    assert!(cache.has_signed(&item()).await.unwrap());
}

#[tokio::test]
async fn rejected_broadcasts_are_not_cached() {
    let bridge = TestBridge::new().await;
    bridge.chain.fail_next_broadcast(RpcErrorKind::Other);

    let result = bridge.client.sign_and_broadcast(&item(), 10).await;
    assert!(result.is_err());

    let cache = SignerCache::new(Chain::Eth, bridge.context.store.clone());
    assert!(!cache.has_signed(&item()).await.unwrap());

    // The next attempt goes through.
    assert!(bridge
        .client
        .sign_and_broadcast(&item(), 11)
        .await
        .unwrap()
        .is_some());
}
