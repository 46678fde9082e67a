use std::time::Duration;

use alloy::primitives::Address;
use bifrost::context::BifrostCommand;
use bifrost::context::Context as _;
use bifrost::context::TerminationHandle;
use bifrost::solvency::SolvencyRunner;
use bifrost::testing::context::TestContext;
use ledger::asset::Asset;
use ledger::asset::Coin;
use ledger::chain::Chain;
use ledger::testing::public_key;
use ledger::vault::Solvency;
use ledger::vault::Vault;
use ledger::vault::VaultStatus;
use test_case::test_case;
use tokio::sync::mpsc;

use crate::setup::vault;
use crate::setup::wei;
use crate::setup::TestBridge;
use crate::setup::ONE_ETH;

const TOKEN: Address = Address::repeat_byte(0x77);

fn eth(amount: u128) -> Coin {
    Coin {
        asset: Chain::Eth.gas_asset(),
        amount,
        decimals: 0,
    }
}

fn token(amount: u128) -> Coin {
    Coin {
        asset: Asset::token(Chain::Eth, "USDT", &format!("{TOKEN:#x}")),
        amount,
        decimals: 6,
    }
}

/// A vault the ledger expects to hold `coins`.
fn expecting(coins: Vec<Coin>) -> Vault {
    Vault { coins, ..vault(public_key(100)) }
}

/// A bridge whose scanner is caught up with the chain.
async fn healthy_bridge(context: TestContext) -> TestBridge {
    let bridge = TestBridge::with_context(context).await;
    bridge.health.record_tip(100);
    bridge.health.record_scan(100);
    bridge
}

#[tokio::test]
async fn solvent_vaults_are_not_reported() {
    let bridge = healthy_bridge(TestContext::builder().build()).await;
    bridge.context.ledger.set_vaults(vec![expecting(vec![eth(100_000_000)])]).await;
    bridge.chain.set_balance(bridge.vault_address(), None, wei(ONE_ETH));

    let reports = bridge.solvency_reporter().check(100, false).await.unwrap();

    assert!(reports.is_empty());
}

#[tokio::test]
async fn insolvent_vaults_are_reported_with_their_balances() {
    let bridge = healthy_bridge(TestContext::builder().build()).await;
    bridge.context.ledger.set_vaults(vec![expecting(vec![eth(100_000_000)])]).await;
    bridge.chain.set_balance(bridge.vault_address(), None, wei(ONE_ETH / 2));

    let reports = bridge.solvency_reporter().check(100, false).await.unwrap();

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.height, 100);
    assert_eq!(report.chain, Chain::Eth);
    assert_eq!(report.pub_key, public_key(100));
    assert_eq!(report.coins.len(), 1);
    assert_eq!(report.coins[0].asset, Chain::Eth.gas_asset());
    assert_eq!(report.coins[0].amount, 50_000_000);
}

// 3 × 80000 gas at 20 gwei allows a gap of 480000 ledger units.
#[test_case(400_000, true; "within the gas tolerance")]
#[test_case(480_000, true; "at the gas tolerance")]
#[test_case(480_001, false; "beyond the gas tolerance")]
#[tokio::test]
async fn the_gas_asset_may_drift_by_the_gas_tolerance(gap: u128, solvent: bool) {
    let context = TestContext::builder()
        .modify_settings(|settings| {
            if let Some(eth) = settings.chains.get_mut(&Chain::Eth) {
                eth.default_gas_price = 20_000_000_000;
            }
        })
        .build();
    let bridge = healthy_bridge(context).await;
    bridge.context.ledger.set_vaults(vec![expecting(vec![eth(100_000_000)])]).await;
    let balance = (100_000_000 - gap) * 10_000_000_000;
    bridge.chain.set_balance(bridge.vault_address(), None, wei(balance));

    let reports = bridge.solvency_reporter().check(100, false).await.unwrap();

    assert_eq!(reports.is_empty(), solvent);
}

#[tokio::test]
async fn a_poisoned_gas_oracle_falls_back_to_the_default_gas_price() {
    let context = TestContext::builder()
        .modify_settings(|settings| {
            if let Some(eth) = settings.chains.get_mut(&Chain::Eth) {
                eth.default_gas_price = 20_000_000_000;
            }
        })
        .build();
    let bridge = healthy_bridge(context).await;
    let oracle = std::sync::Arc::clone(&bridge.oracle);
    let poisoned = std::thread::spawn(move || {
        let _guard = oracle.lock().unwrap();
        panic!("poisoning the gas oracle");
    })
    .join();
    assert!(poisoned.is_err());
    assert!(bridge.oracle.is_poisoned());

    bridge.context.ledger.set_vaults(vec![expecting(vec![eth(100_000_000)])]).await;
    let balance = (100_000_000 - 480_000) * 10_000_000_000;
    bridge.chain.set_balance(bridge.vault_address(), None, wei(balance));

    let reports = bridge.solvency_reporter().check(100, false).await.unwrap();

    assert!(reports.is_empty());
}

#[tokio::test]
async fn token_shortfalls_are_not_tolerated() {
    let bridge = healthy_bridge(TestContext::builder().build()).await;
    bridge
        .context
        .ledger
        .set_vaults(vec![expecting(vec![eth(100_000_000), token(500)])])
        .await;
    bridge.chain.set_balance(bridge.vault_address(), None, wei(ONE_ETH));
    // 4 token units with 6 decimals are 400 ledger units.
    bridge.chain.set_balance(bridge.vault_address(), Some(TOKEN), wei(4));

    let reports = bridge.solvency_reporter().check(100, false).await.unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].coins.len(), 2);
    assert_eq!(reports[0].coins[1].asset, token(0).asset);
    assert_eq!(reports[0].coins[1].amount, 400);
}

#[tokio::test]
async fn halted_chains_are_always_reported() {
    let bridge = healthy_bridge(TestContext::builder().build()).await;
    bridge.context.ledger.set_vaults(vec![expecting(vec![eth(100_000_000)])]).await;
    bridge.chain.set_balance(bridge.vault_address(), None, wei(ONE_ETH));
    bridge.context.ledger.set_halted(Chain::Eth, true).await;

    let reports = bridge.solvency_reporter().check(100, false).await.unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].coins[0].amount, 100_000_000);
}

#[tokio::test]
async fn unhealthy_scanners_are_always_reported() {
    let bridge = TestBridge::new().await;
    bridge.context.ledger.set_vaults(vec![expecting(vec![eth(100_000_000)])]).await;
    bridge.chain.set_balance(bridge.vault_address(), None, wei(ONE_ETH));

    let reports = bridge.solvency_reporter().check(100, false).await.unwrap();

    assert_eq!(reports.len(), 1);
}

#[tokio::test]
async fn inactive_vaults_are_skipped() {
    let bridge = healthy_bridge(TestContext::builder().build()).await;
    let retired = Vault {
        status: VaultStatus::Inactive,
        ..expecting(vec![eth(100_000_000)])
    };
    bridge.context.ledger.set_vaults(vec![retired]).await;

    let reports = bridge.solvency_reporter().check(100, true).await.unwrap();

    assert!(reports.is_empty());
}

#[tokio::test]
async fn checks_only_run_on_schedule_unless_forced() {
    let bridge = healthy_bridge(TestContext::builder().build()).await;
    bridge.context.ledger.set_vaults(vec![expecting(vec![eth(100_000_000)])]).await;
    let reporter = bridge.solvency_reporter();

    assert!(reporter.is_scheduled(200));
    assert!(!reporter.is_scheduled(101));
    assert!(reporter.check(101, false).await.unwrap().is_empty());
    assert_eq!(reporter.check(101, true).await.unwrap().len(), 1);
}

#[tokio::test]
async fn reports_are_sent_to_the_solvency_queue() {
    let bridge = healthy_bridge(TestContext::builder().build()).await;
    bridge.context.ledger.set_vaults(vec![expecting(vec![eth(100_000_000)])]).await;
    let (sender, mut receiver) = mpsc::channel(10);

    let sent = bridge.solvency_reporter().report(100, false, &sender).await.unwrap();

    assert_eq!(sent, 1);
    let report = receiver.try_recv().unwrap();
    assert_eq!(report.coins[0].amount, 0);
    assert!(receiver.try_recv().is_err());
}

/// A bridge whose runner ticks every 20 milliseconds.
async fn fast_runner_bridge() -> TestBridge {
    let context = TestContext::builder()
        .modify_settings(|settings| {
            if let Some(eth) = settings.chains.get_mut(&Chain::Eth) {
                eth.solvency_interval = Duration::from_millis(20);
            }
        })
        .build();
    TestBridge::with_context(context).await
}

/// Run a solvency runner until the first report arrives.
async fn first_runner_report(bridge: &TestBridge) -> Solvency {
    let (sender, mut receiver) = mpsc::channel(10);
    let term = TerminationHandle::detached();
    let runner = SolvencyRunner::new(bridge.solvency_reporter(), sender);
    let handle = tokio::spawn(runner.run(term.clone()));

    let report = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
        .await
        .expect("no solvency report within a second")
        .unwrap();

    term.signal_shutdown();
    handle.await.unwrap().unwrap();
    report
}

#[tokio::test]
async fn halted_chains_are_reported_before_anything_was_scanned() {
    let bridge = fast_runner_bridge().await;
    bridge.context.ledger.set_vaults(vec![expecting(vec![eth(100_000_000)])]).await;
    bridge.chain.set_balance(bridge.vault_address(), None, wei(ONE_ETH));
    bridge.context.ledger.set_halted(Chain::Eth, true).await;
    bridge.chain.mine_empty(5);
    assert_eq!(bridge.health.scanned_height(), 0);

    let report = first_runner_report(&bridge).await;

    assert_eq!(report.height, 5);
    assert_eq!(report.pub_key, public_key(100));
    assert_eq!(report.coins[0].amount, 100_000_000);
}

#[tokio::test]
async fn stalled_scanners_are_reported_at_the_chain_tip() {
    let bridge = fast_runner_bridge().await;
    bridge.context.ledger.set_vaults(vec![expecting(vec![eth(100_000_000)])]).await;
    bridge.health.record_tip(200);
    bridge.health.record_scan(3);
    bridge.chain.mine_empty(8);

    let report = first_runner_report(&bridge).await;

    assert_eq!(report.height, 8);
}

#[tokio::test]
async fn operators_can_force_a_report_from_a_healthy_runner() {
    let bridge = healthy_bridge(TestContext::builder().build()).await;
    bridge.context.ledger.set_vaults(vec![expecting(vec![eth(100_000_000)])]).await;
    bridge.chain.mine_empty(3);
    let (sender, mut receiver) = mpsc::channel(10);
    let term = TerminationHandle::detached();
    let runner = SolvencyRunner::new(bridge.solvency_reporter(), sender);
    let handle = tokio::spawn(runner.run(term.clone()));

    // Healthy and not halted, so nothing is reported on its own.
    let nothing = tokio::time::timeout(Duration::from_millis(100), receiver.recv()).await;
    assert!(nothing.is_err());

    // Requests for other chains are ignored.
    bridge
        .context
        .signal(BifrostCommand::ForceSolvencyReport(Chain::Avax).into())
        .unwrap();
    let nothing = tokio::time::timeout(Duration::from_millis(100), receiver.recv()).await;
    assert!(nothing.is_err());

    bridge
        .context
        .signal(BifrostCommand::ForceSolvencyReport(Chain::Eth).into())
        .unwrap();
    let report = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
        .await
        .expect("no solvency report within a second")
        .unwrap();
    assert_eq!(report.height, 3);
    assert_eq!(report.coins[0].amount, 0);

    term.signal_shutdown();
    handle.await.unwrap().unwrap();
}
