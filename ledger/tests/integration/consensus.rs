//! Consensus over the full set of validator reports.

use ledger::chain::Chain;
use ledger::consensus::ObservationConsensus;
use ledger::consensus::VoterState;
use ledger::keys::PublicKey;
use ledger::observed::ObservedTx;
use ledger::testing;
use ledger::tx::TxId;
use rand::seq::SliceRandom as _;
use rand::rngs::StdRng;
use rand::SeedableRng as _;
use test_case::test_case;

/// A report of `AA` that differs from the standard one in its amount.
fn report(amount: u128, finalise_height: u64) -> ObservedTx {
    let mut obs = testing::observed_tx("AA", 10, finalise_height);
    obs.tx.coins[0].amount = amount;
    obs
}

fn resolve(active: u8, reports: &[(PublicKey, ObservedTx)]) -> (VoterState, Option<ObservedTx>) {
    let mut consensus = ObservationConsensus::new((1..=active).map(testing::public_key));
    consensus.set_height(50);
    for (signer, obs) in reports {
        consensus.observe(*signer, obs.clone()).unwrap();
    }
    let tx_id = TxId::new("AA");
    let voter_tx = consensus.voter(&tx_id).and_then(|voter| voter.tx.clone());
    (consensus.state(&tx_id), voter_tx)
}

#[test_case(4, 11; "four validators")]
#[test_case(7, 23; "seven validators")]
#[test_case(10, 37; "ten validators")]
fn any_permutation_resolves_to_the_same_consensus(validators: u8, seed: u64) {
    let mut reports = Vec::new();
    for n in 1..=validators {
        let signer = testing::public_key(n);
        // Most validators agree, a few disagree on the amount.
        let amount = if n % 4 == 0 { 7 } else { 100_000_000 };
        reports.push((signer, report(amount, 22)));
        reports.push((signer, report(amount, 10)));
    }

    let (expected_state, expected_tx) = resolve(validators, &reports);
    assert_eq!(expected_state, VoterState::Finalised);
    let expected_tx = expected_tx.unwrap();
    assert!(expected_tx.is_final());
    assert_eq!(expected_tx.tx.coins[0].amount, 100_000_000);

    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..25 {
        reports.shuffle(&mut rng);
        let (state, tx) = resolve(validators, &reports);
        assert_eq!(state, expected_state);
        assert_eq!(tx.as_ref(), Some(&expected_tx));
    }
}

#[test]
fn split_votes_never_reach_consensus_in_any_order() {
    let mut reports = Vec::new();
    for n in 1..=6u8 {
        let amount = if n % 2 == 0 { 1 } else { 2 };
        reports.push((testing::public_key(n), report(amount, 10)));
    }

    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..25 {
        reports.shuffle(&mut rng);
        let (state, tx) = resolve(6, &reports);
        assert_eq!(state, VoterState::Pending);
        assert!(tx.is_none());
    }
}

#[test]
fn final_reports_take_precedence() {
    let mut reports = Vec::new();
    for n in 1..=4u8 {
        reports.push((testing::public_key(n), report(100_000_000, 22)));
    }
    let (state, tx) = resolve(4, &reports);
    assert_eq!(state, VoterState::Confirmed);
    assert!(!tx.unwrap().is_final());

    for n in 1..=3u8 {
        reports.push((testing::public_key(n), report(100_000_000, 10)));
    }
    let (state, tx) = resolve(4, &reports);
    assert_eq!(state, VoterState::Finalised);
    assert!(tx.unwrap().is_final());
}

#[test]
fn outbound_settles_inbound_only_once_finalised() {
    let mut consensus = ObservationConsensus::new((1..=4).map(testing::public_key));
    let in_hash = TxId::new("AA");
    for n in 1..=3 {
        consensus.observe(testing::public_key(n), testing::observed_tx("AA", 10, 10)).unwrap();
    }
    let action = testing::tx_out_item(Chain::Eth, 1_000);
    consensus.add_action(&in_hash, action.clone()).unwrap();

    let out = ObservedTx::new(testing::outbound_tx(&action, "BB"), 30, action.vault_pub_key, 30);
    for n in 1..=2 {
        consensus.observe(testing::public_key(n), out.clone()).unwrap();
        assert!(!consensus.voter(&in_hash).unwrap().is_done());
    }
    consensus.observe(testing::public_key(3), out).unwrap();
    assert!(consensus.voter(&in_hash).unwrap().is_done());
}
