//! Reference scenarios for fees, freshness, fee-payer validation and
//! confirmation behaviour per network

mod common;

use common::World;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use sponsored_tx::ledger::{LedgerEndpoint, LedgerReference, LedgerStatus, ScriptedLedger};
use sponsored_tx::sponsor::{CosignErrorCode, SigningEnvelope, SigningRequest};
use sponsored_tx::tx_builder::RecentBlockReference;
use sponsored_tx::{
    ConfirmationStatus, ConfirmationTracker, EndpointPool, FeeCalculator, NetworkProfile, TransferKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[test]
fn scenario_a_fee_tiers() {
    let fees = FeeCalculator::default();
    // 100 units of a 6-decimal token
    let amount = 100_000_000;

    let internal = fees.quote(TransferKind::Internal, amount, 0).unwrap();
    assert_eq!(internal.service_fee, 10_000); // 0.01 units

    let pool_fund = fees.quote(TransferKind::PoolFund, amount, 0).unwrap();
    assert_eq!(pool_fund.service_fee, 1_500_000); // 1.5 units
    assert_eq!(pool_fund.sender_total, amount + 1_500_000);
}

#[tokio::test(start_paused = true)]
async fn scenario_b_staleness_threshold() {
    let world = World::test_network();
    let pipeline = world.pipeline();
    let guard = pipeline.guard();
    assert_eq!(guard.max_age(), Duration::from_millis(45_000));

    let reference = RecentBlockReference::acquired_at(
        LedgerReference {
            blockhash: Hash::new_unique(),
            last_valid_block_height: 1_150,
        },
        Instant::now(),
    );
    let now = reference.acquisition();
    assert!(guard.is_stale(&reference, now + Duration::from_millis(46_000)));
    assert!(!guard.is_stale(&reference, now + Duration::from_millis(10_000)));
}

#[tokio::test(start_paused = true)]
async fn scenario_c_wrong_fee_payer_never_signed() {
    let world = World::test_network();
    let pipeline = world.pipeline();
    let intent = world.intent(TransferKind::Internal, 1_000_000);
    let prepared = pipeline.prepare(&intent, world.sender.as_ref()).await.unwrap();

    let envelope = SigningEnvelope::from_transaction(prepared.signed().transaction()).unwrap();
    for claimed in ["walletA", "walletB"] {
        let request = SigningRequest {
            transaction_bytes: envelope.to_base64(),
            fee_payer_public_key: claimed.to_string(),
            last_valid_block_height: Some(prepared.signed().reference().last_valid_block_height()),
        };
        let response = world.coordinator.handle(&request, true).await;
        assert_eq!(
            response.into_result().unwrap_err().code,
            CosignErrorCode::WrongFeePayer
        );
    }
    assert_eq!(world.ledger.submit_calls(), 0);
}

fn tracker_over(ledger: &Arc<ScriptedLedger>, profile: NetworkProfile) -> ConfirmationTracker {
    let pool = EndpointPool::new(
        vec![Arc::clone(ledger) as Arc<dyn LedgerEndpoint>],
        profile.endpoint_min_dwell,
    )
    .unwrap();
    ConfirmationTracker::new(Arc::new(pool), profile)
}

#[tokio::test(start_paused = true)]
async fn scenario_d_rate_limits_then_confirmed() {
    let ledger = Arc::new(ScriptedLedger::new("mock://ledger"));
    for _ in 0..3 {
        ledger.script_status(Err(ledger.rate_limited()));
    }
    ledger.script_status(Ok(LedgerStatus::Confirmed));

    let profile = NetworkProfile::production();
    let max_polls = profile.max_poll_attempts + 1;
    let record = tracker_over(&ledger, profile).track(Signature::new_unique()).await;

    assert_eq!(record.status(), ConfirmationStatus::Confirmed);
    assert_eq!(record.attempts(), 4);
    assert!(record.attempts() <= max_polls);
    assert_eq!(record.rate_limited_polls(), 3);
    assert!(!record.is_lenient());
}

#[tokio::test(start_paused = true)]
async fn scenario_e_leniency_depends_on_network() {
    let ledger = Arc::new(ScriptedLedger::new("mock://ledger"));
    let signature = Signature::new_unique();

    let production = tracker_over(&ledger, NetworkProfile::production())
        .track(signature)
        .await;
    assert_eq!(production.status(), ConfirmationStatus::Confirmed);
    assert!(production.is_lenient());

    let test_network = tracker_over(&ledger, NetworkProfile::test_network())
        .track(signature)
        .await;
    assert_eq!(test_network.status(), ConfirmationStatus::Indeterminate);
    assert!(!test_network.is_lenient());
}

#[test]
fn leniency_cannot_be_enabled_on_test_network() {
    assert!(NetworkProfile::test_network()
        .with_lenient_confirmation(true)
        .is_err());
    let strict = NetworkProfile::production()
        .with_lenient_confirmation(false)
        .unwrap();
    assert!(!strict.lenient_confirmation);
}
