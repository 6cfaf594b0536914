//! End-to-end commit flow against the scripted ledger

mod common;

use async_trait::async_trait;
use common::World;
use solana_sdk::signature::Signature;
use sponsored_tx::ledger::{LedgerStatus, ScriptedLedger};
use sponsored_tx::sponsor::wire::{decode_transaction_base64, encode_transaction};
use sponsored_tx::sponsor::{
    CosignError, FeeSponsorCoordinator, SignedPayload, SigningRequest, SponsorClient, SponsorError,
};
use sponsored_tx::{ConfirmationStatus, SubmitMode, TransferError, TransferKind};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_sponsor_submits_and_confirms() {
    let world = World::test_network();
    let pipeline = world.pipeline();
    let intent = world.intent(TransferKind::External, 25_000_000);

    let receipt = pipeline.execute(&intent, world.sender.as_ref()).await.unwrap();

    assert!(receipt.submitted_by_sponsor);
    assert_eq!(receipt.rebuilds, 0);
    assert_eq!(receipt.record.status(), ConfirmationStatus::Confirmed);
    assert!(!receipt.record.is_lenient());
    assert_eq!(receipt.quote.service_fee, 25_000);
    assert!(world.ledger.has_landed(&receipt.signature));
    assert_eq!(world.ledger.landed_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_client_submits_after_cosign() {
    let world = World::test_network();
    let pipeline = world.pipeline().with_submit_mode(SubmitMode::ClientSubmits);
    let intent = world.intent(TransferKind::Internal, 1_000_000);

    let receipt = pipeline.execute(&intent, world.sender.as_ref()).await.unwrap();

    assert!(!receipt.submitted_by_sponsor);
    assert!(world.ledger.has_landed(&receipt.signature));
}

#[tokio::test(start_paused = true)]
async fn test_sponsor_stale_rejection_forces_rebuild() {
    let world = World::test_network();
    let pipeline = world.pipeline();
    let intent = world.intent(TransferKind::Internal, 1_000_000);

    let prepared = pipeline.prepare(&intent, world.sender.as_ref()).await.unwrap();

    // Client clock says fresh, but the chain moved to within the margin
    world.ledger.advance_blocks(140);

    let receipt = pipeline.commit(prepared, world.sender.as_ref()).await.unwrap();
    assert_eq!(receipt.rebuilds, 1);
    assert_eq!(world.sender.sign_calls(), 2);
    assert_eq!(world.ledger.landed_count(), 1);
    assert!(world.ledger.has_landed(&receipt.signature));
}

#[tokio::test(start_paused = true)]
async fn test_client_side_staleness_rebuilds_before_handoff() {
    let world = World::test_network();
    let pipeline = world.pipeline();
    let intent = world.intent(TransferKind::PoolFund, 100_000_000);

    let prepared = pipeline.prepare(&intent, world.sender.as_ref()).await.unwrap();
    let fetches_after_prepare = world.ledger.reference_fetches();

    // User sat on the confirmation screen
    tokio::time::advance(Duration::from_millis(46_000)).await;

    let receipt = pipeline.commit(prepared, world.sender.as_ref()).await.unwrap();
    assert_eq!(receipt.rebuilds, 1);
    assert_eq!(receipt.quote.service_fee, 1_500_000);
    assert_eq!(world.sender.sign_calls(), 2);
    assert!(world.ledger.reference_fetches() > fetches_after_prepare);
}

#[tokio::test(start_paused = true)]
async fn test_on_chain_failure_is_terminal() {
    let world = World::production();
    world
        .ledger
        .set_landing_status(LedgerStatus::Failed("insufficient funds".to_string()));
    let pipeline = world.pipeline();
    let intent = world.intent(TransferKind::External, 5_000_000);

    let err = pipeline.execute(&intent, world.sender.as_ref()).await.unwrap_err();
    match err {
        TransferError::OnChainFailure { reason, .. } => assert_eq!(reason, "insufficient funds"),
        other => panic!("expected on-chain failure, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_on_test_network_is_indeterminate() {
    let world = World::test_network();
    world.ledger.set_landing_status(LedgerStatus::Processed);
    let pipeline = world.pipeline();
    let intent = world.intent(TransferKind::Internal, 1_000_000);

    let err = pipeline.execute(&intent, world.sender.as_ref()).await.unwrap_err();
    assert!(matches!(err, TransferError::Indeterminate { .. }));
    assert!(!err.is_retryable());
    assert!(err.signature().is_some());
}

/// Rejects every request with the same error
struct RejectingSponsor {
    error: CosignError,
    calls: AtomicU32,
}

#[async_trait]
impl SponsorClient for RejectingSponsor {
    async fn cosign(&self, _request: &SigningRequest) -> Result<SignedPayload, SponsorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SponsorError::Rejected(self.error.clone()))
    }

    async fn cosign_and_submit(&self, request: &SigningRequest) -> Result<SignedPayload, SponsorError> {
        self.cosign(request).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_sponsor_rate_limit_backs_off_then_surfaces() {
    let world = World::test_network();
    let sponsor = Arc::new(RejectingSponsor {
        error: CosignError::rate_limited("slow down"),
        calls: AtomicU32::new(0),
    });
    let pipeline = world.pipeline_with(sponsor.clone());
    let intent = world.intent(TransferKind::Internal, 1_000_000);

    let err = pipeline.execute(&intent, world.sender.as_ref()).await.unwrap_err();
    let max_attempts = world.profile.backoff.max_attempts;
    assert_eq!(err, TransferError::RateLimited { attempts: max_attempts });
    assert_eq!(sponsor.calls.load(Ordering::SeqCst), max_attempts);
    assert_eq!(world.ledger.landed_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sponsor_stale_forever_is_bounded() {
    let world = World::test_network();
    let sponsor = Arc::new(RejectingSponsor {
        error: CosignError::stale("always stale"),
        calls: AtomicU32::new(0),
    });
    let pipeline = world.pipeline_with(sponsor.clone());
    let intent = world.intent(TransferKind::Internal, 1_000_000);

    let err = pipeline.execute(&intent, world.sender.as_ref()).await.unwrap_err();
    let max_rebuilds = world.config.freshness.max_rebuilds;
    assert_eq!(err, TransferError::StaleReference { rebuilds: max_rebuilds });
    assert_eq!(sponsor.calls.load(Ordering::SeqCst), max_rebuilds + 1);
}

/// Returns the sender-signed bytes with a junk fee-payer signature
struct TamperingSponsor;

#[async_trait]
impl SponsorClient for TamperingSponsor {
    async fn cosign(&self, request: &SigningRequest) -> Result<SignedPayload, SponsorError> {
        let mut tx = decode_transaction_base64(&request.transaction_bytes)?;
        tx.signatures[0] = Signature::new_unique();
        let bytes = encode_transaction(&tx)?;
        Ok(SignedPayload {
            signed_transaction_bytes: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes),
            submission_identifier: None,
        })
    }

    async fn cosign_and_submit(&self, request: &SigningRequest) -> Result<SignedPayload, SponsorError> {
        self.cosign(request).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_tampered_sponsor_response_never_submitted() {
    let world = World::test_network();
    let pipeline = world.pipeline_with(Arc::new(TamperingSponsor));
    let intent = world.intent(TransferKind::Internal, 1_000_000);

    let err = pipeline.execute(&intent, world.sender.as_ref()).await.unwrap_err();
    assert!(matches!(err, TransferError::InvalidSponsorResponse(_)));
    assert_eq!(world.ledger.submit_calls(), 0);
}

/// Broadcasts through the real sponsor once, then loses the response
struct LostResponseSponsor {
    inner: Arc<FeeSponsorCoordinator>,
    ledger: Arc<ScriptedLedger>,
    expire_reference: bool,
    timed_out: AtomicBool,
    calls: AtomicU32,
}

impl LostResponseSponsor {
    fn new(world: &World, expire_reference: bool) -> Self {
        Self {
            inner: Arc::clone(&world.coordinator),
            ledger: Arc::clone(&world.ledger),
            expire_reference,
            timed_out: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl SponsorClient for LostResponseSponsor {
    async fn cosign(&self, request: &SigningRequest) -> Result<SignedPayload, SponsorError> {
        SponsorClient::cosign(self.inner.as_ref(), request).await
    }

    async fn cosign_and_submit(&self, request: &SigningRequest) -> Result<SignedPayload, SponsorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = SponsorClient::cosign_and_submit(self.inner.as_ref(), request).await;
        if self.timed_out.swap(true, Ordering::SeqCst) {
            return result;
        }
        result?;
        // Long enough for the client-side reference to age out
        tokio::time::sleep(Duration::from_secs(46)).await;
        if self.expire_reference {
            self.ledger.advance_blocks(151);
        }
        Err(SponsorError::Transport("operation timed out".to_string()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_lost_sponsor_response_resends_same_bytes() {
    let world = World::test_network();
    let sponsor = Arc::new(LostResponseSponsor::new(&world, false));
    let pipeline = world.pipeline_with(sponsor.clone());
    let intent = world.intent(TransferKind::Internal, 1_000_000);

    let receipt = pipeline.execute(&intent, world.sender.as_ref()).await.unwrap();

    assert_eq!(sponsor.calls.load(Ordering::SeqCst), 2);
    assert_eq!(receipt.rebuilds, 0);
    assert!(receipt.submitted_by_sponsor);
    assert_eq!(world.sender.sign_calls(), 1);
    assert_eq!(world.ledger.landed_count(), 1);
    assert!(world.ledger.has_landed(&receipt.signature));
}

#[tokio::test(start_paused = true)]
async fn test_lost_sponsor_response_never_rebuilds() {
    let world = World::test_network();
    let sponsor = Arc::new(LostResponseSponsor::new(&world, true));
    let pipeline = world.pipeline_with(sponsor.clone());
    let intent = world.intent(TransferKind::Internal, 1_000_000);

    let err = pipeline.execute(&intent, world.sender.as_ref()).await.unwrap_err();

    assert!(
        matches!(err, TransferError::SubmissionOutcomeUnknown { .. }),
        "unexpected error {err:?}"
    );
    assert!(!err.is_retryable());
    assert_eq!(world.sender.sign_calls(), 1);
    assert_eq!(world.ledger.landed_count(), 1);
}
