//! Recent-blockhash freshness tracking
//!
//! A blockhash is only usable for a limited number of block heights, and
//! user-paced steps (reviewing the amount, a biometric prompt) can eat most
//! of that window. The guard is consulted immediately before every handoff
//! to the sponsor, not only at build time.

use crate::intent::TransferIntent;
use crate::ledger::LedgerReference;
use crate::metrics::metrics;
use crate::signer::{sign_as_sender, ClientSigner, SenderSignedTransaction};
use crate::tx_builder::builder::TransactionBuilder;
use crate::tx_builder::errors::BuildError;
use solana_sdk::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument};

/// Recent blockhash stamped with the instant it was acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecentBlockReference {
    reference: LedgerReference,
    acquired_at: Instant,
}

impl RecentBlockReference {
    /// Stamp a freshly fetched reference with the current instant
    pub fn stamp(reference: LedgerReference) -> Self {
        Self::acquired_at(reference, Instant::now())
    }

    pub fn acquired_at(reference: LedgerReference, acquired_at: Instant) -> Self {
        Self {
            reference,
            acquired_at,
        }
    }

    pub fn blockhash(&self) -> &Hash {
        &self.reference.blockhash
    }

    pub fn last_valid_block_height(&self) -> u64 {
        self.reference.last_valid_block_height
    }

    pub fn ledger_reference(&self) -> &LedgerReference {
        &self.reference
    }

    pub fn acquisition(&self) -> Instant {
        self.acquired_at
    }

    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.acquired_at)
    }
}

/// Decides whether a reference may still be handed to the sponsor
pub struct BlockhashFreshnessGuard {
    builder: Arc<TransactionBuilder>,
    max_age: Duration,
}

impl BlockhashFreshnessGuard {
    pub fn new(builder: Arc<TransactionBuilder>, max_age: Duration) -> Self {
        Self { builder, max_age }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// A reference is usable only while strictly younger than `max_age`
    pub fn is_stale(&self, reference: &RecentBlockReference, now: Instant) -> bool {
        reference.age_at(now) >= self.max_age
    }

    /// Return `signed` unchanged if its reference is still fresh, otherwise
    /// rebuild from the same intent and collect a new sender signature.
    #[instrument(skip_all, fields(max_age_ms = self.max_age.as_millis() as u64))]
    pub async fn ensure_fresh(
        &self,
        signed: SenderSignedTransaction,
        signer: &dyn ClientSigner,
    ) -> Result<SenderSignedTransaction, BuildError> {
        let now = Instant::now();
        if !self.is_stale(signed.reference(), now) {
            return Ok(signed);
        }

        info!(
            age_ms = signed.reference().age_at(now).as_millis() as u64,
            blockhash = %signed.reference().blockhash(),
            "Reference stale before sponsor handoff, rebuilding"
        );
        self.rebuild(signed.unsigned().intent(), signer).await
    }

    /// Build a new transaction from `intent` with a new reference and sign it
    pub async fn rebuild(
        &self,
        intent: &TransferIntent,
        signer: &dyn ClientSigner,
    ) -> Result<SenderSignedTransaction, BuildError> {
        metrics().reference_rebuilds.inc();
        let unsigned = self.builder.build(intent).await?;
        sign_as_sender(unsigned, signer).await
    }
}
