//! End-to-end transfer commit: build, sign, co-sign, submit, confirm
//!
//! The pipeline owns one immutable component graph built from a
//! [`PipelineConfig`]. Switching networks means building a new pipeline.

use crate::config::{ConfigError, NetworkProfile, PipelineConfig};
use crate::confirmation::{ConfirmationRecord, ConfirmationStatus, ConfirmationTracker};
use crate::errors::TransferError;
use crate::fees::{FeeError, FeeQuote};
use crate::intent::TransferIntent;
use crate::ledger::{EndpointPool, LedgerEndpoint, LedgerError, RpcLedgerEndpoint};
use crate::observability::TransferId;
use crate::signer::{sign_as_sender, ClientSigner, SenderSignedTransaction};
use crate::sponsor::wire::decode_transaction_base64;
use crate::sponsor::{
    CosignErrorCode, HttpSponsorClient, SignedPayload, SigningEnvelope, SigningRequest, SponsorClient, SponsorError,
};
use crate::submission::SubmissionEngine;
use crate::tx_builder::{BlockhashFreshnessGuard, TransactionBuilder};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Who broadcasts the co-signed transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmitMode {
    /// Sponsor signs and submits in one round-trip
    #[default]
    SponsorSubmits,
    ClientSubmits,
}

/// A sender-signed transfer waiting for commit
#[derive(Debug, Clone)]
pub struct PreparedTransfer {
    id: TransferId,
    signed: SenderSignedTransaction,
}

impl PreparedTransfer {
    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn quote(&self) -> &FeeQuote {
        self.signed.unsigned().quote()
    }

    pub fn intent(&self) -> &TransferIntent {
        self.signed.unsigned().intent()
    }

    pub fn signed(&self) -> &SenderSignedTransaction {
        &self.signed
    }
}

/// Successful, confirmed transfer
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub transfer_id: TransferId,
    pub signature: Signature,
    pub quote: FeeQuote,
    pub record: ConfirmationRecord,
    /// Rebuilds forced by stale references, client or sponsor side
    pub rebuilds: u32,
    pub submitted_by_sponsor: bool,
}

pub struct TransferPipeline {
    profile: NetworkProfile,
    builder: Arc<TransactionBuilder>,
    guard: BlockhashFreshnessGuard,
    sponsor: Arc<dyn SponsorClient>,
    sponsor_key: Pubkey,
    engine: SubmissionEngine,
    tracker: ConfirmationTracker,
    submit_mode: SubmitMode,
    max_rebuilds: u32,
}

impl TransferPipeline {
    pub fn new(
        config: &PipelineConfig,
        pool: Arc<EndpointPool>,
        sponsor: Arc<dyn SponsorClient>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let profile = config.network_profile()?;

        let builder = Arc::new(TransactionBuilder::from_config(Arc::clone(&pool), config, &profile));
        let guard = BlockhashFreshnessGuard::new(Arc::clone(&builder), profile.max_reference_age());
        let engine = SubmissionEngine::new(Arc::clone(&pool), profile.backoff);
        let tracker = ConfirmationTracker::new(pool, profile.clone());

        info!(
            network = ?profile.kind,
            lenient = profile.lenient_confirmation,
            max_reference_age_ms = profile.max_reference_age_ms,
            "Transfer pipeline ready"
        );

        Ok(Self {
            profile,
            builder,
            guard,
            sponsor,
            sponsor_key: config.sponsor.public_key,
            engine,
            tracker,
            submit_mode: SubmitMode::default(),
            max_rebuilds: config.freshness.max_rebuilds,
        })
    }

    /// RPC endpoints plus the remote sponsor service named in `config`
    pub fn connect(config: &PipelineConfig) -> anyhow::Result<Self> {
        let profile = config.network_profile()?;
        let pool = Self::rpc_pool(config, &profile)?;
        let service_url = config
            .sponsor
            .service_url
            .as_deref()
            .context("sponsor.service_url is required for a remote sponsor")?;
        let timeout = Duration::from_millis(config.ledger.request_timeout_ms);
        let sponsor = HttpSponsorClient::new(service_url, timeout).context("Failed to create sponsor client")?;
        Ok(Self::new(config, pool, Arc::new(sponsor))?)
    }

    /// One RPC endpoint per configured URL, primary first
    pub fn rpc_pool(config: &PipelineConfig, profile: &NetworkProfile) -> Result<Arc<EndpointPool>, LedgerError> {
        let timeout = Duration::from_millis(config.ledger.request_timeout_ms);
        let endpoints = config
            .ledger
            .endpoints
            .iter()
            .map(|url| Arc::new(RpcLedgerEndpoint::new(url.clone(), timeout)) as Arc<dyn LedgerEndpoint>)
            .collect();
        Ok(Arc::new(EndpointPool::new(endpoints, profile.endpoint_min_dwell)?))
    }

    pub fn with_submit_mode(mut self, mode: SubmitMode) -> Self {
        self.submit_mode = mode;
        self
    }

    pub fn profile(&self) -> &NetworkProfile {
        &self.profile
    }

    pub fn guard(&self) -> &BlockhashFreshnessGuard {
        &self.guard
    }

    pub fn quote(&self, intent: &TransferIntent) -> Result<FeeQuote, FeeError> {
        self.builder.fees().quote_intent(intent)
    }

    /// Build and collect the sender's signature
    #[instrument(skip_all, fields(kind = %intent.kind()))]
    pub async fn prepare(
        &self,
        intent: &TransferIntent,
        signer: &dyn ClientSigner,
    ) -> Result<PreparedTransfer, TransferError> {
        let unsigned = self.builder.build(intent).await?;
        let signed = sign_as_sender(unsigned, signer).await?;
        let id = TransferId::new();
        debug!(transfer_id = %id, "Transfer prepared");
        Ok(PreparedTransfer { id, signed })
    }

    pub async fn execute(
        &self,
        intent: &TransferIntent,
        signer: &dyn ClientSigner,
    ) -> Result<TransferReceipt, TransferError> {
        let prepared = self.prepare(intent, signer).await?;
        self.commit(prepared, signer).await
    }

    /// Hand the transfer to the sponsor, get it on the ledger and wait for
    /// a terminal status.
    ///
    /// Dropping the returned future after submission does not cancel the
    /// transaction; it only stops watching it.
    #[instrument(skip_all, fields(transfer_id = %prepared.id, mode = ?self.submit_mode))]
    pub async fn commit(
        &self,
        prepared: PreparedTransfer,
        signer: &dyn ClientSigner,
    ) -> Result<TransferReceipt, TransferError> {
        let PreparedTransfer { id, signed } = prepared;
        let (signed, payload, rebuilds) = self.cosign(signed, signer).await?;

        let cosigned = decode_transaction_base64(&payload.signed_transaction_bytes)
            .map_err(|e| TransferError::InvalidSponsorResponse(e.to_string()))?;
        verify_cosigned(signed.transaction(), &cosigned, &self.sponsor_key)?;

        let (signature, submitted_by_sponsor) = match payload.submission_identifier.as_deref() {
            Some(identifier) => {
                let signature = Signature::from_str(identifier).map_err(|_| {
                    TransferError::InvalidSponsorResponse(format!("bad submission identifier {identifier}"))
                })?;
                if signature != cosigned.signatures[0] {
                    return Err(TransferError::InvalidSponsorResponse(
                        "submission identifier does not match the fee payer signature".to_string(),
                    ));
                }
                (signature, true)
            }
            None => {
                let signature = self
                    .engine
                    .submit(&cosigned)
                    .await
                    .map_err(TransferError::Submission)?;
                (signature, false)
            }
        };

        let record = self.tracker.track(signature).await;
        match record.status() {
            ConfirmationStatus::Confirmed => Ok(TransferReceipt {
                transfer_id: id,
                signature,
                quote: *signed.unsigned().quote(),
                record,
                rebuilds,
                submitted_by_sponsor,
            }),
            ConfirmationStatus::Failed => Err(TransferError::OnChainFailure {
                signature,
                reason: record.failure_reason().unwrap_or("unknown").to_string(),
            }),
            ConfirmationStatus::Indeterminate | ConfirmationStatus::Pending => Err(TransferError::Indeterminate {
                signature,
                attempts: record.attempts(),
            }),
        }
    }

    /// Sponsor round-trip with freshness checks, stale rebuilds and
    /// backoff. Returns the transaction that was co-signed.
    ///
    /// Once a co-sign-and-submit exchange fails after the sponsor may have
    /// broadcast, only the identical bytes are ever sent again. Fee-payer
    /// signatures are deterministic, so a resend carries the same
    /// submission identifier and the ledger deduplicates it.
    async fn cosign(
        &self,
        mut signed: SenderSignedTransaction,
        signer: &dyn ClientSigner,
    ) -> Result<(SenderSignedTransaction, SignedPayload, u32), TransferError> {
        let mut rebuilds = 0u32;
        let mut attempt = 0u32;
        let mut outcome_unknown = false;

        loop {
            if !outcome_unknown {
                let before = *signed.reference().blockhash();
                signed = self.guard.ensure_fresh(signed, signer).await?;
                if *signed.reference().blockhash() != before {
                    rebuilds += 1;
                    if rebuilds > self.max_rebuilds {
                        return Err(TransferError::StaleReference { rebuilds });
                    }
                }
            }

            let envelope = SigningEnvelope::from_transaction(signed.transaction()).map_err(TransferError::Validation)?;
            let request = SigningRequest::new(
                &envelope,
                &self.sponsor_key,
                Some(signed.reference().last_valid_block_height()),
            );

            let result = match self.submit_mode {
                SubmitMode::SponsorSubmits => self.sponsor.cosign_and_submit(&request).await,
                SubmitMode::ClientSubmits => self.sponsor.cosign(&request).await,
            };

            let err = match result {
                Ok(payload) => return Ok((signed, payload, rebuilds)),
                Err(err) => err,
            };

            if self.submit_mode == SubmitMode::SponsorSubmits && matches!(err, SponsorError::Transport(_)) {
                if !outcome_unknown {
                    warn!(error = %err, "Sponsor submission outcome unknown, rebuilds disabled");
                }
                outcome_unknown = true;
            }

            let terminal = match err {
                SponsorError::Rejected(rejection) if rejection.code.requires_rebuild() && !outcome_unknown => {
                    if rebuilds >= self.max_rebuilds {
                        return Err(TransferError::StaleReference { rebuilds });
                    }
                    info!(reason = %rejection.message, "Sponsor reported a stale reference, rebuilding");
                    let intent = signed.unsigned().intent().clone();
                    signed = self.guard.rebuild(&intent, signer).await?;
                    rebuilds += 1;
                    continue;
                }
                err if err.is_retryable() => {
                    match self.profile.backoff.delay_for(attempt) {
                        Some(delay) => {
                            warn!(error = %err, delay_ms = delay.as_millis() as u64, "Sponsor unavailable, backing off");
                            sleep(delay).await;
                            attempt += 1;
                            continue;
                        }
                        None if err.code() == Some(CosignErrorCode::RateLimited) => {
                            TransferError::RateLimited { attempts: attempt + 1 }
                        }
                        None => TransferError::SponsorUnavailable(err.to_string()),
                    }
                }
                SponsorError::Rejected(rejection) => TransferError::Validation(rejection),
                SponsorError::InvalidResponse(message) => TransferError::InvalidSponsorResponse(message),
                SponsorError::Transport(message) => TransferError::SponsorUnavailable(message),
            };

            return Err(if outcome_unknown {
                TransferError::SubmissionOutcomeUnknown {
                    last_valid_block_height: signed.reference().last_valid_block_height(),
                    reason: terminal.to_string(),
                }
            } else {
                terminal
            });
        }
    }
}

impl std::fmt::Debug for TransferPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferPipeline")
            .field("network", &self.profile.kind)
            .field("sponsor", &self.sponsor_key)
            .field("submit_mode", &self.submit_mode)
            .field("max_rebuilds", &self.max_rebuilds)
            .finish()
    }
}

/// The sponsor may only have filled the fee-payer slot of exactly the
/// message the sender signed
fn verify_cosigned(
    sent: &VersionedTransaction,
    returned: &VersionedTransaction,
    sponsor: &Pubkey,
) -> Result<(), TransferError> {
    if returned.message != sent.message {
        return Err(TransferError::InvalidSponsorResponse(
            "sponsor returned a different message".to_string(),
        ));
    }
    if returned.signatures.len() != sent.signatures.len() || returned.signatures[1..] != sent.signatures[1..] {
        return Err(TransferError::InvalidSponsorResponse(
            "sponsor altered sender signatures".to_string(),
        ));
    }
    let message = returned.message.serialize();
    if !returned.signatures[0].verify(sponsor.as_ref(), &message) {
        return Err(TransferError::InvalidSponsorResponse(
            "fee payer signature does not verify".to_string(),
        ));
    }
    Ok(())
}
