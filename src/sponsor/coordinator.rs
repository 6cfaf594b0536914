//! Fee sponsor: validates client-signed transactions and adds the
//! fee-payer signature

use super::client::{SponsorClient, SponsorError};
use super::rate_limit::SponsorRateLimiter;
use super::validation::{check_fee_payer, check_sender_signatures, check_structure, sender_of, SponsorPolicy};
use super::wire::{
    decode_transaction_base64, CosignError, CosignErrorCode, SignedPayload, SigningEnvelope, SigningRequest,
    SigningResponse,
};
use crate::config::{ConfigError, NetworkProfile, PipelineConfig};
use crate::ledger::{EndpointPool, LedgerError};
use crate::metrics::metrics;
use crate::retry::BackoffPolicy;
use crate::signer::ClientSigner;
use crate::submission::SubmissionEngine;
use async_trait::async_trait;
use solana_sdk::hash::Hash;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct FeeSponsorCoordinator {
    signer: Arc<dyn ClientSigner>,
    pool: Arc<EndpointPool>,
    policy: SponsorPolicy,
    limiter: SponsorRateLimiter,
    /// Minimum block heights a reference must have left
    safety_margin_blocks: u64,
    backoff: BackoffPolicy,
    engine: SubmissionEngine,
}

impl FeeSponsorCoordinator {
    pub fn new(
        signer: Arc<dyn ClientSigner>,
        pool: Arc<EndpointPool>,
        policy: SponsorPolicy,
        limiter: SponsorRateLimiter,
        profile: &NetworkProfile,
    ) -> Self {
        let engine = SubmissionEngine::new(Arc::clone(&pool), profile.backoff);
        Self {
            signer,
            pool,
            policy,
            limiter,
            safety_margin_blocks: profile.sponsor_safety_margin_blocks,
            backoff: profile.backoff,
            engine,
        }
    }

    /// The signer must hold the configured sponsor key
    pub fn from_config(
        signer: Arc<dyn ClientSigner>,
        pool: Arc<EndpointPool>,
        config: &PipelineConfig,
        profile: &NetworkProfile,
    ) -> Result<Self, ConfigError> {
        if signer.pubkey() != config.sponsor.public_key {
            return Err(ConfigError::Validation(format!(
                "sponsor signer {} does not match configured sponsor {}",
                signer.pubkey(),
                config.sponsor.public_key
            )));
        }
        let policy = SponsorPolicy {
            sponsor: config.sponsor.public_key,
            token_program: config.token.token_program,
            max_compute_unit_price: config.sponsor.max_compute_unit_price,
        };
        let limiter = SponsorRateLimiter::new(config.sponsor.global_rps, config.sponsor.per_sender_per_minute);
        Ok(Self::new(signer, pool, policy, limiter, profile))
    }

    pub fn policy(&self) -> &SponsorPolicy {
        &self.policy
    }

    pub fn limiter(&self) -> &SponsorRateLimiter {
        &self.limiter
    }

    /// Run every check and return the fully signed envelope
    #[instrument(skip_all, fields(fee_payer = %request.fee_payer_public_key))]
    pub async fn validate_and_cosign(&self, request: &SigningRequest) -> Result<SigningEnvelope, CosignError> {
        metrics().cosign_requests.inc();
        let result = self.cosign_checked(request).await;
        match &result {
            Ok(_) => metrics().cosign_signed.inc(),
            Err(err) => {
                metrics()
                    .cosign_rejections
                    .with_label_values(&[err.code.as_str()])
                    .inc();
                info!(code = err.code.as_str(), reason = %err.message, "Signing request rejected");
            }
        }
        result
    }

    /// Co-sign and broadcast. A failed broadcast still returns the signed
    /// bytes, without an identifier, so the client can submit them itself.
    pub async fn cosign_and_submit(&self, request: &SigningRequest) -> Result<SignedPayload, CosignError> {
        let envelope = self.validate_and_cosign(request).await?;
        let transaction = envelope.decode()?;

        let submission_identifier = match self.engine.submit(&transaction).await {
            Ok(signature) => Some(signature.to_string()),
            Err(err) => {
                warn!(error = %err, "Sponsor submission failed, returning signed bytes");
                None
            }
        };

        Ok(SignedPayload {
            signed_transaction_bytes: envelope.to_base64(),
            submission_identifier,
        })
    }

    /// Wire-level entry point
    pub async fn handle(&self, request: &SigningRequest, submit: bool) -> SigningResponse {
        let result = if submit {
            self.cosign_and_submit(request).await
        } else {
            self.validate_and_cosign(request)
                .await
                .map(|envelope| SignedPayload {
                    signed_transaction_bytes: envelope.to_base64(),
                    submission_identifier: None,
                })
        };
        result.into()
    }

    /// Decode a JSON request body and answer it
    pub async fn handle_json(&self, body: &[u8], submit: bool) -> SigningResponse {
        match serde_json::from_slice::<SigningRequest>(body) {
            Ok(request) => self.handle(&request, submit).await,
            Err(e) => {
                metrics()
                    .cosign_rejections
                    .with_label_values(&[CosignErrorCode::Malformed.as_str()])
                    .inc();
                SigningResponse::from(Err::<SignedPayload, _>(CosignError::malformed(format!(
                    "invalid request body: {e}"
                ))))
            }
        }
    }

    async fn cosign_checked(&self, request: &SigningRequest) -> Result<SigningEnvelope, CosignError> {
        if !self.limiter.check_global() {
            return Err(CosignError::rate_limited("sponsor is at capacity"));
        }

        let mut transaction = decode_transaction_base64(&request.transaction_bytes)?;
        check_fee_payer(&transaction, &request.fee_payer_public_key, &self.policy.sponsor)?;

        let sender = sender_of(&transaction)?;
        check_structure(&transaction, &self.policy)?;
        check_sender_signatures(&transaction)?;

        // Only charged once the sender's signature has verified
        if !self.limiter.check_sender(&sender) {
            return Err(CosignError::rate_limited(format!(
                "sender {sender} exceeded its signing quota"
            )));
        }

        self.check_reference(&transaction, request.last_valid_block_height)
            .await?;

        self.sign_fee_payer(&mut transaction).await?;
        debug!(%sender, "Co-signed transaction");
        SigningEnvelope::from_transaction(&transaction)
    }

    /// Reject references that are expired or within the safety margin of
    /// expiry
    async fn check_reference(
        &self,
        transaction: &VersionedTransaction,
        claimed_last_valid: Option<u64>,
    ) -> Result<(), CosignError> {
        let blockhash: Hash = *transaction.message.recent_blockhash();
        let unavailable = |e: LedgerError| CosignError::new(CosignErrorCode::LedgerUnavailable, e.to_string());

        let fresh = self
            .pool
            .with_failover("sponsor_fetch_reference", &self.backoff, |endpoint| async move {
                endpoint.fetch_recent_reference().await
            })
            .await
            .map_err(unavailable)?;
        let current_height = fresh.issued_at_height();

        let ceiling = if blockhash == fresh.blockhash {
            fresh.last_valid_block_height
        } else {
            let valid = self
                .pool
                .with_failover("sponsor_check_reference", &self.backoff, |endpoint| async move {
                    endpoint.is_reference_valid(&blockhash).await
                })
                .await
                .map_err(unavailable)?;
            if !valid {
                return Err(CosignError::stale(format!("blockhash {blockhash} has expired")));
            }
            // Never trust a ceiling beyond what a blockhash issued now would get
            match claimed_last_valid {
                Some(claimed) => claimed.min(fresh.last_valid_block_height),
                None => {
                    return Err(CosignError::stale(
                        "cannot establish remaining validity without lastValidBlockHeight",
                    ))
                }
            }
        };

        let remaining = ceiling.saturating_sub(current_height);
        if remaining <= self.safety_margin_blocks {
            return Err(CosignError::stale(format!(
                "blockhash has {remaining} blocks left, margin is {}",
                self.safety_margin_blocks
            )));
        }
        Ok(())
    }

    async fn sign_fee_payer(&self, transaction: &mut VersionedTransaction) -> Result<(), CosignError> {
        let message = transaction.message.serialize();
        let sponsor = self.signer.pubkey();
        let signature = self
            .signer
            .sign(&message)
            .await
            .map_err(|e| CosignError::new(CosignErrorCode::SponsorUnavailable, e.to_string()))?;
        if !signature.verify(sponsor.as_ref(), &message) {
            return Err(CosignError::new(
                CosignErrorCode::SponsorUnavailable,
                "sponsor signer produced an invalid signature",
            ));
        }
        transaction.signatures[0] = signature;
        Ok(())
    }
}

#[async_trait]
impl SponsorClient for FeeSponsorCoordinator {
    async fn cosign(&self, request: &SigningRequest) -> Result<SignedPayload, SponsorError> {
        let envelope = self.validate_and_cosign(request).await?;
        Ok(SignedPayload {
            signed_transaction_bytes: envelope.to_base64(),
            submission_identifier: None,
        })
    }

    async fn cosign_and_submit(&self, request: &SigningRequest) -> Result<SignedPayload, SponsorError> {
        Ok(FeeSponsorCoordinator::cosign_and_submit(self, request).await?)
    }
}

impl std::fmt::Debug for FeeSponsorCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeeSponsorCoordinator")
            .field("sponsor", &self.policy.sponsor)
            .field("safety_margin_blocks", &self.safety_margin_blocks)
            .field("limiter", &self.limiter)
            .finish()
    }
}
