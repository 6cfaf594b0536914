//! Broadcast of fully signed transactions
//!
//! Resubmitting the same signed bytes is idempotent on the ledger: the
//! transaction is keyed by its first signature, so a retry after a lost
//! response either lands it once or reports it as already processed.

use crate::ledger::{EndpointPool, LedgerError};
use crate::metrics::metrics;
use crate::retry::BackoffPolicy;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct SubmissionEngine {
    pool: Arc<EndpointPool>,
    backoff: BackoffPolicy,
}

impl SubmissionEngine {
    pub fn new(pool: Arc<EndpointPool>, backoff: BackoffPolicy) -> Self {
        Self { pool, backoff }
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    /// Submit `transaction` and return its submission identifier.
    ///
    /// Transient endpoint failures rotate the pool and retry the same bytes.
    /// An expired blockhash is returned as an error; the caller decides
    /// whether a rebuild is safe.
    #[instrument(skip_all, fields(signature = tracing::field::Empty))]
    pub async fn submit(&self, transaction: &VersionedTransaction) -> Result<Signature, LedgerError> {
        let signature = submission_identifier(transaction)?;
        tracing::Span::current().record("signature", tracing::field::display(&signature));

        if let Some(slot) = transaction
            .signatures
            .iter()
            .position(|sig| *sig == Signature::default())
        {
            return Err(LedgerError::Unsigned(format!("signature slot {slot} is empty")));
        }

        metrics().submissions.inc();
        let result = self
            .pool
            .with_failover("submit_transaction", &self.backoff, |endpoint| async move {
                endpoint.submit(transaction).await
            })
            .await;

        match result {
            Ok(landed) => {
                info!(signature = %landed, "Transaction submitted");
                Ok(landed)
            }
            Err(LedgerError::AlreadyProcessed { endpoint }) => {
                info!(%endpoint, "Transaction already on ledger, treating as submitted");
                Ok(signature)
            }
            Err(err) => {
                metrics().submission_failures.inc();
                warn!(error = %err, category = err.category(), "Submission failed");
                Err(err)
            }
        }
    }
}

/// First signature of a transaction, its ledger-wide identifier
pub fn submission_identifier(transaction: &VersionedTransaction) -> Result<Signature, LedgerError> {
    transaction
        .signatures
        .first()
        .copied()
        .ok_or_else(|| LedgerError::Unsigned("transaction has no signatures".to_string()))
}
