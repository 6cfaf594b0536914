//! Terminal error taxonomy for one transfer

use crate::ledger::LedgerError;
use crate::sponsor::CosignError;
use crate::tx_builder::BuildError;
use solana_sdk::signature::Signature;
use thiserror::Error;

/// Every way a committed transfer can end other than confirmed
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransferError {
    /// The reference kept expiring faster than it could be co-signed
    #[error("Recent blockhash still stale after {rebuilds} rebuilds")]
    StaleReference { rebuilds: u32 },

    /// The sponsor refused the transaction itself; not retried
    #[error("Sponsor validation failed: {0}")]
    Validation(CosignError),

    #[error("Rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Sponsor unavailable: {0}")]
    SponsorUnavailable(String),

    /// The sponsor returned bytes that are not our transaction, co-signed
    #[error("Invalid sponsor response: {0}")]
    InvalidSponsorResponse(String),

    /// No endpoint accepted the fully signed transaction
    #[error("Submission failed: {0}")]
    Submission(LedgerError),

    /// The ledger executed the transaction and reported an error
    #[error("Transaction {signature} failed on chain: {reason}")]
    OnChainFailure { signature: Signature, reason: String },

    /// Neither confirmed nor failed. Reconcile against on-chain balances
    /// before retrying; re-submitting a rebuilt transaction may transfer twice.
    #[error("Transaction {signature} outcome unknown after {attempts} status checks")]
    Indeterminate { signature: Signature, attempts: u32 },

    /// The sponsor may have broadcast before its co-sign-and-submit
    /// exchange failed. The transaction cannot land after
    /// `last_valid_block_height`; reconcile balances past that height
    /// before starting the transfer again.
    #[error("Sponsor submission outcome unknown (valid until height {last_valid_block_height}): {reason}")]
    SubmissionOutcomeUnknown { last_valid_block_height: u64, reason: String },

    #[error("Build failed: {0}")]
    Build(#[from] BuildError),
}

impl TransferError {
    /// Safe to start the whole transfer again from its intent
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::StaleReference { .. }
            | TransferError::RateLimited { .. }
            | TransferError::SponsorUnavailable(_) => true,
            TransferError::Build(err) => err.is_retryable(),
            // A lost response may hide a landed transaction; only an expired
            // blockhash proves it never will land
            TransferError::Submission(err) => matches!(err, LedgerError::ReferenceNotFound { .. }),
            TransferError::Validation(_)
            | TransferError::InvalidSponsorResponse(_)
            | TransferError::OnChainFailure { .. }
            | TransferError::Indeterminate { .. }
            | TransferError::SubmissionOutcomeUnknown { .. } => false,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            TransferError::StaleReference { .. } => "stale_reference",
            TransferError::Validation(_) => "validation",
            TransferError::RateLimited { .. } => "rate_limited",
            TransferError::SponsorUnavailable(_) => "sponsor_unavailable",
            TransferError::InvalidSponsorResponse(_) => "sponsor_response",
            TransferError::Submission(_) => "submission",
            TransferError::OnChainFailure { .. } => "on_chain_failure",
            TransferError::Indeterminate { .. } => "indeterminate",
            TransferError::SubmissionOutcomeUnknown { .. } => "submission_outcome_unknown",
            TransferError::Build(err) => err.category(),
        }
    }

    /// Submission identifier, when the transaction reached the ledger
    pub fn signature(&self) -> Option<&Signature> {
        match self {
            TransferError::OnChainFailure { signature, .. }
            | TransferError::Indeterminate { signature, .. } => Some(signature),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indeterminate_is_not_retryable() {
        let err = TransferError::Indeterminate {
            signature: Signature::new_unique(),
            attempts: 23,
        };
        assert!(!err.is_retryable());
        assert!(err.signature().is_some());
        assert_eq!(err.category(), "indeterminate");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(TransferError::StaleReference { rebuilds: 3 }.is_retryable());
        assert!(!TransferError::SubmissionOutcomeUnknown {
            last_valid_block_height: 1_150,
            reason: "timed out".to_string(),
        }
        .is_retryable());
        assert!(TransferError::RateLimited { attempts: 5 }.is_retryable());
        assert!(!TransferError::Validation(CosignError::wrong_fee_payer("x")).is_retryable());
        assert!(!TransferError::OnChainFailure {
            signature: Signature::new_unique(),
            reason: "InsufficientFunds".to_string(),
        }
        .is_retryable());
        assert!(!TransferError::Submission(LedgerError::Timeout {
            endpoint: "mock://a".to_string(),
            timeout_ms: 30_000,
        })
        .is_retryable());
        assert!(TransferError::Submission(LedgerError::ReferenceNotFound {
            endpoint: "mock://a".to_string(),
        })
        .is_retryable());
    }
}
