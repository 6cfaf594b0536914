//! Error types for transaction building and first-party signing

use crate::fees::FeeError;
use crate::intent::IntentError;
use crate::ledger::LedgerError;
use crate::retry::Transient;
use crate::signer::SignerError;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Error type for everything between an intent and a sender-signed transaction
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("Fee calculation failed: {0}")]
    Fee(#[from] FeeError),

    #[error("Invalid transfer intent: {0}")]
    Intent(#[from] IntentError),

    /// Failed to fetch a recent blockhash from every endpoint
    #[error("Blockhash error: {0}")]
    Reference(#[from] LedgerError),

    /// Failed to build an instruction for a specific program
    #[error("Instruction build error (program={program}): {reason}")]
    InstructionBuild { program: String, reason: String },

    #[error("Invalid instruction order: {0}")]
    InvalidInstructionOrder(String),

    #[error("Message compilation failed: {0}")]
    Compile(String),

    #[error("Transaction too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Signing failed: {0}")]
    Signing(#[from] SignerError),

    /// The signer's key is not a required signer of the message
    #[error("Signer {0} is not a required signer of this transaction")]
    SignerNotInMessage(Pubkey),

    #[error("Signer returned an invalid signature for {0}")]
    InvalidSignature(Pubkey),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl BuildError {
    /// Check if this error is potentially retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Reference(err) => err.is_transient(),
            Self::Signing(err) => err.is_retryable(),

            Self::Fee(_) => false,
            Self::Intent(_) => false,
            Self::InstructionBuild { .. } => false,
            Self::InvalidInstructionOrder(_) => false,
            Self::Compile(_) => false,
            Self::TooLarge { .. } => false,
            Self::SignerNotInMessage(_) => false,
            Self::InvalidSignature(_) => false,
            Self::Serialization(_) => false,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::Fee(_) => "fee",
            Self::Intent(_) => "intent",
            Self::Reference(_) => "blockhash",
            Self::InstructionBuild { .. } => "instruction",
            Self::InvalidInstructionOrder(_) => "validation",
            Self::Compile(_) => "compile",
            Self::TooLarge { .. } => "size",
            Self::Signing(_) | Self::SignerNotInMessage(_) | Self::InvalidSignature(_) => "signing",
            Self::Serialization(_) => "serialization",
        }
    }
}

// Convenience constructors for common error scenarios
impl BuildError {
    pub fn instruction_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstructionBuild {
            program: program.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidInstructionOrder(reason.into())
    }
}
