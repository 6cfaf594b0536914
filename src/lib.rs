//! Sponsored SPL transfers on Solana
//!
//! A transfer is signed by two parties: the sender, who authorizes moving
//! their tokens, and a fee sponsor, who pays the network fee and co-signs
//! only after validating the sender's transaction.
//!
//! - [`tx_builder`]: intent to unsigned transaction, blockhash freshness
//! - [`signer`]: first-party signing capability
//! - [`sponsor`]: sponsor-side validation and co-signing, and the client for it
//! - [`submission`] / [`confirmation`]: broadcast and status tracking
//! - [`pipeline`]: the full commit flow over an immutable component graph

pub mod config;
pub mod confirmation;
pub mod errors;
pub mod fees;
pub mod intent;
pub mod ledger;
pub mod metrics;
pub mod observability;
pub mod pipeline;
pub mod retry;
pub mod signer;
pub mod sponsor;
pub mod submission;
pub mod tx_builder;

pub use config::{ConfigError, NetworkKind, NetworkProfile, PipelineConfig};
pub use confirmation::{ConfirmationRecord, ConfirmationStatus, ConfirmationTracker};
pub use errors::TransferError;
pub use fees::{FeeCalculator, FeeError, FeeQuote, FeeSchedule};
pub use intent::{TransferIntent, TransferKind, TransferLeg};
pub use ledger::{EndpointPool, LedgerEndpoint, LedgerError, LedgerStatus};
pub use observability::TransferId;
pub use pipeline::{PreparedTransfer, SubmitMode, TransferPipeline, TransferReceipt};
pub use retry::BackoffPolicy;
pub use signer::{ClientSigner, KeypairSigner, SenderSignedTransaction, SignerError};
pub use sponsor::{FeeSponsorCoordinator, SponsorClient};
pub use submission::SubmissionEngine;
pub use tx_builder::{BlockhashFreshnessGuard, BuildError, TransactionBuilder, UnsignedTransaction};

// Re-export commonly used types
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
