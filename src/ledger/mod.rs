//! Ledger access: the RPC surface every component talks to
//!
//! Components never hold an RPC client directly; they go through
//! [`EndpointPool`], which owns an ordered list of [`LedgerEndpoint`]s and
//! handles rotation when one of them misbehaves.

pub mod errors;
pub mod pool;
pub mod rpc;
pub mod scripted;

pub use errors::LedgerError;
pub use pool::{EndpointPool, EndpointStats};
pub use rpc::RpcLedgerEndpoint;
pub use scripted::ScriptedLedger;

use async_trait::async_trait;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;

/// Number of block heights a recent blockhash stays usable
pub const REFERENCE_LIFETIME_BLOCKS: u64 = 150;

/// Recent blockhash as reported by a ledger endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerReference {
    pub blockhash: Hash,
    /// Last block height at which a transaction using `blockhash` can land
    pub last_valid_block_height: u64,
}

impl LedgerReference {
    /// Block height at which this reference was issued
    pub fn issued_at_height(&self) -> u64 {
        self.last_valid_block_height
            .saturating_sub(REFERENCE_LIFETIME_BLOCKS)
    }
}

/// Status of a transaction as seen by one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerStatus {
    /// The endpoint has not indexed the signature (yet)
    NotFound,
    Processed,
    Confirmed,
    Finalized,
    /// The transaction landed with an explicit on-chain error
    Failed(String),
}

impl LedgerStatus {
    /// Whether the status satisfies a `confirmed` commitment
    pub fn is_confirmed(&self) -> bool {
        matches!(self, LedgerStatus::Confirmed | LedgerStatus::Finalized)
    }
}

/// One ledger-access endpoint
#[async_trait]
pub trait LedgerEndpoint: Send + Sync {
    fn url(&self) -> &str;

    async fn fetch_recent_reference(&self) -> Result<LedgerReference, LedgerError>;

    /// Whether `blockhash` can still be used by a new transaction
    async fn is_reference_valid(&self, blockhash: &Hash) -> Result<bool, LedgerError>;

    /// Broadcast a fully signed transaction without simulating it first
    async fn submit(&self, transaction: &VersionedTransaction) -> Result<Signature, LedgerError>;

    async fn status(&self, signature: &Signature) -> Result<LedgerStatus, LedgerError>;
}
