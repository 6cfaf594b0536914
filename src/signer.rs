//! First-party signing capability
//!
//! Key custody lives outside this crate. The pipeline only ever sees a
//! [`ClientSigner`] that turns message bytes into a signature; it never
//! inspects, logs or stores key material.

use crate::tx_builder::{BuildError, RecentBlockReference, UnsignedTransaction};
use async_trait::async_trait;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::VersionedTransaction,
};
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignerError {
    /// Custody component temporarily unavailable (locked, busy)
    #[error("Signer unavailable: {0}")]
    Unavailable(String),

    /// The user or custody policy refused to sign
    #[error("Signing rejected: {0}")]
    Rejected(String),
}

impl SignerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SignerError::Unavailable(_))
    }
}

/// Async signer over arbitrary bytes
#[async_trait]
pub trait ClientSigner: Send + Sync {
    fn pubkey(&self) -> Pubkey;

    async fn sign(&self, message: &[u8]) -> Result<Signature, SignerError>;
}

/// Local keypair signer (for development and testing)
pub struct KeypairSigner {
    keypair: Keypair,
}

impl KeypairSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignerError> {
        if bytes.len() != 64 {
            return Err(SignerError::Rejected(format!(
                "Invalid keypair length: expected 64 bytes, got {}",
                bytes.len()
            )));
        }
        if bytes.iter().all(|&b| b == 0) {
            return Err(SignerError::Rejected(
                "Invalid keypair: all-zero key rejected".to_string(),
            ));
        }
        Keypair::try_from(bytes)
            .map(Self::new)
            .map_err(|e| SignerError::Rejected(format!("Invalid keypair bytes: {}", e)))
    }
}

#[async_trait]
impl ClientSigner for KeypairSigner {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign(&self, message: &[u8]) -> Result<Signature, SignerError> {
        // Local signing is synchronous but we wrap it in async
        tokio::task::yield_now().await;
        Ok(self.keypair.sign_message(message))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockBehavior {
    Honest,
    /// Signs with a different key than the one it reports
    Forging,
    Failing,
}

/// Mock signer for testing
pub struct MockSigner {
    keypair: Keypair,
    impostor: Keypair,
    behavior: MockBehavior,
    calls: AtomicU32,
}

impl MockSigner {
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::Honest)
    }

    pub fn new_forging() -> Self {
        Self::with_behavior(MockBehavior::Forging)
    }

    pub fn new_failing() -> Self {
        Self::with_behavior(MockBehavior::Failing)
    }

    fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            keypair: Keypair::new(),
            impostor: Keypair::new(),
            behavior,
            calls: AtomicU32::new(0),
        }
    }

    pub fn sign_calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockSigner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientSigner for MockSigner {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign(&self, message: &[u8]) -> Result<Signature, SignerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            MockBehavior::Honest => Ok(self.keypair.sign_message(message)),
            MockBehavior::Forging => Ok(self.impostor.sign_message(message)),
            MockBehavior::Failing => Err(SignerError::Unavailable(
                "Mock signer configured to fail".to_string(),
            )),
        }
    }
}

/// Transaction carrying the sender's signature, fee-payer slot still empty
#[derive(Debug, Clone)]
pub struct SenderSignedTransaction {
    unsigned: UnsignedTransaction,
    transaction: VersionedTransaction,
}

impl SenderSignedTransaction {
    pub fn unsigned(&self) -> &UnsignedTransaction {
        &self.unsigned
    }

    pub fn transaction(&self) -> &VersionedTransaction {
        &self.transaction
    }

    pub fn reference(&self) -> &RecentBlockReference {
        self.unsigned.reference()
    }

    pub fn into_transaction(self) -> VersionedTransaction {
        self.transaction
    }
}

/// Collect the sender's signature for `unsigned`.
///
/// The signer's key must be a required signer other than the fee payer. The
/// returned signature is verified against the message before it is placed
/// in its slot; every other slot stays at the default signature.
pub async fn sign_as_sender(
    unsigned: UnsignedTransaction,
    signer: &dyn ClientSigner,
) -> Result<SenderSignedTransaction, BuildError> {
    let sender = signer.pubkey();
    let signers = unsigned.required_signers();
    let slot = signers
        .iter()
        .skip(1)
        .position(|key| *key == sender)
        .map(|pos| pos + 1)
        .ok_or(BuildError::SignerNotInMessage(sender))?;
    let slot_count = signers.len();

    let message_bytes = unsigned.message_bytes();
    let signature = signer.sign(&message_bytes).await?;
    if !signature.verify(sender.as_ref(), &message_bytes) {
        return Err(BuildError::InvalidSignature(sender));
    }

    let mut signatures = vec![Signature::default(); slot_count];
    signatures[slot] = signature;
    let transaction = VersionedTransaction {
        signatures,
        message: unsigned.message().clone(),
    };

    Ok(SenderSignedTransaction {
        unsigned,
        transaction,
    })
}
