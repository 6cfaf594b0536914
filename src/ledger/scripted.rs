//! In-memory ledger for local development and tests
//!
//! Behaves like a single well-behaved RPC node: it issues blockhashes that
//! expire after [`REFERENCE_LIFETIME_BLOCKS`], verifies signatures on
//! submission and deduplicates by the first signature. Failures are injected
//! by scripting the next results of each call.

use super::{LedgerEndpoint, LedgerError, LedgerReference, LedgerStatus, REFERENCE_LIFETIME_BLOCKS};
use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::hash::{hashv, Hash};
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};

const GENESIS_BLOCK_HEIGHT: u64 = 1_000;

struct LedgerState {
    block_height: u64,
    /// Blockhash -> last valid block height
    issued: HashMap<Hash, u64>,
    landed: HashMap<Signature, LedgerStatus>,
    /// Status assigned to transactions as they land
    landing_status: LedgerStatus,
    reference_script: VecDeque<LedgerError>,
    submit_script: VecDeque<LedgerError>,
    status_script: VecDeque<Result<LedgerStatus, LedgerError>>,
}

/// Scripted in-memory [`LedgerEndpoint`]
pub struct ScriptedLedger {
    url: String,
    state: Mutex<LedgerState>,
    reference_fetches: AtomicU32,
    submit_calls: AtomicU32,
    status_calls: AtomicU32,
}

impl ScriptedLedger {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: Mutex::new(LedgerState {
                block_height: GENESIS_BLOCK_HEIGHT,
                issued: HashMap::new(),
                landed: HashMap::new(),
                landing_status: LedgerStatus::Confirmed,
                reference_script: VecDeque::new(),
                submit_script: VecDeque::new(),
                status_script: VecDeque::new(),
            }),
            reference_fetches: AtomicU32::new(0),
            submit_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
        }
    }

    pub fn block_height(&self) -> u64 {
        self.state.lock().block_height
    }

    pub fn advance_blocks(&self, blocks: u64) {
        self.state.lock().block_height += blocks;
    }

    /// Status given to transactions that land from now on
    pub fn set_landing_status(&self, status: LedgerStatus) {
        self.state.lock().landing_status = status;
    }

    /// Fail the next reference fetch with `err`
    pub fn script_reference_error(&self, err: LedgerError) {
        self.state.lock().reference_script.push_back(err);
    }

    /// Fail the next submission with `err` without landing the transaction
    pub fn script_submit_error(&self, err: LedgerError) {
        self.state.lock().submit_script.push_back(err);
    }

    /// Answer the next status query with `result` regardless of ledger state
    pub fn script_status(&self, result: Result<LedgerStatus, LedgerError>) {
        self.state.lock().status_script.push_back(result);
    }

    pub fn rate_limited(&self) -> LedgerError {
        LedgerError::RateLimited {
            endpoint: self.url.clone(),
        }
    }

    pub fn landed_count(&self) -> usize {
        self.state.lock().landed.len()
    }

    pub fn has_landed(&self, signature: &Signature) -> bool {
        self.state.lock().landed.contains_key(signature)
    }

    pub fn reference_fetches(&self) -> u32 {
        self.reference_fetches.load(Ordering::Relaxed)
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::Relaxed)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::Relaxed)
    }

    fn is_valid_locked(state: &LedgerState, blockhash: &Hash) -> bool {
        state
            .issued
            .get(blockhash)
            .is_some_and(|last_valid| state.block_height <= *last_valid)
    }
}

impl std::fmt::Debug for ScriptedLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedLedger").field("url", &self.url).finish()
    }
}

#[async_trait]
impl LedgerEndpoint for ScriptedLedger {
    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch_recent_reference(&self) -> Result<LedgerReference, LedgerError> {
        let fetch = self.reference_fetches.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        if let Some(err) = state.reference_script.pop_front() {
            return Err(err);
        }

        let blockhash = hashv(&[
            self.url.as_bytes(),
            &state.block_height.to_le_bytes(),
            &fetch.to_le_bytes(),
        ]);
        let last_valid_block_height = state.block_height + REFERENCE_LIFETIME_BLOCKS;
        state.issued.insert(blockhash, last_valid_block_height);

        Ok(LedgerReference {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn is_reference_valid(&self, blockhash: &Hash) -> Result<bool, LedgerError> {
        let state = self.state.lock();
        Ok(Self::is_valid_locked(&state, blockhash))
    }

    async fn submit(&self, transaction: &VersionedTransaction) -> Result<Signature, LedgerError> {
        self.submit_calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        if let Some(err) = state.submit_script.pop_front() {
            return Err(err);
        }

        let signature = transaction
            .signatures
            .first()
            .copied()
            .ok_or_else(|| LedgerError::Unsigned("no signatures".to_string()))?;

        if state.landed.contains_key(&signature) {
            return Err(LedgerError::AlreadyProcessed {
                endpoint: self.url.clone(),
            });
        }
        if !Self::is_valid_locked(&state, transaction.message.recent_blockhash()) {
            return Err(LedgerError::ReferenceNotFound {
                endpoint: self.url.clone(),
            });
        }
        if transaction.signatures.len() != usize::from(transaction.message.header().num_required_signatures)
            || !transaction.verify_with_results().into_iter().all(|ok| ok)
        {
            return Err(LedgerError::Unsigned(signature.to_string()));
        }

        let status = state.landing_status.clone();
        state.landed.insert(signature, status);
        Ok(signature)
    }

    async fn status(&self, signature: &Signature) -> Result<LedgerStatus, LedgerError> {
        self.status_calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        if let Some(result) = state.status_script.pop_front() {
            return result;
        }
        Ok(state
            .landed
            .get(signature)
            .cloned()
            .unwrap_or(LedgerStatus::NotFound))
    }
}
