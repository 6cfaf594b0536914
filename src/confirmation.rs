//! Confirmation tracking for submitted transactions
//!
//! Polling runs in up to three phases: a short quick phase at a tight
//! interval (test networks only), a main phase at the profile's poll
//! interval with backoff while endpoints are rate limiting, and one final
//! status check after a grace period.

use crate::config::NetworkProfile;
use crate::ledger::{EndpointPool, LedgerError, LedgerStatus};
use crate::metrics::metrics;
use crate::retry::Transient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::signature::Signature;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
    /// The ledger reported an explicit error for the transaction
    Failed,
    /// Polling ended without a confirmed or failed status
    Indeterminate,
}

impl ConfirmationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationStatus::Pending => "pending",
            ConfirmationStatus::Confirmed => "confirmed",
            ConfirmationStatus::Failed => "failed",
            ConfirmationStatus::Indeterminate => "indeterminate",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConfirmationStatus::Pending)
    }
}

/// Outcome of tracking one submission identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRecord {
    signature: Signature,
    status: ConfirmationStatus,
    /// Status queries issued, including failed ones
    attempts: u32,
    first_seen: DateTime<Utc>,
    failure_reason: Option<String>,
    /// Confirmed without an observed confirmed status
    lenient: bool,
    rate_limited_polls: u32,
}

impl ConfirmationRecord {
    pub(crate) fn new(signature: Signature) -> Self {
        Self {
            signature,
            status: ConfirmationStatus::Pending,
            attempts: 0,
            first_seen: Utc::now(),
            failure_reason: None,
            lenient: false,
            rate_limited_polls: 0,
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn status(&self) -> ConfirmationStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn is_lenient(&self) -> bool {
        self.lenient
    }

    pub fn rate_limited_polls(&self) -> u32 {
        self.rate_limited_polls
    }

    pub(crate) fn set_failed(&mut self, reason: impl Into<String>) {
        self.status = ConfirmationStatus::Failed;
        self.failure_reason = Some(reason.into());
    }

    pub(crate) fn set_status(&mut self, status: ConfirmationStatus) {
        self.status = status;
    }
}

/// What one poll told us
enum PollOutcome {
    Terminal,
    Pending,
    RateLimited,
    Error,
}

pub struct ConfirmationTracker {
    pool: Arc<EndpointPool>,
    profile: NetworkProfile,
}

impl ConfirmationTracker {
    pub fn new(pool: Arc<EndpointPool>, profile: NetworkProfile) -> Self {
        Self { pool, profile }
    }

    pub fn profile(&self) -> &NetworkProfile {
        &self.profile
    }

    /// Poll until `signature` reaches a terminal status.
    ///
    /// An explicit on-chain failure ends tracking immediately and is never
    /// overridden by lenient confirmation.
    #[instrument(skip(self), fields(network = ?self.profile.kind))]
    pub async fn track(&self, signature: Signature) -> ConfirmationRecord {
        let started = Instant::now();
        let mut record = ConfirmationRecord::new(signature);
        let mut rate_limit_streak = 0u32;

        // Quick phase
        let quick_window = self.profile.quick_phase_window();
        if !quick_window.is_zero() {
            let deadline = started + quick_window;
            let interval = self.profile.quick_phase_interval();
            loop {
                if let PollOutcome::Terminal = self.poll(&mut record, &mut rate_limit_streak).await {
                    return self.finish(record, started);
                }
                if Instant::now() + interval > deadline {
                    break;
                }
                sleep(interval).await;
            }
            debug!(attempts = record.attempts, "Quick phase ended without a terminal status");
        }

        // Main phase
        for _ in 0..self.profile.max_poll_attempts {
            sleep(self.next_delay(rate_limit_streak)).await;
            if let PollOutcome::Terminal = self.poll(&mut record, &mut rate_limit_streak).await {
                return self.finish(record, started);
            }
        }

        // Fallback
        sleep(self.profile.fallback_grace()).await;
        if let PollOutcome::Terminal = self.poll(&mut record, &mut rate_limit_streak).await {
            return self.finish(record, started);
        }

        if self.profile.lenient_confirmation {
            warn!(
                %signature,
                attempts = record.attempts,
                "No confirmed status observed, reporting lenient success"
            );
            record.lenient = true;
            record.set_status(ConfirmationStatus::Confirmed);
        } else {
            warn!(%signature, attempts = record.attempts, "Confirmation indeterminate");
            record.set_status(ConfirmationStatus::Indeterminate);
        }
        self.finish(record, started)
    }

    fn next_delay(&self, rate_limit_streak: u32) -> Duration {
        if rate_limit_streak == 0 {
            self.profile.poll_interval()
        } else {
            self.profile
                .backoff
                .backoff(rate_limit_streak - 1)
                .max(self.profile.poll_interval())
        }
    }

    async fn poll(&self, record: &mut ConfirmationRecord, rate_limit_streak: &mut u32) -> PollOutcome {
        record.attempts += 1;
        let (index, endpoint) = self.pool.select();
        let started = std::time::Instant::now();
        let result = endpoint.status(&record.signature).await;
        let latency_us = started.elapsed().as_micros() as u64;
        self.pool.record(index, latency_us, result.is_ok());

        match result {
            Ok(status) => {
                *rate_limit_streak = 0;
                self.apply_status(record, status)
            }
            Err(err) if err.is_rate_limited() => {
                *rate_limit_streak += 1;
                record.rate_limited_polls += 1;
                let threshold = self.profile.rate_limit_rotation_threshold.max(1);
                if *rate_limit_streak % threshold == 0 {
                    self.pool.rotate_from(index);
                }
                debug!(streak = *rate_limit_streak, endpoint = endpoint.url(), "Status poll rate limited");
                PollOutcome::RateLimited
            }
            Err(err) => {
                self.on_poll_error(index, &err);
                PollOutcome::Error
            }
        }
    }

    fn apply_status(&self, record: &mut ConfirmationRecord, status: LedgerStatus) -> PollOutcome {
        match status {
            LedgerStatus::Confirmed | LedgerStatus::Finalized => {
                record.set_status(ConfirmationStatus::Confirmed);
                PollOutcome::Terminal
            }
            LedgerStatus::Failed(reason) => {
                record.set_failed(reason);
                PollOutcome::Terminal
            }
            LedgerStatus::Processed | LedgerStatus::NotFound => PollOutcome::Pending,
        }
    }

    fn on_poll_error(&self, index: usize, err: &LedgerError) {
        if err.is_transient() {
            self.pool.rotate_from(index);
        }
        debug!(error = %err, category = err.category(), "Status poll failed");
    }

    fn finish(&self, record: ConfirmationRecord, started: Instant) -> ConfirmationRecord {
        let m = metrics();
        m.confirmations
            .with_label_values(&[record.status.as_str()])
            .inc();
        m.confirmation_latency.observe(started.elapsed().as_secs_f64());
        if record.lenient {
            m.lenient_confirmations.inc();
        }
        info!(
            signature = %record.signature,
            status = record.status.as_str(),
            attempts = record.attempts,
            lenient = record.lenient,
            "Confirmation finished"
        );
        record
    }
}
