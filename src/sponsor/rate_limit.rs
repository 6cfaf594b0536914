//! Sponsor-side admission control
//!
//! Two layers: a global request rate shared by every caller, and a fixed
//! one-minute window per sender so a single wallet cannot drain the
//! sponsor's fee budget.

use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use solana_sdk::pubkey::Pubkey;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

const SENDER_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct SenderWindow {
    window_start_ms: AtomicU64,
    count: AtomicU32,
}

pub struct SponsorRateLimiter {
    global: Option<DefaultDirectRateLimiter>,
    per_sender_limit: u32,
    senders: DashMap<Pubkey, SenderWindow>,
    origin: Instant,
    last_prune_ms: AtomicU64,
}

impl SponsorRateLimiter {
    /// A limit of zero disables that layer
    pub fn new(global_rps: u32, per_sender_per_minute: u32) -> Self {
        Self {
            global: NonZeroU32::new(global_rps).map(|rps| RateLimiter::direct(Quota::per_second(rps))),
            per_sender_limit: per_sender_per_minute,
            senders: DashMap::new(),
            origin: Instant::now(),
            last_prune_ms: AtomicU64::new(0),
        }
    }

    pub fn check_global(&self) -> bool {
        match &self.global {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }

    /// Count one request against `sender`'s window
    pub fn check_sender(&self, sender: &Pubkey) -> bool {
        if self.per_sender_limit == 0 {
            return true;
        }
        let now_ms = self.now_ms();
        // Must run before any map reference is held
        self.prune_if_due(now_ms);

        let window = match self.senders.get(sender) {
            Some(window) => window,
            None => self
                .senders
                .entry(*sender)
                .or_insert_with(|| SenderWindow {
                    window_start_ms: AtomicU64::new(now_ms),
                    count: AtomicU32::new(0),
                })
                .downgrade(),
        };

        let start = window.window_start_ms.load(Ordering::Acquire);
        if now_ms.saturating_sub(start) >= SENDER_WINDOW.as_millis() as u64
            && window
                .window_start_ms
                .compare_exchange(start, now_ms, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            window.count.store(0, Ordering::Release);
        }

        let previous = window.count.fetch_add(1, Ordering::AcqRel);
        previous < self.per_sender_limit
    }

    /// Drop windows that have fully expired
    pub fn prune(&self) {
        let now_ms = self.now_ms();
        let window_ms = SENDER_WINDOW.as_millis() as u64;
        self.senders
            .retain(|_, w| now_ms.saturating_sub(w.window_start_ms.load(Ordering::Acquire)) < window_ms);
    }

    /// At most one prune per window, whichever caller wins the swap
    fn prune_if_due(&self, now_ms: u64) {
        let last = self.last_prune_ms.load(Ordering::Acquire);
        if now_ms.saturating_sub(last) >= SENDER_WINDOW.as_millis() as u64
            && self
                .last_prune_ms
                .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.prune();
        }
    }

    pub fn tracked_senders(&self) -> usize {
        self.senders.len()
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

impl std::fmt::Debug for SponsorRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SponsorRateLimiter")
            .field("global", &self.global.is_some())
            .field("per_sender_limit", &self.per_sender_limit)
            .field("tracked_senders", &self.senders.len())
            .finish()
    }
}
