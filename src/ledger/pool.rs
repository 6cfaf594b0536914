//! Ordered endpoint pool with round-robin failover
//!
//! The pool is the only state shared between in-flight transfers. It is
//! read-mostly: selection is a single atomic load, and rotation is a
//! compare-and-swap on the current index so that several tasks failing on
//! the same endpoint at once move the pool forward exactly one step.

use super::{LedgerEndpoint, LedgerError};
use crate::metrics::metrics;
use crate::retry::{retry_with_backoff, BackoffPolicy, Transient};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Consecutive failures after which an endpoint is reported unhealthy
const UNHEALTHY_AFTER_CONSECUTIVE_ERRORS: u64 = 3;

/// Lock-free statistics for one endpoint
#[derive(Debug)]
pub struct EndpointStats {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    /// Resets on success
    consecutive_errors: AtomicU64,
    last_latency_us: AtomicU64,
    is_healthy: AtomicBool,
    last_success: RwLock<Option<Instant>>,
}

impl EndpointStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            consecutive_errors: AtomicU64::new(0),
            last_latency_us: AtomicU64::new(0),
            is_healthy: AtomicBool::new(true),
            last_success: RwLock::new(None),
        }
    }

    pub fn record_success(&self, latency_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.consecutive_errors.store(0, Ordering::Relaxed);
        self.last_latency_us.store(latency_us, Ordering::Relaxed);
        self.is_healthy.store(true, Ordering::Relaxed);
        *self.last_success.write() = Some(Instant::now());
    }

    pub fn record_failure(&self, latency_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        let consecutive = self.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_latency_us.store(latency_us, Ordering::Relaxed);

        if consecutive >= UNHEALTHY_AFTER_CONSECUTIVE_ERRORS {
            self.is_healthy.store(false, Ordering::Relaxed);
        }
    }

    /// Current error rate (0.0 - 1.0)
    pub fn error_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.total_errors.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub fn consecutive_errors(&self) -> u64 {
        self.consecutive_errors.load(Ordering::Relaxed)
    }

    pub fn is_healthy(&self) -> bool {
        self.is_healthy.load(Ordering::Relaxed)
    }

    pub fn last_latency_us(&self) -> u64 {
        self.last_latency_us.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    pub fn time_since_last_success(&self) -> Option<std::time::Duration> {
        self.last_success.read().as_ref().map(|instant| instant.elapsed())
    }
}

impl Default for EndpointStats {
    fn default() -> Self {
        Self::new()
    }
}

struct PooledEndpoint {
    endpoint: Arc<dyn LedgerEndpoint>,
    stats: EndpointStats,
}

/// Primary + fallback ledger endpoints
pub struct EndpointPool {
    endpoints: Vec<PooledEndpoint>,
    current: AtomicUsize,
    /// Requests routed to the current endpoint since the last rotation
    served_since_rotation: AtomicU32,
    /// Requests the current endpoint must serve before it can be rotated away
    min_dwell: u32,
}

impl EndpointPool {
    pub fn new(endpoints: Vec<Arc<dyn LedgerEndpoint>>, min_dwell: u32) -> Result<Self, LedgerError> {
        if endpoints.is_empty() {
            return Err(LedgerError::NoEndpoints);
        }

        let endpoints = endpoints
            .into_iter()
            .map(|endpoint| PooledEndpoint {
                endpoint,
                stats: EndpointStats::new(),
            })
            .collect();

        Ok(Self {
            endpoints,
            current: AtomicUsize::new(0),
            // The primary may be rotated away from on its first failure
            served_since_rotation: AtomicU32::new(min_dwell),
            min_dwell,
        })
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    pub fn endpoint(&self, index: usize) -> Option<&Arc<dyn LedgerEndpoint>> {
        self.endpoints.get(index).map(|p| &p.endpoint)
    }

    pub fn stats(&self, index: usize) -> Option<&EndpointStats> {
        self.endpoints.get(index).map(|p| &p.stats)
    }

    /// Pick the endpoint for the next request
    pub fn select(&self) -> (usize, Arc<dyn LedgerEndpoint>) {
        let index = self.current_index() % self.endpoints.len();
        self.served_since_rotation.fetch_add(1, Ordering::AcqRel);
        (index, Arc::clone(&self.endpoints[index].endpoint))
    }

    pub fn record(&self, index: usize, latency_us: u64, success: bool) {
        if let Some(pooled) = self.endpoints.get(index) {
            if success {
                pooled.stats.record_success(latency_us);
            } else {
                pooled.stats.record_failure(latency_us);
            }
        }
    }

    /// Move past `failed_index` if it is still the current endpoint and has
    /// served its minimum dwell. Returns whether this call rotated the pool.
    pub fn rotate_from(&self, failed_index: usize) -> bool {
        let len = self.endpoints.len();
        if len < 2 {
            return false;
        }
        if self.served_since_rotation.load(Ordering::Acquire) < self.min_dwell {
            return false;
        }

        let next = (failed_index + 1) % len;
        match self
            .current
            .compare_exchange(failed_index, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.served_since_rotation.store(0, Ordering::Release);
                metrics().endpoint_rotations.inc();
                info!(
                    from = self.endpoints[failed_index].endpoint.url(),
                    to = self.endpoints[next].endpoint.url(),
                    "Rotated ledger endpoint"
                );
                true
            }
            // Another task already rotated away from this endpoint
            Err(_) => false,
        }
    }

    /// Run `operation` against the current endpoint, retrying transient
    /// failures with `policy` and rotating to the next endpoint after each one.
    pub async fn with_failover<F, Fut, T>(
        &self,
        operation_name: &str,
        policy: &BackoffPolicy,
        mut operation: F,
    ) -> Result<T, LedgerError>
    where
        F: FnMut(Arc<dyn LedgerEndpoint>) -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        retry_with_backoff(operation_name, policy, || {
            let (index, endpoint) = self.select();
            let started = Instant::now();
            let fut = operation(endpoint);
            async move {
                let result = fut.await;
                let latency_us = started.elapsed().as_micros() as u64;
                match &result {
                    Ok(_) => self.record(index, latency_us, true),
                    Err(err) => {
                        self.record(index, latency_us, false);
                        if err.is_transient() {
                            warn!(
                                operation = operation_name,
                                endpoint = err.endpoint().unwrap_or("unknown"),
                                error = %err,
                                "Endpoint failure, rotating"
                            );
                            self.rotate_from(index);
                        }
                    }
                }
                result
            }
        })
        .await
    }
}

impl std::fmt::Debug for EndpointPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let urls: Vec<&str> = self.endpoints.iter().map(|p| p.endpoint.url()).collect();
        f.debug_struct("EndpointPool")
            .field("endpoints", &urls)
            .field("current", &self.current_index())
            .field("min_dwell", &self.min_dwell)
            .finish()
    }
}
