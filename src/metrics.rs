//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Sponsor boundary
    pub cosign_requests: IntCounter,
    pub cosign_signed: IntCounter,
    /// Labelled by rejection code
    pub cosign_rejections: IntCounterVec,

    // Submission and ledger access
    pub submissions: IntCounter,
    pub submission_failures: IntCounter,
    pub endpoint_rotations: IntCounter,
    pub reference_rebuilds: IntCounter,

    // Confirmation
    /// Labelled by terminal status
    pub confirmations: IntCounterVec,
    pub lenient_confirmations: IntCounter,
    pub confirmation_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let cosign_requests = IntCounter::with_opts(Opts::new(
            "cosign_requests_total",
            "Signing requests received by the sponsor",
        ))?;

        let cosign_signed = IntCounter::with_opts(Opts::new(
            "cosign_signed_total",
            "Transactions co-signed by the sponsor",
        ))?;

        let cosign_rejections = IntCounterVec::new(
            Opts::new("cosign_rejections_total", "Signing requests rejected, by code"),
            &["code"],
        )?;

        let submissions = IntCounter::with_opts(Opts::new(
            "submissions_total",
            "Fully signed transactions handed to the submission engine",
        ))?;

        let submission_failures = IntCounter::with_opts(Opts::new(
            "submission_failures_total",
            "Submissions that failed on every attempt",
        ))?;

        let endpoint_rotations = IntCounter::with_opts(Opts::new(
            "endpoint_rotations_total",
            "Ledger endpoint failovers",
        ))?;

        let reference_rebuilds = IntCounter::with_opts(Opts::new(
            "reference_rebuilds_total",
            "Transactions rebuilt because their recent blockhash aged out",
        ))?;

        let confirmations = IntCounterVec::new(
            Opts::new("confirmations_total", "Terminal confirmation outcomes"),
            &["status"],
        )?;

        let lenient_confirmations = IntCounter::with_opts(Opts::new(
            "lenient_confirmations_total",
            "Confirmations reported without an observed on-chain status",
        ))?;

        let confirmation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "confirmation_latency_seconds",
                "Time from submission to a terminal confirmation status",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(cosign_requests.clone()))?;
        registry.register(Box::new(cosign_signed.clone()))?;
        registry.register(Box::new(cosign_rejections.clone()))?;
        registry.register(Box::new(submissions.clone()))?;
        registry.register(Box::new(submission_failures.clone()))?;
        registry.register(Box::new(endpoint_rotations.clone()))?;
        registry.register(Box::new(reference_rebuilds.clone()))?;
        registry.register(Box::new(confirmations.clone()))?;
        registry.register(Box::new(lenient_confirmations.clone()))?;
        registry.register(Box::new(confirmation_latency.clone()))?;

        Ok(Self {
            registry,
            cosign_requests,
            cosign_signed,
            cosign_rejections,
            submissions,
            submission_failures,
            endpoint_rotations,
            reference_rebuilds,
            confirmations,
            lenient_confirmations,
            confirmation_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every registered metric
    pub fn gather_text(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_export() {
        let m = Metrics::new().unwrap();
        m.cosign_rejections.with_label_values(&["WRONG_FEE_PAYER"]).inc();
        m.confirmations.with_label_values(&["confirmed"]).inc();
        m.confirmation_latency.observe(1.5);

        let text = m.gather_text().unwrap();
        assert!(text.contains("cosign_rejections_total{code=\"WRONG_FEE_PAYER\"} 1"));
        assert!(text.contains("confirmations_total{status=\"confirmed\"} 1"));
        assert!(text.contains("confirmation_latency_seconds_count 1"));
    }
}
