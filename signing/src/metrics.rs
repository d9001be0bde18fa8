use crate::SignOutcome;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::Registry,
};

/// Bucket sizes (in seconds) for batch verification.
const VERIFY_BUCKETS: [f64; 12] = [
    1e-5, 3e-5, 1e-4, 3e-4, 0.001, 0.003, 0.01, 0.03, 0.1, 0.3, 1.0, 3.0,
];

/// Bucket sizes (in candidates) for verification batches.
const BATCH_BUCKETS: [f64; 8] = [1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0];

/// Label for signing request metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SignLabel {
    pub outcome: SignOutcome,
}

/// Metrics for the [Engine](super::Engine).
pub struct Metrics {
    /// Candidates waiting for verification
    pub pending: Gauge,
    /// Candidates received from peers
    pub received: Counter,
    /// Candidates that passed verification
    pub verified: Counter,
    /// Candidates that failed verification or were malformed
    pub invalid: Counter,
    /// Recovered signatures persisted
    pub recovered: Counter,
    /// Valid signatures rejected because a different one was already recovered
    pub conflicts: Counter,
    /// Candidates for sessions that were already recovered
    pub duplicates: Counter,
    /// Signing requests by outcome
    pub sign_requests: Family<SignLabel, Counter>,
    /// Number of candidates per verification batch
    pub batch_size: Histogram,
    /// Duration of batch verification
    pub verify_latency: Histogram,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given registry.
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self {
            pending: Gauge::default(),
            received: Counter::default(),
            verified: Counter::default(),
            invalid: Counter::default(),
            recovered: Counter::default(),
            conflicts: Counter::default(),
            duplicates: Counter::default(),
            sign_requests: Family::default(),
            batch_size: Histogram::new(BATCH_BUCKETS.into_iter()),
            verify_latency: Histogram::new(VERIFY_BUCKETS.into_iter()),
        };
        registry.register(
            "pending",
            "Candidates waiting for verification",
            metrics.pending.clone(),
        );
        registry.register(
            "received",
            "Candidates received from peers",
            metrics.received.clone(),
        );
        registry.register(
            "verified",
            "Candidates that passed verification",
            metrics.verified.clone(),
        );
        registry.register(
            "invalid",
            "Candidates that failed verification or were malformed",
            metrics.invalid.clone(),
        );
        registry.register(
            "recovered",
            "Recovered signatures persisted",
            metrics.recovered.clone(),
        );
        registry.register(
            "conflicts",
            "Valid signatures rejected because a different one was already recovered",
            metrics.conflicts.clone(),
        );
        registry.register(
            "duplicates",
            "Candidates for sessions that were already recovered",
            metrics.duplicates.clone(),
        );
        registry.register(
            "sign_requests",
            "Signing requests by outcome",
            metrics.sign_requests.clone(),
        );
        registry.register(
            "batch_size",
            "Number of candidates per verification batch",
            metrics.batch_size.clone(),
        );
        registry.register(
            "verify_latency",
            "Duration of batch verification",
            metrics.verify_latency.clone(),
        );
        metrics
    }

    pub fn sign_request(&self, outcome: SignOutcome) {
        self.sign_requests.get_or_create(&SignLabel { outcome }).inc();
    }
}
