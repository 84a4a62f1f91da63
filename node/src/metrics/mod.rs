pub mod server;

use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
use tracing::error;

/// Lifecycle counters for the monitored transaction engine.
pub struct Metrics {
    txs_created: Counter,
    txs_sent: Counter,
    txs_mined: Counter,
    txs_safe: Counter,
    txs_finalized: Counter,
    txs_failed: Counter,
    send_attempts: Histogram,
    registry: Registry,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let txs_created = new_counter(
            &registry,
            "monitored_txs_created",
            "Monitored transactions accepted from callers",
        );
        let txs_sent = new_counter(
            &registry,
            "monitored_txs_sent",
            "Signed transactions broadcast to L1",
        );
        let txs_mined = new_counter(
            &registry,
            "monitored_txs_mined",
            "Monitored transactions mined with a successful receipt",
        );
        let txs_safe = new_counter(
            &registry,
            "monitored_txs_safe",
            "Monitored transactions promoted to safe",
        );
        let txs_finalized = new_counter(
            &registry,
            "monitored_txs_finalized",
            "Monitored transactions promoted to finalized",
        );
        let txs_failed = new_counter(
            &registry,
            "monitored_txs_failed",
            "Monitored transactions that reverted and stopped being monitored",
        );

        let send_attempts = Histogram::with_opts(
            HistogramOpts::new(
                "monitored_tx_send_attempts",
                "Signed attempts a monitored transaction accumulated before settling",
            )
            .buckets(vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0]),
        )
        .expect("Failed to create send attempts histogram");
        if let Err(err) = registry.register(Box::new(send_attempts.clone())) {
            error!("Error: Failed to register monitored_tx_send_attempts: {}", err);
        }

        Self {
            txs_created,
            txs_sent,
            txs_mined,
            txs_safe,
            txs_finalized,
            txs_failed,
            send_attempts,
            registry,
        }
    }

    pub fn inc_created(&self) {
        self.txs_created.inc();
    }

    pub fn inc_sent(&self) {
        self.txs_sent.inc();
    }

    pub fn inc_mined(&self) {
        self.txs_mined.inc();
    }

    pub fn inc_safe(&self) {
        self.txs_safe.inc();
    }

    pub fn inc_finalized(&self) {
        self.txs_finalized.inc();
    }

    pub fn inc_failed(&self) {
        self.txs_failed.inc();
    }

    /// Records how many signed attempts a tx accumulated before it settled.
    pub fn observe_send_attempts(&self, attempts: usize) {
        self.send_attempts.observe(attempts as f64);
    }

    pub fn gather(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
            error!("Failed to encode metrics: {}", err);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn new_counter(registry: &Registry, name: &str, help: &str) -> Counter {
    let counter =
        Counter::new(name, help).unwrap_or_else(|_| panic!("Failed to create {name} counter"));
    if let Err(err) = registry.register(Box::new(counter.clone())) {
        error!("Error: Failed to register {}: {}", name, err);
    }
    counter
}
