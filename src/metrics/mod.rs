use prometheus::{
    Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry,
};

// ============================================================================
// Metrics Module - Prometheus metrics for the order pipeline
// ============================================================================
//
// Covers:
// - Message dispositions (ack / nack / dead-letter) and processing latency
// - Cache hit rate and size
// - Store failures by operation
//
// Scraped via GET /metrics (see api.rs).
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Consumer
    pub messages_total: IntCounterVec,
    pub message_processing_duration: Histogram,

    // Cache
    pub cache_lookups_total: IntCounterVec,
    pub cache_entries: IntGauge,

    // Store
    pub store_failures_total: IntCounterVec,
}

/// Final disposition of one delivery, used as the `outcome` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Ack,
    NackMalformed,
    NackApplyFailed,
    DeadLettered,
}

impl MessageOutcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            MessageOutcome::Ack => "ack",
            MessageOutcome::NackMalformed => "nack_malformed",
            MessageOutcome::NackApplyFailed => "nack_apply_failed",
            MessageOutcome::DeadLettered => "dead_lettered",
        }
    }
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let messages_total = IntCounterVec::new(
            Opts::new("orders_messages_total", "Order messages by final disposition"),
            &["outcome"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let message_processing_duration = Histogram::with_opts(
            HistogramOpts::new(
                "orders_message_processing_seconds",
                "Time from receipt to disposition of an order message",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(message_processing_duration.clone()))?;

        let cache_lookups_total = IntCounterVec::new(
            Opts::new("orders_cache_lookups_total", "Order cache lookups by result"),
            &["result"],
        )?;
        registry.register(Box::new(cache_lookups_total.clone()))?;

        let cache_entries = IntGauge::new("orders_cache_entries", "Orders currently cached")?;
        registry.register(Box::new(cache_entries.clone()))?;

        let store_failures_total = IntCounterVec::new(
            Opts::new("orders_store_failures_total", "Failed order store operations"),
            &["operation"],
        )?;
        registry.register(Box::new(store_failures_total.clone()))?;

        Ok(Self {
            registry,
            messages_total,
            message_processing_duration,
            cache_lookups_total,
            cache_entries,
            store_failures_total,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_message(&self, outcome: MessageOutcome, duration_secs: f64) {
        self.messages_total.with_label_values(&[outcome.as_label()]).inc();
        self.message_processing_duration.observe(duration_secs);
    }

    pub fn record_dead_letter(&self) {
        self.messages_total
            .with_label_values(&[MessageOutcome::DeadLettered.as_label()])
            .inc();
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups_total.with_label_values(&[result]).inc();
    }

    pub fn set_cache_entries(&self, entries: usize) {
        self.cache_entries.set(entries as i64);
    }

    pub fn record_store_failure(&self, operation: &str) {
        self.store_failures_total.with_label_values(&[operation]).inc();
    }
}
