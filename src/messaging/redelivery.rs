use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// Redelivery Policy - exponential backoff for negatively-acknowledged messages
// ============================================================================
//
// Kafka has no per-message nack. A nack is emulated by waiting `delay_for`
// and seeking the partition back to the failed offset. After
// `max_deliveries` the message is dead-lettered and committed past.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RedeliveryPolicy {
    /// Deliveries (first one included) before giving up. 0 retries forever.
    pub max_deliveries: u32,
    /// Delay before the first redelivery
    pub initial_delay: Duration,
    /// Maximum delay between redeliveries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_deliveries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RedeliveryPolicy {
    /// Backoff before redelivering a message that has failed `failures` times.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(32) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !millis.is_finite() || millis >= self.max_delay.as_millis() as f64 {
            self.max_delay
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_deliveries > 0 && failures >= self.max_deliveries
    }
}

/// Failure counts for messages currently being redelivered, keyed by
/// (partition, offset). A worker handles one message at a time and settles
/// entries as offsets are committed, so this stays at about one entry per
/// assigned partition.
#[derive(Debug, Default)]
pub struct DeliveryAttempts {
    failures: HashMap<(i32, i64), u32>,
}

impl DeliveryAttempts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more failed delivery and return the total so far.
    pub fn record_failure(&mut self, partition: i32, offset: i64) -> u32 {
        let count = self.failures.entry((partition, offset)).or_insert(0);
        *count += 1;
        *count
    }

    /// Forget every tracked offset up to and including `offset` on `partition`.
    pub fn settle(&mut self, partition: i32, offset: i64) {
        self.failures
            .retain(|&(p, o), _| p != partition || o > offset);
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}
