use std::sync::Arc;
use std::time::Instant;

use crate::metrics::{MessageOutcome, Metrics};
use crate::models::{DecodeError, Order};
use crate::service::{OrderService, ServiceError};

// ============================================================================
// Order Message Handler
// ============================================================================
//
// received → decoded → applied      → Ack
// received → decode failed          → Nack(Malformed)    service not called
// received → decoded → apply failed → Nack(ApplyFailed)
//
// Knows nothing about Kafka; the consumer turns a Disposition into commits,
// seeks and dead-letter publishes.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum NackReason {
    #[error("malformed message: {0}")]
    Malformed(#[source] DecodeError),

    #[error("failed to apply order: {0}")]
    ApplyFailed(#[source] ServiceError),
}

impl NackReason {
    /// A malformed payload fails the same way on every redelivery.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NackReason::ApplyFailed(_))
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            NackReason::Malformed(_) => "malformed",
            NackReason::ApplyFailed(_) => "apply_failed",
        }
    }
}

#[derive(Debug)]
pub enum Disposition {
    Ack,
    Nack(NackReason),
}

pub struct OrderMessageHandler {
    service: Arc<OrderService>,
    metrics: Arc<Metrics>,
}

impl OrderMessageHandler {
    pub fn new(service: Arc<OrderService>, metrics: Arc<Metrics>) -> Self {
        Self { service, metrics }
    }

    pub async fn handle(&self, payload: Option<&[u8]>) -> Disposition {
        let started = Instant::now();

        let order = match Order::decode(payload.unwrap_or_default()) {
            Ok(order) => order,
            Err(e) => {
                tracing::warn!(error = %e, "Rejecting malformed order message");
                self.metrics
                    .record_message(MessageOutcome::NackMalformed, started.elapsed().as_secs_f64());
                return Disposition::Nack(NackReason::Malformed(e));
            }
        };

        match self.service.upsert_order(&order).await {
            Ok(_) => {
                self.metrics
                    .record_message(MessageOutcome::Ack, started.elapsed().as_secs_f64());
                Disposition::Ack
            }
            Err(e) => {
                tracing::error!(order_uid = %order.order_uid, error = %e, "Failed to apply order message");
                self.metrics
                    .record_message(MessageOutcome::NackApplyFailed, started.elapsed().as_secs_f64());
                Disposition::Nack(NackReason::ApplyFailed(e))
            }
        }
    }
}
