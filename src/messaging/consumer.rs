use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::OwnedMessage;
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::handler::{Disposition, NackReason, OrderMessageHandler};
use super::publisher::KafkaPublisher;
use super::redelivery::{DeliveryAttempts, RedeliveryPolicy};
use crate::metrics::Metrics;

// ============================================================================
// Kafka Order Consumer - one worker in the consumer group
// ============================================================================
//
// Ack   → synchronous commit of offset + 1
// Nack  → back off, seek the partition to the failed offset (redelivery)
//       → after max deliveries, or at once for malformed payloads:
//         publish to the dead-letter topic, then commit past the message
//
// Messages are handled one at a time, so commits on a partition never skip
// over an unsettled offset. Run several workers for parallelism.
//
// Synchronous commits and seeks block inside librdkafka, so they run on the
// blocking pool and never stall the other workers' async thread.
//
// ============================================================================

const DEAD_LETTER_REASON: &str = "x-failure-reason";
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);
const RECV_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub brokers: String,
    pub group_id: String,
    pub topic: String,
    pub redelivery: RedeliveryPolicy,
}

/// Where exhausted messages go.
#[derive(Clone)]
pub struct DeadLetterSink {
    pub publisher: Arc<KafkaPublisher>,
    pub topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("failed to create consumer: {0}")]
    Create(#[source] KafkaError),

    #[error("failed to subscribe to {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: KafkaError,
    },

    #[error("failed to seek {topic}/{partition} back to offset {offset}: {source}")]
    Seek {
        topic: String,
        partition: i32,
        offset: i64,
        #[source]
        source: KafkaError,
    },
}

pub struct KafkaOrderConsumer {
    consumer: Arc<StreamConsumer>,
    worker_id: usize,
    handler: Arc<OrderMessageHandler>,
    dead_letters: Option<DeadLetterSink>,
    policy: RedeliveryPolicy,
    metrics: Arc<Metrics>,
}

impl KafkaOrderConsumer {
    pub fn new(
        worker_id: usize,
        settings: &ConsumerSettings,
        handler: Arc<OrderMessageHandler>,
        dead_letters: Option<DeadLetterSink>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, ConsumerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("group.id", &settings.group_id)
            .set("client.id", format!("{}-{}", settings.group_id, worker_id))
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(ConsumerError::Create)?;

        consumer
            .subscribe(&[settings.topic.as_str()])
            .map_err(|source| ConsumerError::Subscribe {
                topic: settings.topic.clone(),
                source,
            })?;

        tracing::info!(
            worker_id,
            topic = %settings.topic,
            group_id = %settings.group_id,
            "Consumer subscribed"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            worker_id,
            handler,
            dead_letters,
            policy: settings.redelivery.clone(),
            metrics,
        })
    }

    /// Consume until `shutdown` is cancelled. A message already received is
    /// carried through to its disposition before returning.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ConsumerError> {
        let mut attempts = DeliveryAttempts::new();

        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.consumer.recv() => match received {
                    Ok(message) => message.detach(),
                    Err(e) => {
                        tracing::warn!(worker_id = self.worker_id, error = %e, "Kafka receive error");
                        let resumed = tokio::select! {
                            _ = shutdown.cancelled() => false,
                            _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => true,
                        };
                        if !resumed {
                            break;
                        }
                        continue;
                    }
                },
            };

            self.process(message, &mut attempts, &shutdown).await?;
        }

        tracing::info!(worker_id = self.worker_id, "Consumer stopped");
        Ok(())
    }

    async fn process(
        &self,
        message: OwnedMessage,
        attempts: &mut DeliveryAttempts,
        shutdown: &CancellationToken,
    ) -> Result<(), ConsumerError> {
        tracing::debug!(
            worker_id = self.worker_id,
            partition = message.partition(),
            offset = message.offset(),
            "Received message"
        );

        match self.handler.handle(message.payload()).await {
            Disposition::Ack => {
                self.commit(&message, attempts).await;
                Ok(())
            }
            Disposition::Nack(reason) => self.nack(&message, reason, attempts, shutdown).await,
        }
    }

    async fn nack(
        &self,
        message: &OwnedMessage,
        reason: NackReason,
        attempts: &mut DeliveryAttempts,
        shutdown: &CancellationToken,
    ) -> Result<(), ConsumerError> {
        let failures = attempts.record_failure(message.partition(), message.offset());

        if reason.is_retryable() && !self.policy.is_exhausted(failures) {
            let delay = self.policy.delay_for(failures);
            tracing::warn!(
                worker_id = self.worker_id,
                partition = message.partition(),
                offset = message.offset(),
                failures,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "Message nacked, scheduling redelivery"
            );
            return self.redeliver_after(message, delay, shutdown).await;
        }

        let Some(sink) = &self.dead_letters else {
            tracing::error!(
                worker_id = self.worker_id,
                partition = message.partition(),
                offset = message.offset(),
                failures,
                reason = %reason,
                "Dropping message: redelivery exhausted and no dead-letter topic configured"
            );
            self.commit(message, attempts).await;
            return Ok(());
        };

        let headers = failure_headers(message, &reason, failures);
        let header_refs: Vec<(&str, &str)> = headers
            .iter()
            .map(|(name, value)| (*name, value.as_str()))
            .collect();
        let key = message
            .key()
            .map(|key| String::from_utf8_lossy(key).into_owned())
            .unwrap_or_default();

        match sink
            .publisher
            .publish(&sink.topic, &key, message.payload().unwrap_or_default(), &header_refs)
            .await
        {
            Ok(()) => {
                self.metrics.record_dead_letter();
                tracing::error!(
                    worker_id = self.worker_id,
                    partition = message.partition(),
                    offset = message.offset(),
                    dead_letter_topic = %sink.topic,
                    failures,
                    reason = %reason,
                    "Message dead-lettered"
                );
                self.commit(message, attempts).await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    worker_id = self.worker_id,
                    partition = message.partition(),
                    offset = message.offset(),
                    error = %e,
                    "Dead-letter publish failed, message stays uncommitted"
                );
                self.redeliver_after(message, self.policy.max_delay, shutdown).await
            }
        }
    }

    /// Wait, then rewind the partition so the same offset is delivered again.
    async fn redeliver_after(
        &self,
        message: &OwnedMessage,
        delay: Duration,
        shutdown: &CancellationToken,
    ) -> Result<(), ConsumerError> {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }

        let (topic, partition, offset) = (message.topic().to_string(), message.partition(), message.offset());
        self.off_thread(move |consumer| {
            consumer.seek(&topic, partition, Offset::Offset(offset), Timeout::After(SEEK_TIMEOUT))
        })
        .await
        .map_err(|source| ConsumerError::Seek {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            source,
        })
    }

    async fn commit(&self, message: &OwnedMessage, attempts: &mut DeliveryAttempts) {
        let started = Instant::now();
        let mut offsets = TopicPartitionList::new();
        let result = match offsets.add_partition_offset(
            message.topic(),
            message.partition(),
            Offset::Offset(message.offset() + 1),
        ) {
            Ok(()) => {
                self.off_thread(move |consumer| consumer.commit(&offsets, CommitMode::Sync))
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => tracing::debug!(
                worker_id = self.worker_id,
                partition = message.partition(),
                offset = message.offset(),
                commit_ms = started.elapsed().as_millis() as u64,
                "Message acknowledged"
            ),
            Err(e) => tracing::warn!(
                worker_id = self.worker_id,
                partition = message.partition(),
                offset = message.offset(),
                error = %e,
                "Offset commit failed, message may be redelivered"
            ),
        }

        attempts.settle(message.partition(), message.offset());
    }

    /// Run a blocking librdkafka call on the blocking pool.
    async fn off_thread<T, F>(&self, call: F) -> Result<T, KafkaError>
    where
        F: FnOnce(&StreamConsumer) -> Result<T, KafkaError> + Send + 'static,
        T: Send + 'static,
    {
        let consumer = self.consumer.clone();
        match tokio::task::spawn_blocking(move || call(&consumer)).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(worker_id = self.worker_id, error = %e, "Blocking Kafka call did not complete");
                Err(KafkaError::Canceled)
            }
        }
    }
}

fn failure_headers(message: &OwnedMessage, reason: &NackReason, failures: u32) -> Vec<(&'static str, String)> {
    vec![
        (DEAD_LETTER_REASON, reason.to_string()),
        ("x-failure-kind", reason.as_label().to_string()),
        ("x-source-topic", message.topic().to_string()),
        ("x-source-partition", message.partition().to_string()),
        ("x-source-offset", message.offset().to_string()),
        ("x-delivery-attempts", failures.to_string()),
    ]
}
