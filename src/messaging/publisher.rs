use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde::Serialize;
use std::time::Duration;

// ============================================================================
// Kafka Publisher
// ============================================================================
//
// Used for dead-lettering and for producing test traffic. Delivery is awaited
// so callers know the broker has the record before committing anything.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to serialize message for {topic}: {source}")]
    Serialize {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to publish to {topic}: {source}")]
    Send {
        topic: String,
        #[source]
        source: KafkaError,
    },
}

pub struct KafkaPublisher {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(brokers: &str) -> Result<Self, KafkaError> {
        Self::with_timeout(brokers, Duration::from_secs(5))
    }

    /// `timeout` bounds both local queueing and broker delivery.
    pub fn with_timeout(brokers: &str, timeout: Duration) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .create()?;

        Ok(Self {
            producer,
            send_timeout: timeout,
        })
    }

    pub async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &[(&str, &str)],
    ) -> Result<(), PublishError> {
        let mut owned = OwnedHeaders::new_with_capacity(headers.len());
        for (name, value) in headers {
            owned = owned.insert(Header {
                key: *name,
                value: Some(*value),
            });
        }

        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload)
            .headers(owned);

        match self.producer.send(record, Timeout::After(self.send_timeout)).await {
            Ok(_) => {
                tracing::debug!(topic = %topic, key = %key, bytes = payload.len(), "Published message");
                Ok(())
            }
            Err((e, _)) => {
                tracing::error!(topic = %topic, key = %key, error = %e, "Failed to publish message");
                Err(PublishError::Send {
                    topic: topic.to_string(),
                    source: e,
                })
            }
        }
    }

    pub async fn publish_json<T: Serialize>(&self, topic: &str, key: &str, value: &T) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(value).map_err(|source| PublishError::Serialize {
            topic: topic.to_string(),
            source,
        })?;
        self.publish(topic, key, &payload, &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_does_not_need_a_broker() {
        assert!(KafkaPublisher::new("127.0.0.1:1").is_ok());
    }

    #[tokio::test]
    async fn test_publish_to_unreachable_broker_fails() {
        let publisher = KafkaPublisher::with_timeout("127.0.0.1:1", Duration::from_millis(300)).unwrap();

        let result = publisher
            .publish("orders.dlq", "o-1", b"{}", &[("x-failure-reason", "test")])
            .await;

        assert!(matches!(result, Err(PublishError::Send { ref topic, .. }) if topic == "orders.dlq"));
    }
}
