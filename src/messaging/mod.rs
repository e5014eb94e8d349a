pub mod consumer;
pub mod handler;
pub mod publisher;
pub mod redelivery;

pub use consumer::{ConsumerError, ConsumerSettings, DeadLetterSink, KafkaOrderConsumer};
pub use handler::{Disposition, NackReason, OrderMessageHandler};
pub use publisher::{KafkaPublisher, PublishError};
pub use redelivery::{DeliveryAttempts, RedeliveryPolicy};
