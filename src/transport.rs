use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Starting position for a new subscription. Receiving always begins at the
/// head of the partition; history is never replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Only events produced from now on.
    Latest,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("topic {0} not found on the broker")]
    UnknownTopic(String),

    #[error("partition {0} does not exist")]
    UnknownPartition(i32),

    #[error("subscription closed")]
    Closed,
}

/// One event lifted off the stream, with its delivery metadata.
///
/// Ownership transfers to the consumer once the event is placed on the
/// merged output channel.
#[derive(Debug, Clone, Serialize)]
pub struct ReceivedEvent {
    pub partition: i32,
    pub offset: i64,
    pub received_at: DateTime<Utc>,
    #[serde(serialize_with = "payload_as_text")]
    pub payload: Vec<u8>,
}

fn payload_as_text<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(payload))
}

/// An open receive stream on a single partition.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next event. Returns `None` once the stream has cleanly
    /// ended, `Some(Err(_))` on a transport failure.
    async fn next(&mut self) -> Option<Result<ReceivedEvent, TransportError>>;

    /// Release transport resources. Idempotent.
    async fn close(&mut self);
}

/// The messaging transport the receive path runs against.
///
/// Production uses [`crate::kafka::KafkaSource`]; tests substitute
/// [`crate::test_utils::SimulatedSource`].
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Partition ids of the configured topic, in ascending order.
    async fn partition_ids(&self) -> Result<Vec<i32>, TransportError>;

    /// Open a subscription on one partition as the given consumer group.
    async fn subscribe(
        &self,
        partition: i32,
        consumer_group: &str,
        from: StartPosition,
    ) -> Result<Box<dyn Subscription>, TransportError>;
}
