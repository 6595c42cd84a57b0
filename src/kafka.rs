use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use tracing::{debug, warn};

use crate::config::Config;
use crate::transport::{
    EventSource, ReceivedEvent, StartPosition, Subscription, TransportError,
};

/// Kafka-backed [`EventSource`] for one topic.
pub struct KafkaSource {
    hosts: String,
    topic: String,
    tls: bool,
    default_group: String,
    metadata_timeout: Duration,
}

impl KafkaSource {
    pub fn new(config: &Config) -> Self {
        Self {
            hosts: config.kafka_hosts.clone(),
            topic: config.kafka_topic.clone(),
            tls: config.kafka_tls,
            default_group: config.kafka_consumer_group.clone(),
            metadata_timeout: config.metadata_timeout(),
        }
    }

    fn client_config(&self, consumer_group: &str) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.hosts)
            .set("group.id", consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest");

        if self.tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }

        client_config
    }
}

#[async_trait]
impl EventSource for KafkaSource {
    async fn partition_ids(&self) -> Result<Vec<i32>, TransportError> {
        let consumer: BaseConsumer = self.client_config(&self.default_group).create()?;
        let topic = self.topic.clone();
        let timeout = self.metadata_timeout;

        // fetch_metadata blocks on the broker round-trip.
        tokio::task::spawn_blocking(move || {
            let metadata = consumer.fetch_metadata(Some(&topic), timeout)?;
            let entry = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic)
                .ok_or_else(|| TransportError::UnknownTopic(topic.clone()))?;

            if entry.error().is_some() || entry.partitions().is_empty() {
                return Err(TransportError::UnknownTopic(topic.clone()));
            }

            let mut ids: Vec<i32> = entry.partitions().iter().map(|p| p.id()).collect();
            ids.sort_unstable();
            Ok(ids)
        })
        .await
        .expect("metadata fetch task panicked")
    }

    async fn subscribe(
        &self,
        partition: i32,
        consumer_group: &str,
        from: StartPosition,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        // Assigning a nonexistent partition is a purely local librdkafka
        // operation that "succeeds" and then never delivers, so reject the
        // id against broker metadata up front.
        let known = self.partition_ids().await?;
        ensure_partition_exists(&known, partition)?;

        let consumer: StreamConsumer = self.client_config(consumer_group).create()?;

        let offset = match from {
            StartPosition::Latest => Offset::End,
        };
        let mut assignment = TopicPartitionList::new();
        assignment.add_partition_offset(&self.topic, partition, offset)?;
        consumer.assign(&assignment)?;

        debug!(partition, consumer_group, topic = self.topic, "subscription opened");
        Ok(Box::new(KafkaSubscription {
            consumer,
            partition,
            closed: false,
        }))
    }
}

fn ensure_partition_exists(known: &[i32], partition: i32) -> Result<(), TransportError> {
    if known.contains(&partition) {
        Ok(())
    } else {
        Err(TransportError::UnknownPartition(partition))
    }
}

struct KafkaSubscription {
    consumer: StreamConsumer,
    partition: i32,
    closed: bool,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn next(&mut self) -> Option<Result<ReceivedEvent, TransportError>> {
        if self.closed {
            return None;
        }
        match self.consumer.recv().await {
            Ok(message) => Some(Ok(ReceivedEvent {
                partition: message.partition(),
                offset: message.offset(),
                received_at: Utc::now(),
                payload: message.payload().map(|p| p.to_vec()).unwrap_or_default(),
            })),
            Err(e) => Some(Err(e.into())),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.consumer.unassign() {
            warn!(partition = self.partition, error = %e, "failed to release subscription");
        }
    }
}
