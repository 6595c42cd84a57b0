use std::time::Duration;

use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::debug;

use crate::config::Config;
use crate::transport::TransportError;

/// One-shot publisher for the `send` command.
pub struct EventProducer {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl EventProducer {
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", &config.kafka_hosts);

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }

        let producer: FutureProducer = client_config.create()?;
        Ok(Self {
            producer,
            topic: config.kafka_topic.clone(),
            timeout: config.send_timeout(),
        })
    }

    /// Deliver one message, either to a specific partition or wherever the
    /// partitioner puts it. Returns the (partition, offset) it landed on.
    pub async fn send(
        &self,
        payload: &[u8],
        partition: Option<i32>,
    ) -> Result<(i32, i64), TransportError> {
        let mut record: FutureRecord<'_, (), [u8]> =
            FutureRecord::to(&self.topic).payload(payload);
        if let Some(partition) = partition {
            record = record.partition(partition);
        }

        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => {
                debug!(partition, offset, topic = self.topic, "message delivered");
                Ok((partition, offset))
            }
            Err((e, _)) => Err(e.into()),
        }
    }
}
