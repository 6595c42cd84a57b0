use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "KAFKA_HOSTS", default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(from = "KAFKA_TOPIC", default = "events")]
    pub kafka_topic: String,

    #[envconfig(from = "KAFKA_CONSUMER_GROUP", default = "eventtail")]
    pub kafka_consumer_group: String,

    #[envconfig(from = "KAFKA_TLS", default = "false")]
    pub kafka_tls: bool,

    #[envconfig(from = "METADATA_TIMEOUT_MS", default = "10000")]
    pub metadata_timeout_ms: u64,

    #[envconfig(from = "SEND_TIMEOUT_MS", default = "5000")]
    pub send_timeout_ms: u64,

    /// How long to wait for listeners to stop before abandoning them.
    #[envconfig(from = "SHUTDOWN_GRACE_SECS", default = "5")]
    pub shutdown_grace_secs: u64,
}

impl Config {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// One-line summary printed before listening begins.
    pub fn connection_summary(&self) -> String {
        format!("{} topic={}", self.kafka_hosts, self.kafka_topic)
    }
}
