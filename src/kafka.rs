use crate::broker::BrokerProducer;
use crate::error::SinkError;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::time::Duration;

/// Kafka-backed [`BrokerProducer`]. Each message waits for acknowledgement
/// from all in-sync replicas.
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// Create a new Kafka producer.
    ///
    /// `brokers` is a comma-separated list of broker addresses.
    pub fn new(brokers: &str) -> Result<Self, SinkError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("acks", "all")
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        Ok(KafkaProducer { producer })
    }
}

#[async_trait]
impl BrokerProducer for KafkaProducer {
    async fn publish(&self, topic: &str, key: &[u8], payload: &[u8], timeout: Duration) -> Result<(), SinkError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);
        // Bounded wait for a slot in the local queue plus the delivery report.
        match tokio::time::timeout(timeout, self.producer.send(record, timeout)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err((e, _))) => Err(SinkError::Transport(e.to_string())),
            Err(_) => Err(SinkError::Timeout(timeout)),
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<(), SinkError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?
            .map_err(|e| SinkError::Transport(e.to_string()))
    }
}
