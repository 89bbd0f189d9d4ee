use crate::console::ConsoleSink;
use crate::error::{Delivery, SinkError};
use crate::record::{Level, LogRecord};
use crate::sink::{LogSink, DEFAULT_NETWORK_TIMEOUT};
use crate::wire;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Default topic when a broker DSN does not name one.
pub const DEFAULT_TOPIC: &str = "logs-topic";

/// Where the broker sink publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Comma-separated `host:port` list.
    pub brokers: String,
    pub topic: String,
}

/// Minimal producer surface the broker sink needs from a message broker
/// client. Implemented for Kafka behind the `kafka` feature.
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Publish one message and wait for the broker's acknowledgement, for
    /// at most `timeout`.
    async fn publish(&self, topic: &str, key: &[u8], payload: &[u8], timeout: Duration) -> Result<(), SinkError>;

    /// Flush anything queued inside the client.
    async fn flush(&self, _timeout: Duration) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Publishes each record as canonical JSON to one topic, keyed by level so
/// records of the same severity stay ordered within a partition.
///
/// Delivery is at-most-once: a failed publish is reported on the fallback
/// console and the record is dropped.
pub struct BrokerSink {
    producer: Arc<dyn BrokerProducer>,
    topic: String,
    timeout: Duration,
    fallback: Option<Arc<ConsoleSink>>,
    failures: AtomicU64,
    closed: AtomicBool,
}

impl BrokerSink {
    pub fn new(producer: Arc<dyn BrokerProducer>, topic: impl Into<String>) -> Self {
        BrokerSink {
            producer,
            topic: topic.into(),
            timeout: DEFAULT_NETWORK_TIMEOUT,
            fallback: None,
            failures: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Connect a Kafka producer for `config`.
    #[cfg(feature = "kafka")]
    pub fn kafka(config: &BrokerConfig) -> Result<Self, SinkError> {
        let producer = crate::kafka::KafkaProducer::new(&config.brokers)?;
        Ok(BrokerSink::new(Arc::new(producer), config.topic.clone()))
    }

    /// Console used to report publish failures. Must not be routed back
    /// into this sink.
    pub fn with_fallback(mut self, console: Arc<ConsoleSink>) -> Self {
        self.fallback = Some(console);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publishes that were not acknowledged.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn report_failure(&self, record: &LogRecord, err: &SinkError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        let Some(console) = &self.fallback else {
            return;
        };
        let notice = LogRecord::builder(Level::Warn, "broker publish failed, record dropped")
            .identity(record.shared_identity())
            .field("sink", "broker")
            .field("topic", self.topic.as_str())
            .field("log_id", record.id().to_string())
            .field("error", err.to_string())
            .build();
        if let Ok(notice) = notice {
            let _ = console.write_record(&notice);
        }
    }
}

#[async_trait]
impl LogSink for BrokerSink {
    fn name(&self) -> &str {
        "broker"
    }

    async fn send(&self, record: &LogRecord) -> Delivery {
        if self.closed.load(Ordering::Acquire) {
            return Delivery::Failed(SinkError::Closed);
        }

        let payload = match wire::encode(record) {
            Ok(p) => p,
            Err(e) => {
                let err = SinkError::Serialize(e);
                self.report_failure(record, &err);
                return Delivery::Failed(err);
            }
        };

        let key = record.level().as_str().as_bytes();
        let published = match timeout(self.timeout, self.producer.publish(&self.topic, key, &payload, self.timeout)).await {
            Ok(res) => res,
            Err(_) => Err(SinkError::Timeout(self.timeout)),
        };
        match published {
            Ok(()) => Delivery::Delivered,
            Err(err) => {
                self.report_failure(record, &err);
                Delivery::Failed(err)
            }
        }
    }

    async fn close(&self) -> Result<(), SinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.producer.flush(self.timeout).await
    }

    fn default_timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }
}
