use crate::backoff::BackoffConfig;
use crate::error::{Delivery, SinkError};
use crate::record::LogRecord;
use crate::sink::{LogSink, DEFAULT_NETWORK_TIMEOUT};
use crate::wire::WireRecord;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Request sent to the remote logging service for each record. It carries
/// the same fields as the broker payload.
pub type RemoteLogRequest = WireRecord;

/// Settings for [`RemoteServiceSink`].
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL of the logging service, e.g. `http://logging:8080`.
    pub url: String,
    /// Optional bearer token.
    pub token: Option<String>,
    /// Budget for one `write_log` call.
    pub call_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl RemoteConfig {
    pub fn new(url: impl Into<String>) -> Self {
        RemoteConfig {
            url: url.into(),
            token: None,
            call_timeout: DEFAULT_NETWORK_TIMEOUT,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Client side of the remote logging service.
#[async_trait]
pub trait LogServiceClient: Send + Sync {
    /// Establish, or verify, the standing connection within `timeout`.
    async fn connect(&self, timeout: Duration) -> Result<(), SinkError>;

    /// Ship one request. Failures must leave the connection usable for
    /// the next call.
    async fn write_log(&self, request: &RemoteLogRequest, timeout: Duration) -> Result<(), SinkError>;

    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Ships records to a remote logging service over a connection that is
/// established once, at construction.
pub struct RemoteServiceSink {
    client: Arc<dyn LogServiceClient>,
    call_timeout: Duration,
    failures: AtomicU64,
    closed: AtomicBool,
}

impl RemoteServiceSink {
    /// Connect `client`, retrying with exponential backoff.
    ///
    /// **Parameters**
    /// - `backoff`: delays between attempts and the per-attempt deadline
    ///   floor (`min_connect_timeout`).
    /// - `call_timeout`: budget for each later `send`.
    ///
    /// **Returns**
    /// - `Err(SinkError::Unavailable)` once `backoff.max_attempts` attempts
    ///   have failed.
    pub async fn connect(
        client: Arc<dyn LogServiceClient>,
        backoff: &BackoffConfig,
        call_timeout: Duration,
    ) -> Result<Self, SinkError> {
        let attempts = backoff.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            sleep(backoff.delay(attempt)).await;

            let deadline = backoff.connect_timeout(attempt);
            let res = match timeout(deadline, client.connect(deadline)).await {
                Ok(res) => res,
                Err(_) => Err(SinkError::Timeout(deadline)),
            };
            match res {
                Ok(()) => {
                    tracing::debug!(target: "log_fanout::remote", attempt, "connected to logging service");
                    return Ok(RemoteServiceSink {
                        client,
                        call_timeout,
                        failures: AtomicU64::new(0),
                        closed: AtomicBool::new(false),
                    });
                }
                Err(e) => {
                    tracing::warn!(target: "log_fanout::remote", attempt, error = %e, "logging service connect failed");
                    last_err = Some(e);
                }
            }
        }

        let reason = last_err.map(|e| e.to_string()).unwrap_or_default();
        Err(SinkError::Unavailable(format!("gave up after {attempts} attempts: {reason}")))
    }

    /// Connect to an HTTP logging service described by `config`.
    #[cfg(feature = "remote")]
    pub async fn http(config: &RemoteConfig) -> Result<Self, SinkError> {
        let client = crate::http::HttpLogServiceClient::new(config)?;
        RemoteServiceSink::connect(Arc::new(client), &config.backoff, config.call_timeout).await
    }

    /// Calls that did not reach the service.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LogSink for RemoteServiceSink {
    fn name(&self) -> &str {
        "remote"
    }

    async fn send(&self, record: &LogRecord) -> Delivery {
        if self.closed.load(Ordering::Acquire) {
            return Delivery::Failed(SinkError::Closed);
        }

        let request = RemoteLogRequest::from(record);
        let res = match timeout(self.call_timeout, self.client.write_log(&request, self.call_timeout)).await {
            Ok(res) => res,
            Err(_) => Err(SinkError::Timeout(self.call_timeout)),
        };
        if res.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        res.into()
    }

    async fn close(&self) -> Result<(), SinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.client.close().await
    }

    fn default_timeout(&self) -> Option<Duration> {
        Some(self.call_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CallContext;
    use crate::record::Level;
    use std::sync::Mutex;

    /// Fails `connect` a fixed number of times, then accepts.
    #[derive(Default)]
    struct FlakyClient {
        connect_failures: u32,
        connects: AtomicU64,
        unauthenticated: AtomicBool,
        written: Mutex<Vec<RemoteLogRequest>>,
        closes: AtomicU64,
    }

    #[async_trait]
    impl LogServiceClient for FlakyClient {
        async fn connect(&self, _timeout: Duration) -> Result<(), SinkError> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst) as u32;
            if n < self.connect_failures {
                Err(SinkError::Unavailable("connection refused".into()))
            } else {
                Ok(())
            }
        }

        async fn write_log(&self, request: &RemoteLogRequest, _timeout: Duration) -> Result<(), SinkError> {
            if self.unauthenticated.load(Ordering::SeqCst) {
                return Err(SinkError::Unauthenticated);
            }
            self.written.lock().unwrap().push(request.clone());
            Ok(())
        }

        async fn close(&self) -> Result<(), SinkError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct HangingClient;

    #[async_trait]
    impl LogServiceClient for HangingClient {
        async fn connect(&self, _timeout: Duration) -> Result<(), SinkError> {
            Ok(())
        }

        async fn write_log(&self, _request: &RemoteLogRequest, _timeout: Duration) -> Result<(), SinkError> {
            std::future::pending().await
        }
    }

    fn fast_backoff(max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(5),
            jitter: 0.0,
            min_connect_timeout: Duration::from_millis(50),
            max_attempts,
            ..BackoffConfig::default()
        }
    }

    fn record() -> LogRecord {
        LogRecord::build(Level::Info, "user added to squad", None, &CallContext::new()).unwrap()
    }

    #[tokio::test]
    async fn retries_connect_then_delivers() {
        let client = Arc::new(FlakyClient { connect_failures: 2, ..Default::default() });
        let sink = RemoteServiceSink::connect(client.clone(), &fast_backoff(5), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(client.connects.load(Ordering::SeqCst), 3);

        let rec = record();
        assert!(sink.send(&rec).await.is_delivered());
        assert_eq!(client.written.lock().unwrap()[0].log_id, rec.id().to_string());
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let client = Arc::new(FlakyClient { connect_failures: u32::MAX, ..Default::default() });
        let err = RemoteServiceSink::connect(client.clone(), &fast_backoff(3), Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SinkError::Unavailable(_)));
        assert_eq!(client.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn call_failures_keep_the_connection() {
        let client = Arc::new(FlakyClient::default());
        let sink = RemoteServiceSink::connect(client.clone(), &fast_backoff(1), Duration::from_secs(1))
            .await
            .unwrap();

        client.unauthenticated.store(true, Ordering::SeqCst);
        assert!(matches!(sink.send(&record()).await, Delivery::Failed(SinkError::Unauthenticated)));
        client.unauthenticated.store(false, Ordering::SeqCst);
        assert!(sink.send(&record()).await.is_delivered());
        assert_eq!(sink.failures(), 1);
        assert_eq!(client.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hung_call_times_out() {
        let sink = RemoteServiceSink::connect(Arc::new(HangingClient), &fast_backoff(1), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(matches!(sink.send(&record()).await, Delivery::Failed(SinkError::Timeout(_))));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let client = Arc::new(FlakyClient::default());
        let sink = RemoteServiceSink::connect(client.clone(), &fast_backoff(1), Duration::from_secs(1))
            .await
            .unwrap();
        sink.close().await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(client.closes.load(Ordering::SeqCst), 1);
    }
}
