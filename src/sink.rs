use crate::error::{Delivery, SinkError};
use crate::record::LogRecord;
use async_trait::async_trait;
use std::time::Duration;

/// Default per-call budget for sinks that talk to the network.
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(2);

/// Asynchronous destination for [`LogRecord`]s fanned out by the dispatcher.
///
/// Implementations are responsible for transporting records to a concrete
/// backend (stdout, Kafka, a remote logging service, etc). The dispatcher
/// calls `send` from per-sink worker tasks and never awaits it on the
/// producer's thread.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Short name used in stats and diagnostics, e.g. `"console"`.
    fn name(&self) -> &str;

    /// Deliver a single record to the underlying backend.
    ///
    /// **Parameters**
    /// - `record`: fully-populated [`LogRecord`]. Sinks only read it.
    ///
    /// **Returns**
    /// - [`Delivery::Delivered`] if the backend accepted the record.
    /// - [`Delivery::Failed`] on transport, serialization or timeout
    ///   errors. The record is dropped; nothing is retried.
    async fn send(&self, record: &LogRecord) -> Delivery;

    /// Flush buffered state and release the transport.
    ///
    /// Must be idempotent: a second call is a no-op returning `Ok(())`.
    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Budget applied by the dispatcher around each `send`. `None` means
    /// the sink is local and fast enough not to need one.
    fn default_timeout(&self) -> Option<Duration> {
        None
    }
}
