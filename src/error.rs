use std::time::Duration;

/// Errors visible to producers and to whoever owns the dispatcher.
///
/// Delivery problems never show up here; they stay inside the sink that
/// hit them and are only visible through [`crate::dispatcher::SinkStats`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("invalid log record: {0}")]
    InvalidRecord(String),

    #[error("dispatcher is closed")]
    DispatcherClosed,

    #[error("sink `{sink}` failed to close: {reason}")]
    SinkClose { sink: String, reason: String },
}

/// Failure raised by a sink transport while handing off a record.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("destination unavailable: {0}")]
    Unavailable(String),

    #[error("destination rejected credentials")]
    Unauthenticated,

    #[error("destination rejected record with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink is closed")]
    Closed,
}

/// Outcome of a single [`crate::sink::LogSink::send`] call.
#[derive(Debug)]
pub enum Delivery {
    /// The record was handed to the sink's transport.
    Delivered,
    /// The sink chose not to deliver the record (severity filter).
    Filtered,
    /// The transport could not take the record. The record is dropped.
    Failed(SinkError),
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Delivery::Failed(_))
    }
}

impl From<Result<(), SinkError>> for Delivery {
    fn from(res: Result<(), SinkError>) -> Self {
        match res {
            Ok(()) => Delivery::Delivered,
            Err(e) => Delivery::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_from_result() {
        assert!(Delivery::from(Ok(())).is_delivered());
        assert!(Delivery::from(Err(SinkError::Closed)).is_failed());
    }

    #[test]
    fn sink_close_message_names_the_sink() {
        let err = PipelineError::SinkClose {
            sink: "broker".into(),
            reason: "flush timed out".into(),
        };
        assert_eq!(err.to_string(), "sink `broker` failed to close: flush timed out");
    }
}
