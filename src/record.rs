use crate::context::{CallContext, Correlation, OPERATION_KEY, USER_ID_KEY};
use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Structured payload attached to a record. Keys are unique; a later
/// insert under the same key replaces the earlier value.
pub type Fields = BTreeMap<String, serde_json::Value>;

/// Severity of a record, totally ordered from `Debug` to `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown log level `{0}`")]
pub struct ParseLevelError(String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" | "TRACE" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "ERROR" => Ok(Level::Error),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

impl From<&tracing::Level> for Level {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => Level::Error,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::INFO => Level::Info,
            _ => Level::Debug,
        }
    }
}

/// Process-wide identity stamped on every record by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub hostname: String,
    pub instance_id: String,
}

/// One structured log event. Immutable once built: fields are private and
/// only exposed through shared references.
#[derive(Debug, Clone)]
pub struct LogRecord {
    id: Uuid,
    timestamp: DateTime<Utc>,
    level: Level,
    message: String,
    fields: Fields,
    operation: Option<String>,
    identity: Arc<ServiceIdentity>,
    correlation: Correlation,
    user_id: Option<String>,
    tags: Vec<String>,
}

impl LogRecord {
    /// Build a record without service identity.
    ///
    /// **Parameters**
    /// - `level`, `message`: required; an empty `message` is rejected.
    /// - `fields`: optional payload, `None` is an empty map.
    /// - `ctx`: ambient call context; correlation ids missing from it
    ///   become empty strings.
    ///
    /// **Returns**
    /// - `Err(PipelineError::InvalidRecord)` if `message` is empty.
    pub fn build(
        level: Level,
        message: impl Into<String>,
        fields: Option<Fields>,
        ctx: &CallContext,
    ) -> Result<LogRecord, PipelineError> {
        LogRecord::builder(level, message)
            .fields(fields.unwrap_or_default())
            .context(ctx)
            .build()
    }

    pub fn builder(level: Level, message: impl Into<String>) -> RecordBuilder {
        RecordBuilder {
            level,
            message: message.into(),
            fields: Fields::new(),
            operation: None,
            identity: Arc::new(ServiceIdentity::default()),
            ctx: CallContext::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub(crate) fn shared_identity(&self) -> Arc<ServiceIdentity> {
        Arc::clone(&self.identity)
    }

    /// Attach `identity` to a record no sink has seen yet.
    pub(crate) fn stamped(self, identity: Arc<ServiceIdentity>) -> LogRecord {
        LogRecord { identity, ..self }
    }

    pub fn correlation(&self) -> &Correlation {
        &self.correlation
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

/// Accumulates the inputs of a [`LogRecord`]; `id` and `timestamp` are
/// assigned in [`RecordBuilder::build`].
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    level: Level,
    message: String,
    fields: Fields,
    operation: Option<String>,
    identity: Arc<ServiceIdentity>,
    ctx: CallContext,
}

impl RecordBuilder {
    pub fn field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn fields<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        for (k, v) in fields {
            self.fields.insert(k.into(), v.into());
        }
        self
    }

    /// Name of the business operation, e.g. `CreateCluster`. Takes
    /// precedence over an `operation` key in the call context.
    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn context(mut self, ctx: &CallContext) -> Self {
        self.ctx.merge(ctx);
        self
    }

    pub fn identity(mut self, identity: Arc<ServiceIdentity>) -> Self {
        self.identity = identity;
        self
    }

    pub fn build(self) -> Result<LogRecord, PipelineError> {
        if self.message.is_empty() {
            return Err(PipelineError::InvalidRecord("message must not be empty".into()));
        }

        let operation = self
            .operation
            .or_else(|| self.ctx.get(OPERATION_KEY).map(str::to_string))
            .filter(|op| !op.is_empty());

        Ok(LogRecord {
            id: Uuid::now_v7(),
            timestamp: next_timestamp(),
            level: self.level,
            message: self.message,
            fields: self.fields,
            operation,
            identity: self.identity,
            correlation: Correlation::extract(&self.ctx),
            user_id: self.ctx.get(USER_ID_KEY).map(str::to_string),
            tags: self.ctx.tags().to_vec(),
        })
    }
}

static LAST_TIMESTAMP_NANOS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Wall-clock time, bumped forward by one nanosecond whenever the clock
/// did not advance (or stepped back) since the previous record.
fn next_timestamp() -> DateTime<Utc> {
    let now = Utc::now();
    let Some(now_nanos) = now.timestamp_nanos_opt() else {
        return now;
    };

    let mut prev = LAST_TIMESTAMP_NANOS.load(Ordering::Relaxed);
    loop {
        let next = if now_nanos > prev { now_nanos } else { prev.saturating_add(1) };
        match LAST_TIMESTAMP_NANOS.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return DateTime::from_timestamp_nanos(next),
            Err(actual) => prev = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{REQUEST_ID_KEY, TRACE_ID_KEY};
    use serde_json::json;

    #[test]
    fn empty_message_is_invalid() {
        let err = LogRecord::build(Level::Info, "", None, &CallContext::new()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRecord(_)));
    }

    #[test]
    fn missing_fields_become_empty_map() {
        let rec = LogRecord::build(Level::Warn, "cluster updated", None, &CallContext::new()).unwrap();
        assert!(rec.fields().is_empty());
        assert_eq!(rec.correlation().request_id, "");
        assert_eq!(rec.operation(), None);
    }

    #[test]
    fn duplicate_keys_keep_last_value() {
        let rec = LogRecord::builder(Level::Info, "squad created")
            .field("id", "a")
            .fields([("id", json!("b")), ("members", json!(3))])
            .build()
            .unwrap();
        assert_eq!(rec.fields()["id"], json!("b"));
        assert_eq!(rec.fields()["members"], json!(3));
    }

    #[test]
    fn context_populates_correlation_and_operation() {
        let ctx = CallContext::new()
            .with(REQUEST_ID_KEY, "req-7")
            .with(TRACE_ID_KEY, "t-7")
            .with(OPERATION_KEY, "DeleteTribe")
            .with(USER_ID_KEY, "u-1")
            .with_tag("api");
        let rec = LogRecord::build(Level::Error, "delete failed", None, &ctx).unwrap();
        assert_eq!(rec.correlation().request_id, "req-7");
        assert_eq!(rec.correlation().trace_id, "t-7");
        assert_eq!(rec.operation(), Some("DeleteTribe"));
        assert_eq!(rec.user_id(), Some("u-1"));
        assert_eq!(rec.tags(), &["api".to_string()]);

        let explicit = LogRecord::builder(Level::Info, "x")
            .operation("CreateCluster")
            .context(&ctx)
            .build()
            .unwrap();
        assert_eq!(explicit.operation(), Some("CreateCluster"));
    }

    #[test]
    fn timestamps_strictly_increase() {
        let mut prev = LogRecord::build(Level::Debug, "tick", None, &CallContext::new()).unwrap();
        for _ in 0..1000 {
            let next = LogRecord::build(Level::Debug, "tick", None, &CallContext::new()).unwrap();
            assert!(next.timestamp() > prev.timestamp());
            assert_ne!(next.id(), prev.id());
            prev = next;
        }
    }

    #[test]
    fn levels_are_ordered_and_parse() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Warn < Level::Error);
        assert_eq!("warning".parse::<Level>().unwrap(), Level::Warn);
        assert_eq!(Level::from(&tracing::Level::TRACE), Level::Debug);
        assert!("loud".parse::<Level>().is_err());
    }
}
