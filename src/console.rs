use crate::error::{Delivery, SinkError};
use crate::record::{Level, LogRecord};
use crate::sink::LogSink;
use crate::wire::WireRecord;
use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Line format written by [`ConsoleSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleFormat {
    /// One JSON object per line, same shape as the broker payload.
    #[default]
    Json,
    /// `key=value` pairs, quoted where needed.
    Logfmt,
}

impl FromStr for ConsoleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ConsoleFormat::Json),
            "logfmt" | "kv" => Ok(ConsoleFormat::Logfmt),
            other => Err(format!("unknown console format `{other}`")),
        }
    }
}

/// Writes each record as a single structured line to a local stream.
///
/// Write errors are counted and reported as failed deliveries; they are
/// never retried.
pub struct ConsoleSink {
    writer: Mutex<Box<dyn Write + Send>>,
    format: ConsoleFormat,
    min_level: Level,
    write_failures: AtomicU64,
    closed: AtomicBool,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self::with_writer(io::stdout())
    }

    pub fn stderr() -> Self {
        Self::with_writer(io::stderr())
    }

    pub fn with_writer<W: Write + Send + 'static>(writer: W) -> Self {
        ConsoleSink {
            writer: Mutex::new(Box::new(writer)),
            format: ConsoleFormat::default(),
            min_level: Level::Debug,
            write_failures: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn format(mut self, format: ConsoleFormat) -> Self {
        self.format = format;
        self
    }

    pub fn min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    /// Number of lines that could not be written.
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// Render a record as one line, without the trailing newline.
    pub fn render(&self, record: &LogRecord) -> String {
        match self.format {
            ConsoleFormat::Json => serde_json::to_string(&WireRecord::from(record)).unwrap_or_else(|_| {
                format!(
                    "{} {} {} log_id={}",
                    record.timestamp().to_rfc3339(),
                    record.level(),
                    record.message(),
                    record.id()
                )
            }),
            ConsoleFormat::Logfmt => render_logfmt(record),
        }
    }

    /// Write a record synchronously, bypassing the dispatcher.
    ///
    /// Other sinks use this to report their own failures locally.
    pub fn write_record(&self, record: &LogRecord) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }

        let line = self.render(record);
        let mut writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let res = writeln!(writer, "{line}").and_then(|_| writer.flush());
        if let Err(e) = res {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            return Err(SinkError::Io(e));
        }
        Ok(())
    }
}

#[async_trait]
impl LogSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(&self, record: &LogRecord) -> Delivery {
        if record.level() < self.min_level {
            return Delivery::Filtered;
        }
        self.write_record(record).into()
    }

    async fn close(&self) -> Result<(), SinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.flush()?;
        Ok(())
    }
}

fn render_logfmt(record: &LogRecord) -> String {
    let mut line = String::with_capacity(256);
    let _ = write!(
        line,
        "ts={} level={} msg={} log_id={}",
        record.timestamp().to_rfc3339(),
        record.level(),
        logfmt_value(record.message()),
        record.id()
    );

    let identity = record.identity();
    let correlation = record.correlation();
    let context = [
        ("service", identity.service_name.as_str()),
        ("version", identity.service_version.as_str()),
        ("env", identity.environment.as_str()),
        ("host", identity.hostname.as_str()),
        ("instance", identity.instance_id.as_str()),
        ("op", record.operation().unwrap_or_default()),
        ("request_id", correlation.request_id.as_str()),
        ("correlation_id", correlation.correlation_id.as_str()),
        ("trace_id", correlation.trace_id.as_str()),
        ("span_id", correlation.span_id.as_str()),
        ("user_id", record.user_id().unwrap_or_default()),
    ];
    for (key, value) in context {
        if !value.is_empty() {
            let _ = write!(line, " {}={}", key, logfmt_value(value));
        }
    }
    if !record.tags().is_empty() {
        let _ = write!(line, " tags={}", logfmt_value(&record.tags().join(",")));
    }

    for (key, value) in record.fields() {
        let rendered = match value {
            serde_json::Value::String(s) => logfmt_value(s).into_owned(),
            other => logfmt_value(&other.to_string()).into_owned(),
        };
        let _ = write!(line, " {}={}", logfmt_key(key), rendered);
    }
    line
}

fn logfmt_value(s: &str) -> Cow<'_, str> {
    let needs_quotes = s.is_empty()
        || s.chars().any(|c| c.is_whitespace() || c == '"' || c == '=' || c.is_control());
    if needs_quotes {
        Cow::Owned(format!("{s:?}"))
    } else {
        Cow::Borrowed(s)
    }
}

fn logfmt_key(key: &str) -> Cow<'_, str> {
    if key.is_empty() || key.chars().any(|c| c.is_whitespace() || c == '=' || c == '"') {
        Cow::Owned(key.chars().map(|c| if c.is_whitespace() || c == '=' || c == '"' { '_' } else { c }).collect())
    } else {
        Cow::Borrowed(key)
    }
}
