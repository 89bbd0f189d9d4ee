use crate::context::{
    CallContext, CORRELATION_ID_KEY, OPERATION_KEY, REQUEST_ID_KEY, SPAN_ID_KEY, TRACE_ID_KEY, USER_ID_KEY,
};
use crate::dispatcher::Dispatcher;
use crate::record::{Fields, Level};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Target prefix of the pipeline's own diagnostics. Events under it are
/// never fed back into the dispatcher.
pub const INTERNAL_TARGET: &str = "log_fanout";

const CONTEXT_KEYS: [&str; 6] = [
    REQUEST_ID_KEY,
    CORRELATION_ID_KEY,
    TRACE_ID_KEY,
    SPAN_ID_KEY,
    USER_ID_KEY,
    OPERATION_KEY,
];

/// `tracing_subscriber` layer that turns `tracing` events into
/// [`crate::record::LogRecord`]s and fans them out through a [`Dispatcher`].
///
/// Correlation ids and the operation name are picked up from fields of
/// enclosing spans (`request_id`, `trace_id`, `operation`, ...) or from
/// the event itself. Enqueueing never blocks the thread that logs.
pub struct FanoutLayer {
    dispatcher: Arc<Dispatcher>,
    min_level: Level,
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
    /// Handed to the dispatcher.
    pub emitted_events: Arc<AtomicU64>,
    /// Refused by the dispatcher (closed, or an empty message).
    pub rejected_events: Arc<AtomicU64>,
}

impl FanoutLayer {
    pub fn new(dispatcher: Arc<Dispatcher>, min_level: Level) -> Self {
        FanoutLayer {
            dispatcher,
            min_level,
            total_events: Arc::new(AtomicU64::new(0)),
            emitted_events: Arc::new(AtomicU64::new(0)),
            rejected_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Context values recorded on a span, stored in its extensions.
struct SpanContext(CallContext);

impl<S> Layer<S> for FanoutLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = ContextVisitor(CallContext::new());
        attrs.record(&mut visitor);
        if visitor.0.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanContext(visitor.0));
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let mut visitor = ContextVisitor(CallContext::new());
        values.record(&mut visitor);
        if visitor.0.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            let mut extensions = span.extensions_mut();
            match extensions.get_mut::<SpanContext>() {
                Some(existing) => existing.0.merge(&visitor.0),
                None => extensions.insert(SpanContext(visitor.0)),
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let meta = event.metadata();
        if meta.target().starts_with(INTERNAL_TARGET) {
            return;
        }
        let level = Level::from(meta.level());
        if level < self.min_level {
            return;
        }

        let mut fields = Fields::new();
        let mut message: Option<String> = None;
        let mut visitor = FieldVisitor {
            fields: &mut fields,
            message: &mut message,
        };
        event.record(&mut visitor);

        let mut call_ctx = CallContext::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(span_ctx) = span.extensions().get::<SpanContext>() {
                    call_ctx.merge(&span_ctx.0);
                }
            }
        }
        for key in CONTEXT_KEYS {
            if let Some(value) = fields.remove(key) {
                match value {
                    serde_json::Value::String(s) => call_ctx.insert(key, s),
                    other => call_ctx.insert(key, other.to_string()),
                }
            }
        }

        let message = message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| meta.name().to_string());
        let emitted = self
            .dispatcher
            .record(level, message)
            .field("target", meta.target())
            .fields(fields)
            .context(&call_ctx)
            .build()
            .and_then(|record| self.dispatcher.emit_record(record));

        match emitted {
            Ok(()) => self.emitted_events.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.rejected_events.fetch_add(1, Ordering::Relaxed),
        };
    }
}

pub struct FieldVisitor<'a> {
    pub fields: &'a mut Fields,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        // NaN and infinities have no JSON form.
        let value = serde_json::Number::from_f64(value)
            .map(serde_json::Value::Number)
            .unwrap_or_else(|| serde_json::Value::String(value.to_string()));
        self.fields.insert(field.name().to_string(), value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(format!("{:?}", value)));
        }
    }
}

struct ContextVisitor(CallContext);

impl ContextVisitor {
    fn put(&mut self, field: &Field, value: String) {
        if CONTEXT_KEYS.contains(&field.name()) {
            self.0.insert(field.name(), value);
        }
    }
}

impl Visit for ContextVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, format!("{:?}", value));
    }
}
