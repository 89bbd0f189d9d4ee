use serde::Serialize;
use std::collections::BTreeMap;

/// Well-known keys read from a [`CallContext`].
pub const REQUEST_ID_KEY: &str = "request_id";
pub const CORRELATION_ID_KEY: &str = "correlation_id";
pub const TRACE_ID_KEY: &str = "trace_id";
pub const SPAN_ID_KEY: &str = "span_id";
pub const USER_ID_KEY: &str = "user_id";
pub const OPERATION_KEY: &str = "operation";

/// Ambient, call-scoped values a producer carries through one request.
///
/// The context is passed explicitly into record construction; nothing in
/// this crate reads it from a global or a thread-local.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    values: BTreeMap<String, String>,
    tags: Vec<String>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.tags.is_empty()
    }

    /// Overlay `other` on top of `self`; values from `other` win.
    pub fn merge(&mut self, other: &CallContext) {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
        for tag in &other.tags {
            if !self.tags.contains(tag) {
                self.tags.push(tag.clone());
            }
        }
    }

    /// Build a context from inbound request headers.
    ///
    /// Recognizes `x-request-id`, `x-correlation-id`, `x-user-id` and a
    /// W3C `traceparent` (`00-<trace-id>-<parent-id>-<flags>`). Header
    /// names are matched case-insensitively; anything else is ignored.
    pub fn from_headers<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut ctx = CallContext::new();
        for (name, value) in headers {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match name.to_ascii_lowercase().as_str() {
                "x-request-id" => ctx.insert(REQUEST_ID_KEY, value),
                "x-correlation-id" => ctx.insert(CORRELATION_ID_KEY, value),
                "x-user-id" => ctx.insert(USER_ID_KEY, value),
                "traceparent" => {
                    let parts: Vec<&str> = value.split('-').collect();
                    if parts.len() == 4 && parts[1].len() == 32 && parts[2].len() == 16 {
                        ctx.insert(TRACE_ID_KEY, parts[1]);
                        ctx.insert(SPAN_ID_KEY, parts[2]);
                    }
                }
                _ => {}
            }
        }
        ctx
    }
}

/// Correlation identifiers lifted out of a [`CallContext`].
///
/// Missing keys become empty strings, never an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Correlation {
    pub request_id: String,
    pub correlation_id: String,
    pub trace_id: String,
    pub span_id: String,
}

impl Correlation {
    pub fn extract(ctx: &CallContext) -> Self {
        let read = |key: &str| ctx.get(key).unwrap_or_default().to_string();
        Correlation {
            request_id: read(REQUEST_ID_KEY),
            correlation_id: read(CORRELATION_ID_KEY),
            trace_id: read(TRACE_ID_KEY),
            span_id: read(SPAN_ID_KEY),
        }
    }
}
