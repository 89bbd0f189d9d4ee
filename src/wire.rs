use crate::record::{Fields, LogRecord};
use serde::{Deserialize, Serialize};

/// Canonical JSON shape of a record, shared by the broker topic and the
/// remote logging service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRecord {
    pub log_id: String,
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub level: String,
    pub message: String,
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub hostname: String,
    pub instance_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    pub trace_id: String,
    pub span_id: String,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl From<&LogRecord> for WireRecord {
    fn from(record: &LogRecord) -> Self {
        let identity = record.identity();
        let correlation = record.correlation();
        WireRecord {
            log_id: record.id().to_string(),
            timestamp: record.timestamp().to_rfc3339(),
            level: record.level().as_str().to_string(),
            message: record.message().to_string(),
            fields: record.fields().clone(),
            operation: record.operation().map(str::to_string),
            service_name: identity.service_name.clone(),
            service_version: identity.service_version.clone(),
            environment: identity.environment.clone(),
            hostname: identity.hostname.clone(),
            instance_id: identity.instance_id.clone(),
            request_id: correlation.request_id.clone(),
            trace_id: correlation.trace_id.clone(),
            span_id: correlation.span_id.clone(),
            correlation_id: correlation.correlation_id.clone(),
            user_id: record.user_id().map(str::to_string),
            tags: record.tags().to_vec(),
        }
    }
}

/// Serialize a record into the canonical JSON bytes.
pub fn encode(record: &LogRecord) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&WireRecord::from(record))
}
