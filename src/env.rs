//! Environment variable names used by this crate for convenient
//! configuration of the pipeline from microservices.
//!
//! These are purely helpers; the sinks and the dispatcher never read the
//! environment themselves.

/// Broker DSN, e.g. `kafka://broker1:9092,broker2:9092/logs-topic`.
pub const LOG_FANOUT_BROKER_DSN_ENV: &str = "LOG_FANOUT_BROKER_DSN";

/// Base URL of the remote logging service, e.g. `http://logging:8080`.
pub const LOG_FANOUT_REMOTE_URL_ENV: &str = "LOG_FANOUT_REMOTE_URL";

/// Optional bearer token for the remote logging service.
pub const LOG_FANOUT_REMOTE_TOKEN_ENV: &str = "LOG_FANOUT_REMOTE_TOKEN";

/// Per-sink queue capacity.
pub const LOG_FANOUT_QUEUE_CAPACITY_ENV: &str = "LOG_FANOUT_QUEUE_CAPACITY";

/// `drop_new` or `drop_oldest`.
pub const LOG_FANOUT_OVERFLOW_ENV: &str = "LOG_FANOUT_OVERFLOW";

/// `json` or `logfmt`.
pub const LOG_FANOUT_CONSOLE_FORMAT_ENV: &str = "LOG_FANOUT_CONSOLE_FORMAT";

/// Service identity.
pub const SERVICE_NAME_ENV: &str = "SERVICE_NAME";
pub const SERVICE_VERSION_ENV: &str = "SERVICE_VERSION";
pub const ENVIRONMENT_ENV: &str = "ENV";
pub const HOSTNAME_ENV: &str = "HOSTNAME";
pub const INSTANCE_ID_ENV: &str = "INSTANCE_ID";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read a non-empty environment variable.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
