use crate::backend::{parse_broker_dsn, DsnError};
use crate::broker::BrokerConfig;
use crate::console::ConsoleFormat;
use crate::dispatcher::DEFAULT_QUEUE_CAPACITY;
use crate::env::*;
use crate::queue::OverflowPolicy;
use crate::record::ServiceIdentity;
use crate::remote::RemoteConfig;

/// Everything needed to assemble the pipeline, usually read from the
/// environment at process start.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub identity: ServiceIdentity,
    /// Broker sink target; `None` disables the broker sink.
    pub broker: Option<BrokerConfig>,
    /// Remote logging service; `None` disables the remote sink.
    pub remote: Option<RemoteConfig>,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub console_format: ConsoleFormat,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid {key}: {source}")]
    Dsn {
        key: &'static str,
        #[source]
        source: DsnError,
    },

    #[error("invalid {key} `{value}`: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl PipelineConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_opt)
    }

    /// Read the configuration through `lookup`, which returns the value of
    /// a variable or `None` when it is unset or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let identity = ServiceIdentity {
            service_name: lookup(SERVICE_NAME_ENV).unwrap_or_else(|| "unknown-service".to_string()),
            service_version: lookup(SERVICE_VERSION_ENV).unwrap_or_else(|| "0.0.0".to_string()),
            environment: lookup(ENVIRONMENT_ENV).unwrap_or_else(|| "development".to_string()),
            hostname: lookup(HOSTNAME_ENV).unwrap_or_else(|| "localhost".to_string()),
            instance_id: lookup(INSTANCE_ID_ENV).unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        };

        let broker = lookup(LOG_FANOUT_BROKER_DSN_ENV)
            .map(|dsn| parse_broker_dsn(&dsn))
            .transpose()
            .map_err(|source| ConfigError::Dsn {
                key: LOG_FANOUT_BROKER_DSN_ENV,
                source,
            })?;

        let remote = lookup(LOG_FANOUT_REMOTE_URL_ENV).map(|url| {
            let mut remote = RemoteConfig::new(url);
            remote.token = lookup(LOG_FANOUT_REMOTE_TOKEN_ENV);
            remote
        });

        let queue_capacity = match lookup(LOG_FANOUT_QUEUE_CAPACITY_ENV) {
            Some(v) => v.trim().parse::<usize>().map_err(|e| ConfigError::Invalid {
                key: LOG_FANOUT_QUEUE_CAPACITY_ENV,
                value: v.clone(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_QUEUE_CAPACITY,
        };

        let overflow = match lookup(LOG_FANOUT_OVERFLOW_ENV) {
            Some(v) => v.parse::<OverflowPolicy>().map_err(|reason| ConfigError::Invalid {
                key: LOG_FANOUT_OVERFLOW_ENV,
                value: v.clone(),
                reason,
            })?,
            None => OverflowPolicy::default(),
        };

        let console_format = match lookup(LOG_FANOUT_CONSOLE_FORMAT_ENV) {
            Some(v) => v.parse::<ConsoleFormat>().map_err(|reason| ConfigError::Invalid {
                key: LOG_FANOUT_CONSOLE_FORMAT_ENV,
                value: v.clone(),
                reason,
            })?,
            None => ConsoleFormat::default(),
        };

        Ok(PipelineConfig {
            identity,
            broker,
            remote,
            queue_capacity,
            overflow,
            console_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.identity.environment, "development");
        assert!(!cfg.identity.instance_id.is_empty());
        assert!(cfg.broker.is_none());
        assert!(cfg.remote.is_none());
        assert_eq!(cfg.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(cfg.overflow, OverflowPolicy::DropNewest);
    }

    #[test]
    fn reads_all_settings() {
        let cfg = PipelineConfig::from_lookup(lookup(&[
            (SERVICE_NAME_ENV, "cluster-service"),
            (SERVICE_VERSION_ENV, "2.1.0"),
            (ENVIRONMENT_ENV, "production"),
            (HOSTNAME_ENV, "node-3"),
            (INSTANCE_ID_ENV, "i-abc"),
            (LOG_FANOUT_BROKER_DSN_ENV, "kafka://k1:9092,k2:9092/audit-logs"),
            (LOG_FANOUT_REMOTE_URL_ENV, "http://logging:8080"),
            (LOG_FANOUT_REMOTE_TOKEN_ENV, "secret"),
            (LOG_FANOUT_QUEUE_CAPACITY_ENV, "4096"),
            (LOG_FANOUT_OVERFLOW_ENV, "drop_oldest"),
            (LOG_FANOUT_CONSOLE_FORMAT_ENV, "logfmt"),
        ]))
        .unwrap();

        assert_eq!(cfg.identity.service_name, "cluster-service");
        assert_eq!(cfg.identity.instance_id, "i-abc");
        let broker = cfg.broker.unwrap();
        assert_eq!(broker.brokers, "k1:9092,k2:9092");
        assert_eq!(broker.topic, "audit-logs");
        let remote = cfg.remote.unwrap();
        assert_eq!(remote.url, "http://logging:8080");
        assert_eq!(remote.token.as_deref(), Some("secret"));
        assert_eq!(cfg.queue_capacity, 4096);
        assert_eq!(cfg.overflow, OverflowPolicy::DropOldest);
        assert_eq!(cfg.console_format, ConsoleFormat::Logfmt);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            PipelineConfig::from_lookup(lookup(&[(LOG_FANOUT_QUEUE_CAPACITY_ENV, "lots")])),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            PipelineConfig::from_lookup(lookup(&[(LOG_FANOUT_BROKER_DSN_ENV, "amqp://x/y")])),
            Err(ConfigError::Dsn { .. })
        ));
    }
}
