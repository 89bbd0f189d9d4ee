use std::sync::Arc;

use crate::broker::{BrokerConfig, DEFAULT_TOPIC};
use crate::config::PipelineConfig;
use crate::console::ConsoleSink;
use crate::dispatcher::{Dispatcher, DispatcherBuilder, SinkOptions};
use crate::error::SinkError;

/// Sink variants the pipeline can assemble from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Console,
    Broker,
    RemoteService,
}

/// Parse a broker DSN into a [`BrokerConfig`].
///
/// Examples:
/// - "kafka://broker1:9092,broker2:9092/logs-topic"
/// - "kafka://localhost:9092" (topic defaults to `logs-topic`)
pub fn parse_broker_dsn(dsn: &str) -> Result<BrokerConfig, DsnError> {
    let lower = dsn.to_ascii_lowercase();
    if !lower.starts_with("kafka://") {
        return Err(DsnError::UnknownScheme);
    }

    let without_scheme = &dsn["kafka://".len()..];
    let (brokers, topic) = match without_scheme.split_once('/') {
        Some((brokers, topic)) => (brokers, topic.trim_matches('/')),
        None => (without_scheme, ""),
    };
    if brokers.split(',').all(|b| b.trim().is_empty()) {
        return Err(DsnError::MissingBrokers);
    }

    Ok(BrokerConfig {
        brokers: brokers.to_string(),
        topic: if topic.is_empty() { DEFAULT_TOPIC.to_string() } else { topic.to_string() },
    })
}

/// Error type returned when parsing a DSN.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DsnError {
    #[error("unknown or unsupported DSN scheme")]
    UnknownScheme,

    #[error("DSN names no broker address")]
    MissingBrokers,
}

/// Error type returned when building sinks from configuration.
#[derive(thiserror::Error, Debug)]
pub enum BackendBuildError {
    #[error("{0:?} backend is configured but its cargo feature is not enabled")]
    FeatureDisabled(BackendKind),

    #[error("failed to create {kind:?} sink: {source}")]
    Sink {
        kind: BackendKind,
        #[source]
        source: SinkError,
    },
}

/// Assemble a [`Dispatcher`] from a [`PipelineConfig`].
///
/// The console sink is always registered and doubles as the fallback that
/// reports broker publish failures. An unreachable remote logging service
/// is left out with a warning instead of failing start-up.
///
/// Must be called from within a Tokio runtime.
pub async fn build_dispatcher(config: &PipelineConfig) -> Result<Dispatcher, BackendBuildError> {
    let options = SinkOptions {
        queue_capacity: config.queue_capacity,
        overflow: config.overflow,
        ..SinkOptions::default()
    };

    let console = Arc::new(ConsoleSink::stdout().format(config.console_format));
    let mut builder = DispatcherBuilder::new(config.identity.clone()).sink_with(console.clone(), options.clone());

    if let Some(broker) = &config.broker {
        #[cfg(feature = "kafka")]
        {
            use crate::broker::BrokerSink;

            let sink = BrokerSink::kafka(broker)
                .map_err(|source| BackendBuildError::Sink {
                    kind: BackendKind::Broker,
                    source,
                })?
                .with_fallback(Arc::clone(&console));
            builder = builder.sink_with(Arc::new(sink), options.clone());
        }

        #[cfg(not(feature = "kafka"))]
        {
            let _ = broker; // silence unused warning when feature is disabled
            return Err(BackendBuildError::FeatureDisabled(BackendKind::Broker));
        }
    }

    if let Some(remote) = &config.remote {
        #[cfg(feature = "remote")]
        {
            use crate::remote::RemoteServiceSink;

            match RemoteServiceSink::http(remote).await {
                Ok(sink) => builder = builder.sink_with(Arc::new(sink), options.clone()),
                Err(SinkError::Unavailable(reason)) => {
                    tracing::warn!(
                        target: "log_fanout::backend",
                        url = %remote.url,
                        %reason,
                        "remote logging service unavailable, continuing without it"
                    );
                }
                Err(source) => {
                    return Err(BackendBuildError::Sink {
                        kind: BackendKind::RemoteService,
                        source,
                    })
                }
            }
        }

        #[cfg(not(feature = "remote"))]
        {
            let _ = remote;
            return Err(BackendBuildError::FeatureDisabled(BackendKind::RemoteService));
        }
    }

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_brokers_and_topic() {
        let cfg = parse_broker_dsn("kafka://k1:9092,k2:9092/cluster-logs").unwrap();
        assert_eq!(cfg.brokers, "k1:9092,k2:9092");
        assert_eq!(cfg.topic, "cluster-logs");
    }

    #[test]
    fn topic_defaults() {
        let cfg = parse_broker_dsn("KAFKA://localhost:9092").unwrap();
        assert_eq!(cfg.brokers, "localhost:9092");
        assert_eq!(cfg.topic, DEFAULT_TOPIC);
    }

    #[test]
    fn rejects_bad_dsns() {
        assert_eq!(parse_broker_dsn("amqp://host/topic"), Err(DsnError::UnknownScheme));
        assert_eq!(parse_broker_dsn("kafka:///topic"), Err(DsnError::MissingBrokers));
    }

    #[tokio::test]
    async fn console_only_without_backends() {
        let config = PipelineConfig::from_lookup(|_| None).unwrap();
        let dispatcher = build_dispatcher(&config).await.unwrap();
        let stats = dispatcher.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].sink, "console");
        dispatcher.shutdown(std::time::Duration::from_secs(1)).await.unwrap();
    }

    #[cfg(not(feature = "kafka"))]
    #[tokio::test]
    async fn broker_without_feature_is_an_error() {
        let mut config = PipelineConfig::from_lookup(|_| None).unwrap();
        config.broker = Some(parse_broker_dsn("kafka://localhost:9092/logs").unwrap());
        assert!(matches!(
            build_dispatcher(&config).await,
            Err(BackendBuildError::FeatureDisabled(BackendKind::Broker))
        ));
    }
}
