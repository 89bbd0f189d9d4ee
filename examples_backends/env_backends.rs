use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, info_span};

use log_fanout::backend::build_dispatcher;
use log_fanout::config::PipelineConfig;
use log_fanout::context::{CallContext, REQUEST_ID_KEY};
use log_fanout::init::init_tracing;

/// Assemble the pipeline purely from environment variables:
///
/// ```bash
/// export SERVICE_NAME=cluster-service
/// export ENV=staging
/// export LOG_FANOUT_BROKER_DSN="kafka://localhost:9092/logs-topic"   # needs --features kafka
/// export LOG_FANOUT_REMOTE_URL="http://localhost:8080"
/// cargo run --example env_backends
/// ```
#[tokio::main]
async fn main() {
    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid logging configuration: {e}");
            return;
        }
    };

    let dispatcher = match build_dispatcher(&config).await {
        Ok(d) => Arc::new(d),
        Err(e) => {
            eprintln!("failed to build log pipeline: {e}");
            return;
        }
    };
    if let Err(e) = init_tracing(Arc::clone(&dispatcher)) {
        eprintln!("tracing already initialised: {e}");
    }

    // Explicit API.
    let ctx = CallContext::new().with(REQUEST_ID_KEY, "req-1");
    let _ = dispatcher.info("cluster created", None, &ctx);

    // Through `tracing`; the span carries the request id.
    let span = info_span!("request", request_id = "req-2", operation = "DeleteCluster");
    span.in_scope(|| {
        info!(cluster_id = "c-1", "deleting cluster");
        error!(cluster_id = "c-1", "cluster delete failed");
    });

    if let Err(e) = dispatcher.shutdown(Duration::from_secs(5)).await {
        eprintln!("log pipeline shutdown: {e}");
    }
}
