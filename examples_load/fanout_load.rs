use std::sync::Arc;
use std::time::Instant;
use tokio::time::Duration;
use tracing::error;

use log_fanout::dispatcher::{Dispatcher, SinkOptions};
use log_fanout::init::{init_tracing_with_config, LayerConfig};
use log_fanout::noop_sink::NoopSink;
use log_fanout::record::{Level, ServiceIdentity};

#[tokio::main]
async fn main() {
    let identity = ServiceIdentity {
        service_name: "fanout-load".into(),
        environment: "bench".into(),
        ..ServiceIdentity::default()
    };
    let dispatcher = Arc::new(
        Dispatcher::builder(identity)
            .sink_with(
                Arc::new(NoopSink),
                SinkOptions {
                    queue_capacity: 50_000,
                    ..SinkOptions::default()
                },
            )
            .build(),
    );

    let layer_config = LayerConfig {
        min_level: Level::Info,
        internal_diagnostics: false,
    };
    if let Err(e) = init_tracing_with_config(Arc::clone(&dispatcher), layer_config) {
        eprintln!("tracing already initialised: {e}");
        return;
    }

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "fanout load test error");
    }

    let elapsed = start.elapsed();
    println!("fanout: emitted {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    if let Err(e) = dispatcher.shutdown(Duration::from_secs(2)).await {
        eprintln!("shutdown: {e}");
    }
    for stats in dispatcher.stats() {
        println!("{}: delivered={} dropped={}", stats.sink, stats.delivered, stats.dropped);
    }
}
