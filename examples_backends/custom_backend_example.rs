use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};
use log_fanout::{
    console::ConsoleSink,
    dispatcher::Dispatcher,
    error::Delivery,
    init::init_tracing,
    record::{LogRecord, ServiceIdentity},
    sink::LogSink,
};

/// Example of integrating a completely custom backend by implementing
/// the `LogSink` trait directly. Imagine this talks to some
/// proprietary DB for which this crate does not provide a built-in
/// sink.
struct MyCustomDbSink;

#[async_trait]
impl LogSink for MyCustomDbSink {
    fn name(&self) -> &str {
        "my-custom-db"
    }

    async fn send(&self, record: &LogRecord) -> Delivery {
        // Here you would call your own client library for the target DB.
        println!("[my-custom-db] {} {} {:?}", record.level(), record.message(), record.fields());
        Delivery::Delivered
    }
}

#[tokio::main]
async fn main() {
    let identity = ServiceIdentity {
        service_name: "custom-backend-example".into(),
        ..ServiceIdentity::default()
    };
    let sinks: Vec<Arc<dyn LogSink>> = vec![Arc::new(ConsoleSink::stdout()), Arc::new(MyCustomDbSink)];
    let dispatcher = Arc::new(Dispatcher::new(identity, sinks));

    if let Err(e) = init_tracing(Arc::clone(&dispatcher)) {
        eprintln!("tracing already initialised: {e}");
    }

    info!("custom backend example started");
    error!(db = "my-custom-db", "simulated error sent via custom backend");

    let _ = dispatcher.shutdown(Duration::from_secs(1)).await;
}
