pub mod error;
pub mod context;
pub mod record;
pub mod wire;
pub mod sink;
pub mod queue;
pub mod dispatcher;

pub mod console;
pub mod broker;
pub mod remote;
pub mod backoff;

#[cfg(feature = "kafka")]
pub mod kafka;

#[cfg(feature = "remote")]
pub mod http;

pub mod layer;
pub mod init;
pub mod noop_sink;

pub mod env;
pub mod config;
pub mod backend;

pub use context::CallContext;
pub use dispatcher::{Dispatcher, DispatcherBuilder, SinkOptions};
pub use error::{Delivery, PipelineError, SinkError};
pub use record::{Fields, Level, LogRecord, ServiceIdentity};
pub use sink::LogSink;
