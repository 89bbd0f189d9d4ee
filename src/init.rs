use crate::dispatcher::Dispatcher;
use crate::layer::{FanoutLayer, INTERNAL_TARGET};
use crate::record::Level;
use std::sync::Arc;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, Registry};

/// Configuration of the `tracing` bridge.
///
/// **Fields**
/// - `min_level`: lowest `tracing` level forwarded to the dispatcher.
/// - `internal_diagnostics`: if `true`, a `fmt` layer prints the
///   pipeline's own warnings (dropped records, failed connects) to stderr.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub min_level: Level,
    pub internal_diagnostics: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            min_level: Level::Info,
            internal_diagnostics: true,
        }
    }
}

/// Install a global `tracing` subscriber that forwards events to
/// `dispatcher`.
///
/// **Parameters**
/// - `dispatcher`: shared [`Dispatcher`] that fans records out to sinks.
/// - `config`: [`LayerConfig`] for level filtering and diagnostics.
///
/// **Returns**
/// - `Err(..)` if a global subscriber is already installed.
pub fn init_tracing_with_config(dispatcher: Arc<Dispatcher>, config: LayerConfig) -> Result<(), SetGlobalDefaultError> {
    let layer = FanoutLayer::new(dispatcher, config.min_level);

    // The two subscriber shapes have different types, so each branch
    // installs its own.
    if config.internal_diagnostics {
        let diagnostics = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(filter_fn(|meta| meta.target().starts_with(INTERNAL_TARGET)));
        let subscriber = Registry::default().with(layer).with(diagnostics);
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)
    }
}

/// Initialize tracing with [`LayerConfig::default`].
pub fn init_tracing(dispatcher: Arc<Dispatcher>) -> Result<(), SetGlobalDefaultError> {
    init_tracing_with_config(dispatcher, LayerConfig::default())
}
