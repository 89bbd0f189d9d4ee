use crate::context::CallContext;
use crate::error::{Delivery, PipelineError, SinkError};
use crate::queue::{OverflowPolicy, Push, SinkQueue};
use crate::record::{Fields, Level, LogRecord, RecordBuilder, ServiceIdentity};
use crate::sink::LogSink;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};

/// Records a sink queue holds before the overflow policy kicks in.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

const MIN_QUEUE_CAPACITY: usize = 16;
const MAX_WORKERS: usize = 64;

/// Added to a sink's [`LogSink::default_timeout`] before the worker
/// abandons a `send`.
pub const SEND_TIMEOUT_GRACE: Duration = Duration::from_millis(500);

/// Per-sink registration options.
///
/// **Fields**
/// - `queue_capacity`: bound of the sink's queue (at least 16).
/// - `workers`: concurrent `send` calls for this sink. With a single
///   worker the sink sees records strictly in emission order.
/// - `overflow`: what to drop when the queue is full.
/// - `min_level`: records below this level are not queued for the sink.
/// - `send_timeout`: hard budget per `send`; `None` falls back to
///   [`LogSink::default_timeout`] plus [`SEND_TIMEOUT_GRACE`].
#[derive(Debug, Clone)]
pub struct SinkOptions {
    pub queue_capacity: usize,
    pub workers: usize,
    pub overflow: OverflowPolicy,
    pub min_level: Level,
    pub send_timeout: Option<Duration>,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: 1,
            overflow: OverflowPolicy::default(),
            min_level: Level::Debug,
            send_timeout: None,
        }
    }
}

/// Live counters for one registered sink.
#[derive(Debug, Default)]
pub struct SinkStats {
    pub enqueued: AtomicU64,
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    /// Dropped by the overflow policy.
    pub dropped: AtomicU64,
    /// Skipped because of the severity filter.
    pub filtered: AtomicU64,
}

/// Point-in-time copy of [`SinkStats`], suitable for a health endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkStatsSnapshot {
    pub sink: String,
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
    pub filtered: u64,
    pub queued: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Running,
    Draining,
    Closed,
}

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const CLOSED: u8 = 2;

/// Outcome of [`Dispatcher::shutdown`], computed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Close failures in registration order.
    pub close_errors: Vec<PipelineError>,
    /// Workers still busy at the deadline were abandoned.
    pub abandoned_workers: bool,
    /// Records left in queues when the workers stopped.
    pub undelivered: usize,
}

impl ShutdownReport {
    pub fn first_error(&self) -> Option<&PipelineError> {
        self.close_errors.first()
    }

    fn result(&self) -> Result<(), PipelineError> {
        match self.first_error() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

struct SinkSlot {
    name: String,
    sink: Arc<dyn LogSink>,
    queue: Arc<SinkQueue>,
    stats: Arc<SinkStats>,
    min_level: Level,
}

/// Fans every record out to all registered sinks.
///
/// Each sink gets its own bounded queue and worker tasks, so a slow or
/// unreachable sink only ever loses its own records. The sink set is
/// fixed at construction.
pub struct Dispatcher {
    identity: Arc<ServiceIdentity>,
    slots: Vec<SinkSlot>,
    state: AtomicU8,
    workers: Mutex<Option<JoinSet<()>>>,
    shutdown: OnceCell<ShutdownReport>,
}

/// Collects sinks and their options before spawning workers.
pub struct DispatcherBuilder {
    identity: ServiceIdentity,
    entries: Vec<(Arc<dyn LogSink>, SinkOptions)>,
}

impl DispatcherBuilder {
    pub fn new(identity: ServiceIdentity) -> Self {
        DispatcherBuilder {
            identity,
            entries: Vec::new(),
        }
    }

    pub fn sink(self, sink: Arc<dyn LogSink>) -> Self {
        self.sink_with(sink, SinkOptions::default())
    }

    pub fn sink_with(mut self, sink: Arc<dyn LogSink>, options: SinkOptions) -> Self {
        self.entries.push((sink, options));
        self
    }

    /// Spawn the per-sink workers and start accepting records.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Dispatcher {
        let mut workers = JoinSet::new();
        let mut slots = Vec::with_capacity(self.entries.len());

        for (sink, options) in self.entries {
            let name = sink.name().to_string();
            let queue = Arc::new(SinkQueue::new(
                options.queue_capacity.max(MIN_QUEUE_CAPACITY),
                options.overflow,
            ));
            let stats = Arc::new(SinkStats::default());
            // A sink with its own budget reports its timeouts itself; the
            // worker only backstops it.
            let send_timeout = options
                .send_timeout
                .or_else(|| sink.default_timeout().map(|limit| limit + SEND_TIMEOUT_GRACE));

            for _ in 0..options.workers.clamp(1, MAX_WORKERS) {
                workers.spawn(run_worker(
                    name.clone(),
                    Arc::clone(&sink),
                    Arc::clone(&queue),
                    Arc::clone(&stats),
                    send_timeout,
                ));
            }

            slots.push(SinkSlot {
                name,
                sink,
                queue,
                stats,
                min_level: options.min_level,
            });
        }

        Dispatcher {
            identity: Arc::new(self.identity),
            slots,
            state: AtomicU8::new(RUNNING),
            workers: Mutex::new(Some(workers)),
            shutdown: OnceCell::new(),
        }
    }
}

impl Dispatcher {
    /// Build a dispatcher over `sinks` with default options.
    pub fn new(identity: ServiceIdentity, sinks: Vec<Arc<dyn LogSink>>) -> Self {
        sinks
            .into_iter()
            .fold(DispatcherBuilder::new(identity), DispatcherBuilder::sink)
            .build()
    }

    pub fn builder(identity: ServiceIdentity) -> DispatcherBuilder {
        DispatcherBuilder::new(identity)
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn state(&self) -> DispatcherState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => DispatcherState::Running,
            DRAINING => DispatcherState::Draining,
            _ => DispatcherState::Closed,
        }
    }

    /// Start a record carrying this dispatcher's service identity.
    pub fn record(&self, level: Level, message: impl Into<String>) -> RecordBuilder {
        LogRecord::builder(level, message).identity(Arc::clone(&self.identity))
    }

    /// Build a record and fan it out.
    ///
    /// **Returns**
    /// - `Ok(())` once the record is queued (or dropped by backpressure)
    ///   for every sink. Sink failures are never reported here.
    /// - `Err(PipelineError::InvalidRecord)` if `message` is empty.
    /// - `Err(PipelineError::DispatcherClosed)` after `shutdown` started.
    pub fn emit(
        &self,
        level: Level,
        message: impl Into<String>,
        fields: Option<Fields>,
        ctx: &CallContext,
    ) -> Result<(), PipelineError> {
        self.ensure_running()?;
        let record = self
            .record(level, message)
            .fields(fields.unwrap_or_default())
            .context(ctx)
            .build()?;
        self.emit_record(record)
    }

    pub fn debug(&self, message: impl Into<String>, fields: Option<Fields>, ctx: &CallContext) -> Result<(), PipelineError> {
        self.emit(Level::Debug, message, fields, ctx)
    }

    pub fn info(&self, message: impl Into<String>, fields: Option<Fields>, ctx: &CallContext) -> Result<(), PipelineError> {
        self.emit(Level::Info, message, fields, ctx)
    }

    pub fn warn(&self, message: impl Into<String>, fields: Option<Fields>, ctx: &CallContext) -> Result<(), PipelineError> {
        self.emit(Level::Warn, message, fields, ctx)
    }

    pub fn error(&self, message: impl Into<String>, fields: Option<Fields>, ctx: &CallContext) -> Result<(), PipelineError> {
        self.emit(Level::Error, message, fields, ctx)
    }

    /// Fan out an already-built record. Records built without an identity
    /// are stamped with this dispatcher's before any sink sees them.
    pub fn emit_record(&self, record: LogRecord) -> Result<(), PipelineError> {
        self.ensure_running()?;

        let record = if *record.identity() == ServiceIdentity::default() {
            record.stamped(Arc::clone(&self.identity))
        } else {
            record
        };
        let record = Arc::new(record);

        let mut closed = false;
        for slot in &self.slots {
            if record.level() < slot.min_level {
                slot.stats.filtered.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            match slot.queue.push(Arc::clone(&record)) {
                Push::Queued => {
                    slot.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                }
                Push::Displaced => {
                    slot.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                    slot.note_drop();
                }
                Push::Rejected => slot.note_drop(),
                Push::Closed => closed = true,
            }
        }

        if closed {
            return Err(PipelineError::DispatcherClosed);
        }
        Ok(())
    }

    pub fn stats(&self) -> Vec<SinkStatsSnapshot> {
        self.slots
            .iter()
            .map(|slot| SinkStatsSnapshot {
                sink: slot.name.clone(),
                enqueued: slot.stats.enqueued.load(Ordering::Relaxed),
                delivered: slot.stats.delivered.load(Ordering::Relaxed),
                failed: slot.stats.failed.load(Ordering::Relaxed),
                dropped: slot.stats.dropped.load(Ordering::Relaxed),
                filtered: slot.stats.filtered.load(Ordering::Relaxed),
                queued: slot.queue.len(),
            })
            .collect()
    }

    /// Stop accepting records, drain in-flight work until `limit` elapses,
    /// then close every sink in registration order.
    ///
    /// Sends and closes still running at the deadline are abandoned. The
    /// first close error is returned; the others are in
    /// [`Dispatcher::shutdown_report`]. Later calls return the same result
    /// without doing anything.
    pub async fn shutdown(&self, limit: Duration) -> Result<(), PipelineError> {
        self.shutdown
            .get_or_init(|| self.drain_and_close(limit))
            .await
            .result()
    }

    pub fn shutdown_report(&self) -> Option<&ShutdownReport> {
        self.shutdown.get()
    }

    fn ensure_running(&self) -> Result<(), PipelineError> {
        if self.state.load(Ordering::Acquire) == RUNNING {
            Ok(())
        } else {
            Err(PipelineError::DispatcherClosed)
        }
    }

    async fn drain_and_close(&self, limit: Duration) -> ShutdownReport {
        let deadline = Instant::now() + limit;
        self.state.store(DRAINING, Ordering::Release);
        for slot in &self.slots {
            slot.queue.close();
        }

        let workers = self.workers.lock().unwrap_or_else(|p| p.into_inner()).take();
        let mut abandoned_workers = false;
        if let Some(mut workers) = workers {
            let drained = timeout_at(deadline, async {
                while workers.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                abandoned_workers = true;
                workers.abort_all();
                tracing::warn!(target: "log_fanout::dispatcher", "shutdown deadline reached, abandoning in-flight sends");
            }
        }
        let undelivered = self.slots.iter().map(|slot| slot.queue.len()).sum();

        let mut close_errors = Vec::new();
        for slot in &self.slots {
            let reason = match timeout_at(deadline, slot.sink.close()).await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "close abandoned at shutdown deadline".to_string(),
            };
            close_errors.push(PipelineError::SinkClose {
                sink: slot.name.clone(),
                reason,
            });
        }

        self.state.store(CLOSED, Ordering::Release);
        ShutdownReport {
            close_errors,
            abandoned_workers,
            undelivered,
        }
    }
}

impl SinkSlot {
    fn note_drop(&self) {
        let prev = self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        if prev % 1024 == 0 {
            tracing::warn!(
                target: "log_fanout::dispatcher",
                sink = %self.name,
                dropped = prev + 1,
                "sink queue full, dropping log records"
            );
        }
    }
}

async fn run_worker(
    name: String,
    sink: Arc<dyn LogSink>,
    queue: Arc<SinkQueue>,
    stats: Arc<SinkStats>,
    send_timeout: Option<Duration>,
) {
    while let Some(record) = queue.pop().await {
        let outcome = match send_timeout {
            Some(limit) => match timeout(limit, sink.send(&record)).await {
                Ok(outcome) => outcome,
                Err(_) => Delivery::Failed(SinkError::Timeout(limit)),
            },
            None => sink.send(&record).await,
        };

        match outcome {
            Delivery::Delivered => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Delivery::Filtered => {
                stats.filtered.fetch_add(1, Ordering::Relaxed);
            }
            Delivery::Failed(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    target: "log_fanout::dispatcher",
                    sink = %name,
                    log_id = %record.id(),
                    error = %e,
                    "log delivery failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
        closes: AtomicU64,
    }

    #[async_trait]
    impl LogSink for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, record: &LogRecord) -> Delivery {
            self.seen.lock().unwrap().push(record.message().to_string());
            Delivery::Delivered
        }

        async fn close(&self) -> Result<(), SinkError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingClose(&'static str);

    #[async_trait]
    impl LogSink for FailingClose {
        fn name(&self) -> &str {
            self.0
        }

        async fn send(&self, _record: &LogRecord) -> Delivery {
            Delivery::Failed(SinkError::Transport("down".into()))
        }

        async fn close(&self) -> Result<(), SinkError> {
            Err(SinkError::Transport(format!("{} flush failed", self.0)))
        }
    }

    fn identity() -> ServiceIdentity {
        ServiceIdentity {
            service_name: "cluster-service".into(),
            environment: "test".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn state_moves_to_closed_and_rejects_emits() {
        let sink = Arc::new(Recording::default());
        let d = Dispatcher::new(identity(), vec![sink.clone() as Arc<dyn LogSink>]);
        assert_eq!(d.state(), DispatcherState::Running);
        d.info("started", None, &CallContext::new()).unwrap();

        d.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(d.state(), DispatcherState::Closed);
        assert_eq!(
            d.info("late", None, &CallContext::new()),
            Err(PipelineError::DispatcherClosed)
        );
        assert_eq!(*sink.seen.lock().unwrap(), vec!["started".to_string()]);
        assert_eq!(sink.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_record_is_reported_to_producer() {
        let d = Dispatcher::new(identity(), vec![]);
        assert!(matches!(
            d.emit(Level::Info, "", None, &CallContext::new()),
            Err(PipelineError::InvalidRecord(_))
        ));
    }

    #[tokio::test]
    async fn close_errors_are_collected_in_order() {
        let recording = Arc::new(Recording::default());
        let d = Dispatcher::builder(identity())
            .sink(Arc::new(FailingClose("broker")))
            .sink(recording.clone())
            .sink(Arc::new(FailingClose("remote")))
            .build();

        let err = d.shutdown(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(
            err,
            PipelineError::SinkClose {
                sink: "broker".into(),
                reason: "transport error: broker flush failed".into()
            }
        );
        let report = d.shutdown_report().unwrap();
        assert_eq!(report.close_errors.len(), 2);
        assert_eq!(recording.closes.load(Ordering::SeqCst), 1);

        // Second call replays the first result.
        assert_eq!(d.shutdown(Duration::from_secs(1)).await.unwrap_err(), err);
        assert_eq!(recording.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn severity_filter_and_identity_stamping() {
        let errors_only = Arc::new(Recording::default());
        let d = Dispatcher::builder(identity())
            .sink_with(
                errors_only.clone(),
                SinkOptions {
                    min_level: Level::Error,
                    ..SinkOptions::default()
                },
            )
            .build();

        d.info("fine", None, &CallContext::new()).unwrap();
        let bare = LogRecord::build(Level::Error, "broken", None, &CallContext::new()).unwrap();
        d.emit_record(bare).unwrap();
        d.shutdown(Duration::from_secs(1)).await.unwrap();

        assert_eq!(*errors_only.seen.lock().unwrap(), vec!["broken".to_string()]);
        let stats = &d.stats()[0];
        assert_eq!(stats.filtered, 1);
        assert_eq!(stats.delivered, 1);
    }
}
