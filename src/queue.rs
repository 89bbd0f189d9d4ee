use crate::record::LogRecord;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// What a sink queue does with a record when it is already full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Reject the incoming record.
    #[default]
    DropNewest,
    /// Evict the oldest queued record to make room.
    DropOldest,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "drop_new" | "drop_newest" => Ok(OverflowPolicy::DropNewest),
            "drop_old" | "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            other => Err(format!("unknown overflow policy `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Push {
    Queued,
    /// Queued after evicting the oldest record.
    Displaced,
    /// Queue full, record dropped.
    Rejected,
    Closed,
}

struct QueueState {
    items: VecDeque<Arc<LogRecord>>,
    closed: bool,
}

/// Bounded FIFO between the dispatcher and one sink's workers. Pushing
/// never waits.
pub(crate) struct SinkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    policy: OverflowPolicy,
}

impl SinkQueue {
    pub(crate) fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        SinkQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(4096)),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            policy,
        }
    }

    pub(crate) fn push(&self, record: Arc<LogRecord>) -> Push {
        let outcome = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if state.closed {
                return Push::Closed;
            }
            if state.items.len() < self.capacity {
                state.items.push_back(record);
                Push::Queued
            } else {
                match self.policy {
                    OverflowPolicy::DropNewest => return Push::Rejected,
                    OverflowPolicy::DropOldest => {
                        state.items.pop_front();
                        state.items.push_back(record);
                        Push::Displaced
                    }
                }
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Next record in FIFO order. Returns `None` once the queue is closed
    /// and empty.
    pub(crate) async fn pop(&self) -> Option<Arc<LogRecord>> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
                if let Some(record) = state.items.pop_front() {
                    return Some(record);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stop accepting records; already queued ones are still handed out.
    pub(crate) fn close(&self) {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).closed = true;
        self.notify.notify_waiters();
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).items.len()
    }
}
