#![allow(dead_code)]

use async_trait::async_trait;
use log_fanout::{Delivery, LogRecord, LogSink, ServiceIdentity};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Cloneable in-memory writer for console output.
#[derive(Clone, Default)]
pub struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Buffer {
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Keeps every record it receives, in arrival order.
#[derive(Default)]
pub struct RecordingSink {
    pub records: Mutex<Vec<LogRecord>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.message().to_string())
            .collect()
    }
}

#[async_trait]
impl LogSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, record: &LogRecord) -> Delivery {
        self.records.lock().unwrap().push(record.clone());
        Delivery::Delivered
    }
}

/// A sink whose `send` never completes.
pub struct HangingSink;

#[async_trait]
impl LogSink for HangingSink {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn send(&self, _record: &LogRecord) -> Delivery {
        std::future::pending().await
    }
}

pub fn identity() -> ServiceIdentity {
    ServiceIdentity {
        service_name: "cluster-service".into(),
        service_version: "1.0.0".into(),
        environment: "test".into(),
        hostname: "test-host".into(),
        instance_id: "instance-1".into(),
    }
}
