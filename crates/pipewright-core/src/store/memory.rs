//! In-process log sink.

use parking_lot::Mutex;

use crate::errors::PipelineResult;
use crate::models::{LogKind, LogRecord};
use crate::store::LogSink;

#[derive(Debug, Default)]
pub struct MemoryLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far, in arrival order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn of_kind(&self, kind: LogKind) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl LogSink for MemoryLogSink {
    fn record(&self, record: &LogRecord) -> PipelineResult<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
