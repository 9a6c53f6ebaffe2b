//! Structured experiment log sinks.
//!
//! The orchestrator only writes; sinks never feed anything back into a run.

pub mod database;
pub mod jsonl;
pub mod memory;
pub mod schema;

use std::sync::Arc;

use crate::errors::PipelineResult;
use crate::models::LogRecord;

pub use database::SqliteLogSink;
pub use jsonl::JsonlLogSink;
pub use memory::MemoryLogSink;

/// Accepts one immutable log record at a time.
pub trait LogSink: Send + Sync {
    fn record(&self, record: &LogRecord) -> PipelineResult<()>;
}

impl<S: LogSink + ?Sized> LogSink for Arc<S> {
    fn record(&self, record: &LogRecord) -> PipelineResult<()> {
        (**self).record(record)
    }
}

/// Forwards every record to each inner sink in order, stopping at the first error.
#[derive(Default)]
pub struct FanoutLogSink {
    sinks: Vec<Box<dyn LogSink>>,
}

impl FanoutLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl LogSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl LogSink for FanoutLogSink {
    fn record(&self, record: &LogRecord) -> PipelineResult<()> {
        for sink in &self.sinks {
            sink.record(record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LogKind, PipelineState, TransitionRecord};
    use chrono::Utc;

    #[test]
    fn test_fanout_reaches_every_sink() {
        let first = Arc::new(MemoryLogSink::new());
        let second = Arc::new(MemoryLogSink::new());
        let fanout = FanoutLogSink::new().with(first.clone()).with(second.clone());
        assert_eq!(fanout.len(), 2);

        let record = LogRecord::StateTransition(TransitionRecord {
            experiment_id: "exp".into(),
            run_id: "round-1-m".into(),
            round: 1,
            from_state: PipelineState::Start,
            to_state: PipelineState::Generate,
            reason: "first_round".into(),
            timestamp: Utc::now(),
        });
        fanout.record(&record).unwrap();
        assert_eq!(first.of_kind(LogKind::StateTransition).len(), 1);
        assert_eq!(second.records(), vec![record]);
    }
}
