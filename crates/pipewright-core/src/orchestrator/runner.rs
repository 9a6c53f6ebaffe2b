//! Drives the durable work queue, one state machine run per file.
//!
//! A persisted queue file means a previous run was interrupted; it is loaded
//! verbatim and work resumes at its head, ignoring the input root. Otherwise
//! the queue is built from the input root and persisted before any file runs.
//! The queue file is deleted once every entry has been handled.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};

use crate::config::{PipelineConfig, QueueDurability};
use crate::errors::{PipelineError, PipelineResult};
use crate::indexer::filesystem::enumerate_queue_entries;
use crate::models::QueueEntry;
use crate::orchestrator::evaluator::{Evaluator, StaticEvaluator};
use crate::orchestrator::gate::{HeuristicGate, ScoringGate};
use crate::orchestrator::handler::StageRegistry;
use crate::orchestrator::queue::WorkQueue;
use crate::orchestrator::snapshot::SnapshotWriter;
use crate::orchestrator::state_machine::{PipelineStateMachine, RunReport};
use crate::store::LogSink;

/// A file whose rounds were abandoned by a gate rejection or handler error.
#[derive(Clone, Debug, PartialEq)]
pub struct FileFailure {
    pub entry: QueueEntry,
    pub error_type: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    /// True when the run picked up a persisted queue.
    pub resumed: bool,
    pub completed: Vec<RunReport>,
    pub failed: Vec<FileFailure>,
    /// Entries still queued when the run returned.
    pub remaining: usize,
}

impl RunSummary {
    pub fn processed(&self) -> usize {
        self.completed.len() + self.failed.len()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.completed.iter().map(|r| r.entry.symbol()).collect()
    }
}

pub struct WorkQueueRunner {
    config: PipelineConfig,
    registry: StageRegistry,
    gate: Box<dyn ScoringGate>,
    sink: Arc<dyn LogSink>,
    evaluator: Option<Box<dyn Evaluator>>,
    snapshots: Option<SnapshotWriter>,
}

impl WorkQueueRunner {
    /// Runner with the heuristic gate, a [`StaticEvaluator`] using the
    /// configured pass threshold, and snapshots under the run's snapshot dir.
    pub fn new(config: PipelineConfig, registry: StageRegistry, sink: Arc<dyn LogSink>) -> Self {
        let evaluator: Box<dyn Evaluator> = Box::new(StaticEvaluator::from_config(&config));
        let snapshots = SnapshotWriter::new(config.snapshot_dir());
        Self {
            config,
            registry,
            gate: Box::new(HeuristicGate::default()),
            sink,
            evaluator: Some(evaluator),
            snapshots: Some(snapshots),
        }
    }

    pub fn with_gate(mut self, gate: impl ScoringGate + 'static) -> Self {
        self.gate = Box::new(gate);
        self
    }

    pub fn with_evaluator(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.evaluator = Some(Box::new(evaluator));
        self
    }

    pub fn without_evaluator(mut self) -> Self {
        self.evaluator = None;
        self
    }

    pub fn without_snapshots(mut self) -> Self {
        self.snapshots = None;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load the persisted queue, or enumerate `input` into a new one.
    pub fn open_queue(&self, input: &Path, output: &Path) -> PipelineResult<(WorkQueue, bool)> {
        let queue_path = self.config.queue_path();
        if WorkQueue::exists(&queue_path) {
            let queue = WorkQueue::load(&queue_path)?;
            info!(
                "Resuming from {} with {} pending files",
                queue_path.display(),
                queue.len()
            );
            return Ok((queue, true));
        }
        let entries = enumerate_queue_entries(
            input,
            output,
            self.config.recursive,
            &self.config.exclude_patterns,
        )?;
        let queue = WorkQueue::create(&queue_path, entries)?;
        info!(
            "Queued {} files from {} into {}",
            queue.len(),
            input.display(),
            queue_path.display()
        );
        Ok((queue, false))
    }

    pub fn run(&self, input: &Path, output: &Path) -> PipelineResult<RunSummary> {
        self.config.validate()?;
        let (mut queue, resumed) = self.open_queue(input, output)?;
        let mut summary = RunSummary {
            resumed,
            ..RunSummary::default()
        };

        while !queue.is_empty() {
            if self
                .config
                .max_files_per_run
                .is_some_and(|limit| summary.processed() >= limit)
            {
                info!("File limit reached; {} files left in queue", queue.len());
                break;
            }
            let Some(entry) = queue.pop_front() else {
                break;
            };
            if self.config.durability == QueueDurability::AtMostOnce {
                queue.persist()?;
            }

            match self.run_file(entry.clone()) {
                Ok(report) => {
                    info!(
                        "Finished {} after {} rounds ({})",
                        entry.source_path.display(),
                        report.rounds,
                        report.stop_reason.as_str()
                    );
                    summary.completed.push(report);
                }
                Err(e) if e.is_round_fatal() => {
                    error!("Abandoned {}: {}", entry.source_path.display(), e);
                    let halt = self.config.halt_on_handler_error
                        && matches!(e, PipelineError::Handler { .. });
                    summary.failed.push(FileFailure {
                        entry,
                        error_type: e.kind().to_string(),
                        message: e.to_string(),
                    });
                    if halt {
                        queue.persist()?;
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }

            if self.config.durability == QueueDurability::AtLeastOnce {
                queue.persist()?;
            }
        }

        summary.remaining = queue.len();
        if queue.is_empty() {
            queue.remove_file()?;
            info!("Work queue drained; removed {}", queue.path().display());
        }
        Ok(summary)
    }

    fn run_file(&self, entry: QueueEntry) -> PipelineResult<RunReport> {
        let mut machine = PipelineStateMachine::new(
            &self.config,
            &self.registry,
            self.gate.as_ref(),
            self.sink.as_ref(),
            entry,
        );
        if let Some(evaluator) = self.evaluator.as_deref() {
            machine = machine.with_evaluator(evaluator);
        }
        if let Some(writer) = self.snapshots.as_ref() {
            machine = machine.with_snapshots(writer);
        }
        machine.run()
    }
}
