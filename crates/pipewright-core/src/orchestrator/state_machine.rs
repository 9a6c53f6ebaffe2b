//! Per-file pipeline state machine.
//!
//! One machine drives one queue entry from `START` to `END`. Each call to
//! [`PipelineStateMachine::step`] runs the current state's handler, logs the
//! round, decides the next state (the linear successor, or `END` when the
//! convergence policy fires), asks the scoring gate, and only then records
//! the transition and moves. Any failure leaves the current state untouched.

use std::fs;
use std::path::Path;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::errors::{PipelineError, PipelineResult};
use crate::indexer::filesystem::{compute_content_hash, hash_bytes};
use crate::indexer::pipeline::SymbolGraphBuilder;
use crate::models::{
    run_label, ErrorLog, EvaluationLog, ExperimentLog, Finding, LogRecord, PipelineState,
    QueueEntry, RoundResult, StateLog, StopReason, Timestamp, TransitionReason, TransitionRecord,
};
use crate::orchestrator::evaluator::{Evaluation, Evaluator};
use crate::orchestrator::footer::{write_with_footer, FooterMetadata};
use crate::orchestrator::gate::{admits, ScoringContext, ScoringGate};
use crate::orchestrator::handler::{StageContext, StageRegistry};
use crate::orchestrator::snapshot::{SnapshotMetadata, SnapshotWriter};
use crate::query::analyzer::GraphAnalyzer;
use crate::store::LogSink;

// ---------------------------------------------------------------------------
// Convergence
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConvergencePolicy {
    pub max_iterations: u32,
    pub stop_threshold: f64,
}

impl ConvergencePolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            stop_threshold: config.stop_threshold,
        }
    }

    /// Reason to force `END` after `round` produced `score`, if any.
    /// The iteration cap is checked first.
    pub fn check(&self, round: u32, score: Option<f64>) -> Option<StopReason> {
        if round >= self.max_iterations {
            return Some(StopReason::MaxIterations);
        }
        if score.is_some_and(|s| s >= self.stop_threshold) {
            return Some(StopReason::ThresholdMet);
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// Outcome of driving one file to `END`.
#[derive(Clone, Debug, PartialEq)]
pub struct RunReport {
    pub entry: QueueEntry,
    pub rounds: u32,
    pub stop_reason: StopReason,
    pub history: Vec<TransitionRecord>,
    pub final_evaluation: Option<Evaluation>,
    /// SHA-256 of the destination file, when one was written.
    pub output_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// PipelineStateMachine
// ---------------------------------------------------------------------------

pub struct PipelineStateMachine<'a> {
    config: &'a PipelineConfig,
    registry: &'a StageRegistry,
    gate: &'a dyn ScoringGate,
    sink: &'a dyn LogSink,
    evaluator: Option<&'a dyn Evaluator>,
    snapshots: Option<&'a SnapshotWriter>,
    policy: ConvergencePolicy,
    entry: QueueEntry,
    symbol: String,
    state: PipelineState,
    round: u32,
    history: Vec<TransitionRecord>,
    last_score: Option<f64>,
    stop_reason: Option<StopReason>,
    final_evaluation: Option<Evaluation>,
    started: Timestamp,
}

impl<'a> PipelineStateMachine<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        registry: &'a StageRegistry,
        gate: &'a dyn ScoringGate,
        sink: &'a dyn LogSink,
        entry: QueueEntry,
    ) -> Self {
        let symbol = entry.symbol();
        Self {
            config,
            registry,
            gate,
            sink,
            evaluator: None,
            snapshots: None,
            policy: ConvergencePolicy::from_config(config),
            entry,
            symbol,
            state: PipelineState::Start,
            round: 1,
            history: Vec::new(),
            last_score: None,
            stop_reason: None,
            final_evaluation: None,
            started: Utc::now(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: &'a dyn Evaluator) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Snapshot every written round and the final output under `writer`.
    pub fn with_snapshots(mut self, writer: &'a SnapshotWriter) -> Self {
        self.snapshots = Some(writer);
        self
    }

    pub fn current_state(&self) -> PipelineState {
        self.state
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    pub fn last_score(&self) -> Option<f64> {
        self.last_score
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Step until `END`. The first failing step ends the run with its error.
    pub fn run(mut self) -> PipelineResult<RunReport> {
        while !self.state.is_terminal() {
            self.step()?;
        }
        let output_hash = if self.entry.destination_path.is_file() {
            Some(compute_content_hash(&self.entry.destination_path)?)
        } else {
            None
        };
        Ok(RunReport {
            entry: self.entry,
            rounds: self.round,
            stop_reason: self.stop_reason.unwrap_or(StopReason::Completed),
            history: self.history,
            final_evaluation: self.final_evaluation,
            output_hash,
        })
    }

    /// Execute the current state and attempt one transition. Returns the new
    /// state. On error an `ErrorLog` is recorded and the state is unchanged.
    pub fn step(&mut self) -> PipelineResult<PipelineState> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }
        let run_id = run_label(self.round, &self.symbol);
        match self.advance(&run_id) {
            Ok(state) => Ok(state),
            Err(e) => {
                if e.is_round_fatal() {
                    error!("Round {} of {} failed: {}", self.round, self.symbol, e);
                }
                self.record_error(&e, &run_id);
                Err(e)
            }
        }
    }

    fn advance(&mut self, run_id: &str) -> PipelineResult<PipelineState> {
        let from = self.state;

        // 1. run the state
        let result = self.execute(from, run_id)?;
        let written = if result.response.is_empty() {
            None
        } else {
            Some(self.write_output(&result, run_id)?)
        };
        self.sink.record(&LogRecord::State(StateLog {
            experiment_id: self.config.experiment_id.clone(),
            run_id: run_id.to_string(),
            system: self.config.system.clone(),
            round: self.round,
            state: from,
            action: self.action_for(from).to_string(),
            score: result.score,
            details: written.as_deref().map(|text| {
                format!(
                    "wrote {} sha256:{}",
                    self.entry.destination_path.display(),
                    hash_bytes(text.as_bytes())
                )
            }),
            timestamp: Utc::now(),
        }))?;
        if let Some(text) = written.as_deref() {
            let original = self.read_source();
            let evaluation = self.evaluate_round(&original, text, run_id)?;
            self.snapshot(from, &original, text, evaluation, run_id, false)?;
        }

        // 2. pick the successor
        let forced = self.policy.check(self.round, result.score);
        let to = if forced.is_some() {
            PipelineState::End
        } else {
            from.successor()
        };

        // 3. gate
        let findings = if to.refreshes_graph() {
            Some(self.refresh_findings()?)
        } else {
            None
        };
        let context = ScoringContext {
            from,
            to,
            round: self.round,
            symbol: self.symbol.clone(),
            round_score: result.score,
            prior_score: self.last_score,
            graph_refreshed: findings.is_some(),
            findings: findings.unwrap_or_default(),
            signals: result.tools_metadata,
        };
        let gate_score = self.gate.score(&context);
        if !admits(gate_score) {
            return Err(PipelineError::GateRejected {
                from,
                to,
                round: self.round,
                score: gate_score,
            });
        }

        // 4. commit
        let reason = match forced {
            Some(stop) => TransitionReason::from(stop),
            None if from == PipelineState::Start => TransitionReason::FirstRound,
            None => TransitionReason::NormalSequence,
        };
        let record = TransitionRecord {
            experiment_id: self.config.experiment_id.clone(),
            run_id: run_id.to_string(),
            round: self.round,
            from_state: from,
            to_state: to,
            reason: reason.as_str().to_string(),
            timestamp: Utc::now(),
        };
        self.sink.record(&LogRecord::StateTransition(record.clone()))?;
        info!(
            "{}: {} -> {} in round {} ({})",
            self.symbol,
            from,
            to,
            self.round,
            reason.as_str()
        );
        self.history.push(record);
        if result.score.is_some() {
            self.last_score = result.score;
        }
        self.state = to;

        if to.is_terminal() {
            self.stop_reason = Some(forced.unwrap_or(StopReason::Completed));
            self.finish(run_id)?;
        } else {
            self.round += 1;
        }
        Ok(to)
    }

    fn action_for(&self, state: PipelineState) -> &'static str {
        if !state.is_stage() {
            "enter"
        } else if self.registry.is_bound(state) {
            "run_handler"
        } else {
            "pass_through"
        }
    }

    fn execute(&self, state: PipelineState, run_id: &str) -> PipelineResult<RoundResult> {
        let handler = match (state.is_stage(), self.registry.get(state)) {
            (true, Some(handler)) => handler,
            (true, None) => {
                debug!("No handler bound for {state}; passing through");
                return Ok(RoundResult::default());
            }
            (false, _) => return Ok(RoundResult::default()),
        };
        let context = StageContext {
            symbol: self.symbol.clone(),
            file_path: self.entry.source_path.clone(),
            output_path: self.entry.destination_path.clone(),
            experiment_id: self.config.experiment_id.clone(),
            run_id: run_id.to_string(),
            round: self.round,
            system: self.config.system.clone(),
            state,
        };
        handler.run(&context).map_err(|e| PipelineError::Handler {
            state,
            symbol: self.symbol.clone(),
            message: e.to_string(),
        })
    }

    fn write_output(&self, result: &RoundResult, run_id: &str) -> PipelineResult<String> {
        let meta = FooterMetadata {
            system: self.config.system.clone(),
            experiment_id: self.config.experiment_id.clone(),
            run_id: run_id.to_string(),
            file_path: self.entry.source_path.display().to_string(),
            date: Utc::now(),
        };
        write_with_footer(&self.entry.destination_path, &result.response, &meta)
    }

    /// File the graph is built from: the output once one exists, else the source.
    fn analysis_target(&self) -> &Path {
        if self.entry.destination_path.is_file() {
            &self.entry.destination_path
        } else {
            &self.entry.source_path
        }
    }

    fn refresh_findings(&self) -> PipelineResult<Vec<Finding>> {
        let graph = SymbolGraphBuilder::new(self.analysis_target())
            .with_workers(self.config.graph_workers)
            .build()?;
        Ok(GraphAnalyzer::new(&graph).analyze())
    }

    fn read_source(&self) -> String {
        fs::read_to_string(&self.entry.source_path).unwrap_or_else(|e| {
            warn!("Could not read {}: {}", self.entry.source_path.display(), e);
            String::new()
        })
    }

    fn evaluate_round(&self, original: &str, modified: &str, run_id: &str) -> PipelineResult<Option<Evaluation>> {
        let Some(evaluator) = self.evaluator else {
            return Ok(None);
        };
        let evaluation = evaluator.score(original, modified);
        self.record_evaluation(&evaluation, run_id, false)?;
        Ok(Some(evaluation))
    }

    fn snapshot(
        &self,
        state: PipelineState,
        original: &str,
        annotated: &str,
        evaluation: Option<Evaluation>,
        run_id: &str,
        is_final: bool,
    ) -> PipelineResult<()> {
        let Some(writer) = self.snapshots else {
            return Ok(());
        };
        let meta = SnapshotMetadata {
            experiment_id: self.config.experiment_id.clone(),
            run_id: run_id.to_string(),
            round: self.round,
            state,
            is_final,
            timestamp: Utc::now(),
            evaluation,
        };
        writer.write(&self.symbol, original, annotated, &meta)?;
        Ok(())
    }

    fn record_evaluation(&self, evaluation: &Evaluation, run_id: &str, is_final: bool) -> PipelineResult<()> {
        self.sink.record(&LogRecord::Evaluation(EvaluationLog {
            experiment_id: self.config.experiment_id.clone(),
            run_id: run_id.to_string(),
            round: self.round,
            symbol: self.symbol.clone(),
            is_final,
            score: evaluation.score,
            passed: evaluation.passed,
            evaluator_name: evaluation.evaluator_name.clone(),
            evaluator_version: evaluation.evaluator_version.clone(),
            diagnostics: evaluation.diagnostics.clone(),
            timestamp: Utc::now(),
        }))
    }

    /// Final evaluation and experiment summary once `END` is reached.
    fn finish(&mut self, run_id: &str) -> PipelineResult<()> {
        let original = self.read_source();
        let modified = fs::read_to_string(self.analysis_target()).unwrap_or_else(|_| original.clone());
        if let Some(evaluator) = self.evaluator {
            let evaluation = evaluator.score(&original, &modified);
            self.record_evaluation(&evaluation, run_id, true)?;
            self.final_evaluation = Some(evaluation);
        }
        self.snapshot(
            PipelineState::End,
            &original,
            &modified,
            self.final_evaluation.clone(),
            run_id,
            true,
        )?;
        let reason = self.stop_reason.unwrap_or(StopReason::Completed);
        self.sink.record(&LogRecord::Experiment(ExperimentLog {
            experiment_id: self.config.experiment_id.clone(),
            run_id: self.config.run_id.clone(),
            description: self.config.description.clone(),
            system: self.config.system.clone(),
            symbol: self.symbol.clone(),
            max_iterations: self.config.max_iterations,
            stop_threshold: self.config.stop_threshold,
            rounds: self.round,
            evaluator_name: self.final_evaluation.as_ref().map(|e| e.evaluator_name.clone()),
            evaluator_version: self
                .final_evaluation
                .as_ref()
                .map(|e| e.evaluator_version.clone()),
            final_score: self.final_evaluation.as_ref().map(|e| e.score).or(self.last_score),
            passed: self.final_evaluation.as_ref().map(|e| e.passed),
            reason_for_stop: reason.as_str().to_string(),
            start: self.started,
            stop: Utc::now(),
        }))
    }

    fn record_error(&self, err: &PipelineError, run_id: &str) {
        let record = LogRecord::Error(ErrorLog {
            experiment_id: self.config.experiment_id.clone(),
            run_id: run_id.to_string(),
            round: self.round,
            error_type: err.kind().to_string(),
            message: err.to_string(),
            file_path: self.entry.source_path.display().to_string(),
            state: Some(self.state),
            symbol: self.symbol.clone(),
            timestamp: Utc::now(),
        });
        if let Err(sink_err) = self.sink.record(&record) {
            warn!("Failed to record error log for {}: {}", self.symbol, sink_err);
        }
    }

    pub fn entry(&self) -> &QueueEntry {
        &self.entry
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::HandlerError;
    use crate::models::LogKind;
    use crate::orchestrator::evaluator::StaticEvaluator;
    use crate::orchestrator::footer::FOOTER_MARKER;
    use crate::orchestrator::gate::HeuristicGate;
    use crate::store::memory::MemoryLogSink;
    use serde_json::json;

    struct Fixture {
        _dir: tempfile::TempDir,
        entry: QueueEntry,
    }

    fn fixture(source: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in").join("auth.py");
        fs::create_dir_all(src.parent().unwrap()).unwrap();
        fs::write(&src, source).unwrap();
        let entry = QueueEntry::new(&src, dir.path().join("out").join("auth.py"));
        Fixture { _dir: dir, entry }
    }

    fn config(max_iterations: u32, stop_threshold: f64) -> PipelineConfig {
        PipelineConfig {
            max_iterations,
            stop_threshold,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_negative_gate_aborts_and_keeps_state() {
        let fx = fixture("def f():\n    pass\n");
        let cfg = config(10, 1.0);
        let registry = StageRegistry::new();
        let gate = |ctx: &ScoringContext| if ctx.to == PipelineState::Analyze { -0.1 } else { 1.0 };
        let sink = MemoryLogSink::new();
        let mut machine = PipelineStateMachine::new(&cfg, &registry, &gate, &sink, fx.entry.clone());

        assert_eq!(machine.step().unwrap(), PipelineState::Generate);
        let err = machine.step().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::GateRejected { from: PipelineState::Generate, to: PipelineState::Analyze, .. }
        ));
        assert_eq!(machine.current_state(), PipelineState::Generate);
        assert_eq!(machine.history().len(), 1);

        let errors = sink.of_kind(LogKind::Error);
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            LogRecord::Error(log) => {
                assert_eq!(log.error_type, "GateRejected");
                assert_eq!(log.state, Some(PipelineState::Generate));
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn test_max_iterations_forces_end() {
        let fx = fixture("def f():\n    pass\n");
        let cfg = config(3, 1.0);
        let registry = StageRegistry::new();
        let gate = HeuristicGate::default();
        let sink = MemoryLogSink::new();

        let report = PipelineStateMachine::new(&cfg, &registry, &gate, &sink, fx.entry.clone())
            .run()
            .unwrap();
        assert_eq!(report.stop_reason, StopReason::MaxIterations);
        assert_eq!(report.rounds, 3);
        let states: Vec<_> = report.history.iter().map(|t| t.to_state).collect();
        assert_eq!(
            states,
            vec![PipelineState::Generate, PipelineState::Analyze, PipelineState::End]
        );
        assert_eq!(report.history[0].reason, "first_round");
        assert_eq!(report.history[1].reason, "normal_sequence");
        assert_eq!(report.history[2].reason, "max_iterations reached");
        assert_eq!(sink.of_kind(LogKind::Experiment).len(), 1);
    }

    #[test]
    fn test_threshold_forces_end_early() {
        let fx = fixture("def f():\n    pass\n");
        let cfg = config(10, 0.9);
        let registry = StageRegistry::new()
            .with(PipelineState::Generate, |_: &StageContext| -> Result<RoundResult, HandlerError> {
                Ok(RoundResult::default().with_score(0.95))
            })
            .unwrap();
        let gate = HeuristicGate::default();
        let sink = MemoryLogSink::new();

        let report = PipelineStateMachine::new(&cfg, &registry, &gate, &sink, fx.entry.clone())
            .run()
            .unwrap();
        assert_eq!(report.stop_reason, StopReason::ThresholdMet);
        assert_eq!(report.rounds, 2);
        let last = report.history.last().unwrap();
        assert_eq!(last.from_state, PipelineState::Generate);
        assert_eq!(last.to_state, PipelineState::End);
        assert_eq!(last.reason, "threshold met");
    }

    #[test]
    fn test_iteration_cap_wins_when_threshold_met_same_round() {
        let fx = fixture("def f():\n    pass\n");
        let cfg = config(2, 0.9);
        let registry = StageRegistry::new()
            .with(PipelineState::Generate, |_: &StageContext| -> Result<RoundResult, HandlerError> {
                Ok(RoundResult::default().with_score(0.95))
            })
            .unwrap();
        let gate = HeuristicGate::default();
        let sink = MemoryLogSink::new();

        let report = PipelineStateMachine::new(&cfg, &registry, &gate, &sink, fx.entry.clone())
            .run()
            .unwrap();
        assert_eq!(report.rounds, 2);
        assert_eq!(report.stop_reason, StopReason::MaxIterations);
        assert_eq!(report.history.last().unwrap().reason, "max_iterations reached");
    }

    #[test]
    fn test_full_linear_sequence_without_convergence() {
        let fx = fixture("def f():\n    pass\n");
        let cfg = config(100, 1.0);
        let registry = StageRegistry::new();
        let gate = HeuristicGate::default();
        let sink = MemoryLogSink::new();

        let report = PipelineStateMachine::new(&cfg, &registry, &gate, &sink, fx.entry.clone())
            .run()
            .unwrap();
        assert_eq!(report.stop_reason, StopReason::Completed);
        assert_eq!(report.history.len(), 6);
        assert_eq!(report.history.last().unwrap().reason, "normal_sequence");
        assert_eq!(sink.of_kind(LogKind::State).len(), 6);
    }

    #[test]
    fn test_handler_error_is_logged_and_raised() {
        let fx = fixture("def f():\n    pass\n");
        let cfg = config(10, 1.0);
        let registry = StageRegistry::new()
            .with(PipelineState::Generate, |_: &StageContext| -> Result<RoundResult, HandlerError> {
                Err("model unavailable".into())
            })
            .unwrap();
        let gate = HeuristicGate::default();
        let sink = MemoryLogSink::new();
        let mut machine = PipelineStateMachine::new(&cfg, &registry, &gate, &sink, fx.entry.clone());

        machine.step().unwrap();
        let err = machine.step().unwrap_err();
        match &err {
            PipelineError::Handler { state, symbol, message } => {
                assert_eq!(*state, PipelineState::Generate);
                assert_eq!(symbol, "auth");
                assert!(message.contains("model unavailable"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(machine.current_state(), PipelineState::Generate);
        assert_eq!(sink.of_kind(LogKind::Error).len(), 1);
    }

    #[test]
    fn test_response_written_with_footer_and_evaluated() {
        let fx = fixture("import os\n\ndef f():\n    pass\n");
        let cfg = config(3, 1.0);
        let registry = StageRegistry::new()
            .with(PipelineState::Generate, |ctx: &StageContext| -> Result<RoundResult, HandlerError> {
                assert_eq!(ctx.run_id, "round-2-auth");
                Ok(RoundResult::new("def f():\n    pass\n\nf()\n").with_metadata("tool", json!("fmt")))
            })
            .unwrap();
        let gate = HeuristicGate::default();
        let sink = MemoryLogSink::new();
        let evaluator = StaticEvaluator::default();

        let report = PipelineStateMachine::new(&cfg, &registry, &gate, &sink, fx.entry.clone())
            .with_evaluator(&evaluator)
            .run()
            .unwrap();

        let written = fs::read_to_string(&fx.entry.destination_path).unwrap();
        assert!(written.contains(FOOTER_MARKER));
        assert_eq!(report.output_hash.as_deref(), Some(hash_bytes(written.as_bytes()).as_str()));
        let details = match &sink.of_kind(LogKind::State)[1] {
            LogRecord::State(log) => log.details.clone().unwrap(),
            other => panic!("unexpected record {other:?}"),
        };
        assert!(details.ends_with(&hash_bytes(written.as_bytes())));
        assert!(written.contains("# run_id: round-2-auth"));

        let evaluations = sink.of_kind(LogKind::Evaluation);
        assert_eq!(evaluations.len(), 2);
        let finals: Vec<bool> = evaluations
            .iter()
            .map(|r| match r {
                LogRecord::Evaluation(e) => e.is_final,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(finals, vec![false, true]);
        assert_eq!(report.final_evaluation.unwrap().score, 1.0);
    }

    #[test]
    fn test_snapshots_written_per_round_and_at_end() {
        use crate::orchestrator::snapshot::{ANNOTATED_FILE, FINAL_DIR, ORIGINAL_FILE};

        let fx = fixture("import os\n\ndef f():\n    pass\n");
        let cfg = config(3, 1.0);
        let registry = StageRegistry::new()
            .with(PipelineState::Generate, |_: &StageContext| -> Result<RoundResult, HandlerError> {
                Ok(RoundResult::new("def f():\n    pass\n\nf()\n"))
            })
            .unwrap();
        let gate = HeuristicGate::default();
        let sink = MemoryLogSink::new();
        let evaluator = StaticEvaluator::default();
        let snapshot_root = fx._dir.path().join("snapshots");
        let writer = SnapshotWriter::new(&snapshot_root);

        PipelineStateMachine::new(&cfg, &registry, &gate, &sink, fx.entry.clone())
            .with_evaluator(&evaluator)
            .with_snapshots(&writer)
            .run()
            .unwrap();

        let round_dir = snapshot_root.join("round_2").join("auth");
        assert_eq!(
            fs::read_to_string(round_dir.join(ORIGINAL_FILE)).unwrap(),
            "import os\n\ndef f():\n    pass\n"
        );
        assert!(fs::read_to_string(round_dir.join(ANNOTATED_FILE)).unwrap().contains(FOOTER_MARKER));
        let round_meta = SnapshotWriter::read_metadata(&round_dir).unwrap();
        assert_eq!(round_meta.state, PipelineState::Generate);
        assert_eq!(round_meta.run_id, "round-2-auth");
        assert!(!round_meta.is_final);
        assert_eq!(round_meta.evaluation.unwrap().score, 1.0);

        // Only GENERATE produced output, so no other round has a snapshot.
        assert!(!snapshot_root.join("round_1").exists());
        assert!(!snapshot_root.join("round_3").exists());

        let final_dir = snapshot_root.join(FINAL_DIR).join("auth");
        let final_meta = SnapshotWriter::read_metadata(&final_dir).unwrap();
        assert!(final_meta.is_final);
        assert_eq!(final_meta.state, PipelineState::End);
        assert_eq!(final_meta.round, 3);
        assert_eq!(
            fs::read_to_string(final_dir.join(ANNOTATED_FILE)).unwrap(),
            fs::read_to_string(&fx.entry.destination_path).unwrap()
        );
    }

    #[test]
    fn test_gate_sees_fresh_findings_on_analyze() {
        let fx = fixture("import os\n\ndef a():\n    b()\n\ndef b():\n    a()\n");
        let cfg = config(10, 1.0);
        let registry = StageRegistry::new();
        let seen = parking_lot::Mutex::new(Vec::new());
        let gate = |ctx: &ScoringContext| {
            seen.lock().push((ctx.to, ctx.graph_refreshed, ctx.findings.len()));
            1.0
        };
        let sink = MemoryLogSink::new();
        PipelineStateMachine::new(&cfg, &registry, &gate, &sink, fx.entry.clone())
            .run()
            .unwrap();

        let seen = seen.into_inner();
        assert_eq!(seen[0], (PipelineState::Generate, false, 0));
        assert_eq!(seen[1], (PipelineState::Analyze, true, 2));
        assert_eq!(seen[4], (PipelineState::Recommend, true, 2));
    }

    #[test]
    fn test_convergence_policy_prefers_iteration_cap() {
        let policy = ConvergencePolicy { max_iterations: 2, stop_threshold: 0.9 };
        assert_eq!(policy.check(1, Some(0.5)), None);
        assert_eq!(policy.check(1, Some(0.95)), Some(StopReason::ThresholdMet));
        assert_eq!(policy.check(2, Some(0.95)), Some(StopReason::MaxIterations));
        assert_eq!(policy.check(2, None), Some(StopReason::MaxIterations));
    }
}
