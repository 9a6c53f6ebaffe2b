//! Shared typed models used across the graph, orchestration, and storage layers.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Timestamp = DateTime<Utc>;

/// Label used as `run_id` on every log record of one round, e.g. `round-3-auth_service`.
pub fn run_label(round: u32, symbol: &str) -> String {
    format!("round-{round}-{symbol}")
}

// ---------------------------------------------------------------------------
// 1. Symbol graph nodes
// ---------------------------------------------------------------------------

/// Kind of a declared or imported entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    AsyncFunction,
    Class,
    Method,
    Variable,
    Import,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::AsyncFunction => "async_function",
            SymbolKind::Class => "class",
            SymbolKind::Method => "method",
            SymbolKind::Variable => "variable",
            SymbolKind::Import => "import",
        }
    }

    /// Function, async function, method, or class. Only these take part in
    /// call cycles and own call lists.
    pub fn is_definition(&self) -> bool {
        matches!(
            self,
            SymbolKind::Function | SymbolKind::AsyncFunction | SymbolKind::Class | SymbolKind::Method
        )
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source span, 1-based lines and 0-based columns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

/// One declared or imported entity in a symbol graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolNode {
    /// Bare name as bound in its scope (the alias for aliased imports).
    pub name: String,
    pub qualified_name: String,
    pub kind: SymbolKind,
    pub origin_file: String,
    pub span: Span,
    pub enclosing_scope: String,
    /// Callee names observed in the body, in source order. Bare names or the
    /// final attribute segment; never type-resolved.
    pub calls: Vec<String>,
    /// Non-call name uses: receivers of attribute calls, decorators, base classes.
    pub references: Vec<String>,
    pub import_target: Option<String>,
}

/// Module-level pseudo-scope: owns calls made outside any definition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleScope {
    pub module: String,
    pub origin_file: String,
    pub calls: Vec<String>,
    pub references: Vec<String>,
}

/// A source file the graph build could not use.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// 2. Findings
// ---------------------------------------------------------------------------

/// Structural observation derived from a symbol graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Finding {
    UnusedSymbol { qualified_name: String, reason: String },
    /// `cycle` has at least two entries and starts and ends on the same node.
    CircularDependency { cycle: Vec<String> },
}

impl Finding {
    pub fn is_unused(&self) -> bool {
        matches!(self, Finding::UnusedSymbol { .. })
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self, Finding::CircularDependency { .. })
    }
}

// ---------------------------------------------------------------------------
// 3. Pipeline states and transitions
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Start,
    Generate,
    Analyze,
    Mediate,
    Patch,
    Recommend,
    End,
}

impl PipelineState {
    pub const ALL: [PipelineState; 7] = [
        PipelineState::Start,
        PipelineState::Generate,
        PipelineState::Analyze,
        PipelineState::Mediate,
        PipelineState::Patch,
        PipelineState::Recommend,
        PipelineState::End,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Start => "START",
            PipelineState::Generate => "GENERATE",
            PipelineState::Analyze => "ANALYZE",
            PipelineState::Mediate => "MEDIATE",
            PipelineState::Patch => "PATCH",
            PipelineState::Recommend => "RECOMMEND",
            PipelineState::End => "END",
        }
    }

    /// The single successor in the linear transition table. `END` maps to itself.
    pub fn successor(&self) -> PipelineState {
        match self {
            PipelineState::Start => PipelineState::Generate,
            PipelineState::Generate => PipelineState::Analyze,
            PipelineState::Analyze => PipelineState::Mediate,
            PipelineState::Mediate => PipelineState::Patch,
            PipelineState::Patch => PipelineState::Recommend,
            PipelineState::Recommend => PipelineState::End,
            PipelineState::End => PipelineState::End,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == PipelineState::End
    }

    /// States that run a stage handler.
    pub fn is_stage(&self) -> bool {
        !matches!(self, PipelineState::Start | PipelineState::End)
    }

    /// Entering these states refreshes the symbol graph for the file.
    pub fn refreshes_graph(&self) -> bool {
        matches!(self, PipelineState::Analyze | PipelineState::Recommend)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    FirstRound,
    NormalSequence,
    MaxIterations,
    ThresholdMet,
}

impl TransitionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionReason::FirstRound => "first_round",
            TransitionReason::NormalSequence => "normal_sequence",
            TransitionReason::MaxIterations => "max_iterations reached",
            TransitionReason::ThresholdMet => "threshold met",
        }
    }
}

/// Why a file's round sequence ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    MaxIterations,
    ThresholdMet,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Completed => "completed",
            StopReason::MaxIterations => "max_iterations reached",
            StopReason::ThresholdMet => "threshold met",
        }
    }
}

impl From<StopReason> for TransitionReason {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::Completed => TransitionReason::NormalSequence,
            StopReason::MaxIterations => TransitionReason::MaxIterations,
            StopReason::ThresholdMet => TransitionReason::ThresholdMet,
        }
    }
}

/// Immutable record of one state transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub experiment_id: String,
    pub run_id: String,
    pub round: u32,
    pub from_state: PipelineState,
    pub to_state: PipelineState,
    pub reason: String,
    pub timestamp: Timestamp,
}

/// Output of one stage handler invocation. Lives for a single round.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub response: String,
    pub score: Option<f64>,
    pub tools_metadata: Map<String, Value>,
}

impl RoundResult {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Self::default()
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.tools_metadata.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// 4. Work queue
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueueEntry {
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
}

impl QueueEntry {
    pub fn new(source_path: impl Into<PathBuf>, destination_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            destination_path: destination_path.into(),
        }
    }

    /// File stem of the source, used as the round symbol.
    pub fn symbol(&self) -> String {
        self.source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// 5. Structured log records
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    State,
    StateTransition,
    Error,
    Evaluation,
    Experiment,
}

impl LogKind {
    pub const ALL: [LogKind; 5] = [
        LogKind::State,
        LogKind::StateTransition,
        LogKind::Error,
        LogKind::Evaluation,
        LogKind::Experiment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::State => "state",
            LogKind::StateTransition => "state_transition",
            LogKind::Error => "error",
            LogKind::Evaluation => "evaluation",
            LogKind::Experiment => "experiment",
        }
    }
}

/// Outcome of one state's execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateLog {
    pub experiment_id: String,
    pub run_id: String,
    pub system: String,
    pub round: u32,
    pub state: PipelineState,
    pub action: String,
    pub score: Option<f64>,
    pub details: Option<String>,
    pub timestamp: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorLog {
    pub experiment_id: String,
    pub run_id: String,
    pub round: u32,
    pub error_type: String,
    pub message: String,
    pub file_path: String,
    pub state: Option<PipelineState>,
    pub symbol: String,
    pub timestamp: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationLog {
    pub experiment_id: String,
    pub run_id: String,
    pub round: u32,
    pub symbol: String,
    #[serde(rename = "final")]
    pub is_final: bool,
    pub score: f64,
    pub passed: bool,
    pub evaluator_name: String,
    pub evaluator_version: String,
    pub diagnostics: Value,
    pub timestamp: Timestamp,
}

/// Per-file summary written once the round sequence ends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentLog {
    pub experiment_id: String,
    pub run_id: String,
    pub description: String,
    pub system: String,
    pub symbol: String,
    pub max_iterations: u32,
    pub stop_threshold: f64,
    pub rounds: u32,
    pub evaluator_name: Option<String>,
    pub evaluator_version: Option<String>,
    pub final_score: Option<f64>,
    pub passed: Option<bool>,
    pub reason_for_stop: String,
    pub start: Timestamp,
    pub stop: Timestamp,
}

/// One record accepted by a log sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    State(StateLog),
    StateTransition(TransitionRecord),
    Error(ErrorLog),
    Evaluation(EvaluationLog),
    Experiment(ExperimentLog),
}

impl LogRecord {
    pub fn kind(&self) -> LogKind {
        match self {
            LogRecord::State(_) => LogKind::State,
            LogRecord::StateTransition(_) => LogKind::StateTransition,
            LogRecord::Error(_) => LogKind::Error,
            LogRecord::Evaluation(_) => LogKind::Evaluation,
            LogRecord::Experiment(_) => LogKind::Experiment,
        }
    }

    pub fn experiment_id(&self) -> &str {
        match self {
            LogRecord::State(r) => &r.experiment_id,
            LogRecord::StateTransition(r) => &r.experiment_id,
            LogRecord::Error(r) => &r.experiment_id,
            LogRecord::Evaluation(r) => &r.experiment_id,
            LogRecord::Experiment(r) => &r.experiment_id,
        }
    }

    pub fn round(&self) -> u32 {
        match self {
            LogRecord::State(r) => r.round,
            LogRecord::StateTransition(r) => r.round,
            LogRecord::Error(r) => r.round,
            LogRecord::Evaluation(r) => r.round,
            LogRecord::Experiment(r) => r.rounds,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            LogRecord::State(r) => r.timestamp,
            LogRecord::StateTransition(r) => r.timestamp,
            LogRecord::Error(r) => r.timestamp,
            LogRecord::Evaluation(r) => r.timestamp,
            LogRecord::Experiment(r) => r.stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_table_is_linear_and_total() {
        let mut state = PipelineState::Start;
        let mut visited = vec![state];
        while !state.is_terminal() {
            state = state.successor();
            visited.push(state);
        }
        assert_eq!(visited, PipelineState::ALL.to_vec());
        assert_eq!(PipelineState::End.successor(), PipelineState::End);
    }

    #[test]
    fn test_stage_states_exclude_start_and_end() {
        let stages: Vec<_> = PipelineState::ALL.iter().filter(|s| s.is_stage()).collect();
        assert_eq!(stages.len(), 5);
        assert!(PipelineState::Analyze.refreshes_graph());
        assert!(PipelineState::Recommend.refreshes_graph());
        assert!(!PipelineState::Patch.refreshes_graph());
    }

    #[test]
    fn test_pipeline_state_serializes_upper_case() {
        let json = serde_json::to_string(&PipelineState::Recommend).unwrap();
        assert_eq!(json, "\"RECOMMEND\"");
    }

    #[test]
    fn test_finding_tagged_serialization() {
        let finding = Finding::CircularDependency {
            cycle: vec!["m.a".into(), "m.b".into(), "m.a".into()],
        };
        let value = serde_json::to_value(&finding).unwrap();
        assert_eq!(value["type"], "circular_dependency");
        assert_eq!(value["cycle"][2], "m.a");
    }

    #[test]
    fn test_queue_entry_symbol_is_file_stem() {
        let entry = QueueEntry::new("in/auth_service.py", "out/auth_service.py");
        assert_eq!(entry.symbol(), "auth_service");
    }

    #[test]
    fn test_evaluation_log_uses_final_key() {
        let log = EvaluationLog {
            experiment_id: "exp".into(),
            run_id: run_label(2, "mod"),
            round: 2,
            symbol: "mod".into(),
            is_final: true,
            score: 0.9,
            passed: false,
            evaluator_name: "static".into(),
            evaluator_version: "v1".into(),
            diagnostics: Value::Null,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(LogRecord::Evaluation(log)).unwrap();
        assert_eq!(value["kind"], "evaluation");
        assert_eq!(value["final"], true);
        assert_eq!(value["run_id"], "round-2-mod");
    }
}
