//! Pipewright core library.
//!
//! Two halves share this crate. The symbol graph engine parses Python source
//! with tree-sitter into qualified symbols and name-resolved call edges, then
//! reports unused symbols and call cycles. The pipeline orchestrator drives
//! each queued file through `START -> GENERATE -> ANALYZE -> MEDIATE -> PATCH
//! -> RECOMMEND -> END`, gating every transition on a score, stopping early
//! on convergence, and persisting the work queue so an interrupted run resumes
//! where it left off.

pub mod config;
pub mod errors;
pub mod indexer;
pub mod models;
pub mod orchestrator;
pub mod query;
pub mod store;

pub use config::{PipelineConfig, QueueDurability};
pub use errors::{HandlerError, PipelineError, PipelineResult};
pub use indexer::pipeline::{SymbolGraph, SymbolGraphBuilder};
pub use models::{Finding, PipelineState, QueueEntry, RoundResult, SymbolKind, SymbolNode};
pub use orchestrator::evaluator::{Evaluation, Evaluator, StaticEvaluator};
pub use orchestrator::gate::{HeuristicGate, ScoringContext, ScoringGate};
pub use orchestrator::handler::{StageContext, StageHandler, StageRegistry};
pub use orchestrator::runner::{RunSummary, WorkQueueRunner};
pub use orchestrator::snapshot::{SnapshotMetadata, SnapshotWriter};
pub use orchestrator::state_machine::{ConvergencePolicy, PipelineStateMachine, RunReport};
pub use query::analyzer::GraphAnalyzer;
pub use store::{LogSink, MemoryLogSink};
