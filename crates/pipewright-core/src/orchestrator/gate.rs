//! Scoring gate applied to every state transition.
//!
//! A gate only produces a number. The state machine owns the policy that a
//! negative (or NaN) score rejects the transition.

use serde_json::{Map, Value};

use crate::models::{Finding, PipelineState};
use crate::query::analyzer::FindingCounts;

/// Snapshot handed to a gate for one attempted transition.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoringContext {
    pub from: PipelineState,
    pub to: PipelineState,
    pub round: u32,
    pub symbol: String,
    /// Score reported by the handler of the state being left, if any.
    pub round_score: Option<f64>,
    /// Most recent score from an earlier round.
    pub prior_score: Option<f64>,
    /// Fresh findings when `to` refreshes the graph, else empty.
    pub findings: Vec<Finding>,
    pub graph_refreshed: bool,
    /// The handler's `tools_metadata`.
    pub signals: Map<String, Value>,
}

impl ScoringContext {
    pub fn counts(&self) -> FindingCounts {
        FindingCounts::from_findings(&self.findings)
    }
}

pub trait ScoringGate: Send + Sync {
    fn score(&self, context: &ScoringContext) -> f64;
}

impl<F> ScoringGate for F
where
    F: Fn(&ScoringContext) -> f64 + Send + Sync,
{
    fn score(&self, context: &ScoringContext) -> f64 {
        self(context)
    }
}

/// True when `score` lets the transition through.
pub fn admits(score: f64) -> bool {
    score >= 0.0
}

/// Weighted penalty per finding, clamped at `floor`. With the default floor of
/// 0.0 it never rejects; a negative floor lets heavy findings block a transition.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeuristicGate {
    pub base: f64,
    pub unused_weight: f64,
    pub cycle_weight: f64,
    pub floor: f64,
}

impl Default for HeuristicGate {
    fn default() -> Self {
        Self {
            base: 1.0,
            unused_weight: 0.05,
            cycle_weight: 0.2,
            floor: 0.0,
        }
    }
}

impl ScoringGate for HeuristicGate {
    fn score(&self, context: &ScoringContext) -> f64 {
        let counts = context.counts();
        let penalty =
            self.unused_weight * counts.unused as f64 + self.cycle_weight * counts.cycles as f64;
        (self.base - penalty).max(self.floor)
    }
}
