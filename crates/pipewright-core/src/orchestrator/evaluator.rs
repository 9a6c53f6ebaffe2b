//! Final pass/fail scoring of a file's output against its original source.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::PipelineConfig;
use crate::indexer::pipeline::SymbolGraphBuilder;
use crate::query::analyzer::{FindingCounts, GraphAnalyzer};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: f64,
    pub passed: bool,
    pub evaluator_name: String,
    pub evaluator_version: String,
    pub diagnostics: Value,
}

pub trait Evaluator: Send + Sync {
    fn score(&self, original: &str, modified: &str) -> Evaluation;
}

pub const STATIC_EVALUATOR_NAME: &str = "static_graph";
pub const STATIC_EVALUATOR_VERSION: &str = "1";

const UNUSED_PENALTY: f64 = 0.05;
const UNUSED_PENALTY_CAP: f64 = 0.3;
const CYCLE_PENALTY: f64 = 0.2;
const CYCLE_PENALTY_CAP: f64 = 0.6;

/// Scores code by its structural findings. Unparsable code scores 0.0.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StaticEvaluator {
    pub pass_threshold: f64,
}

impl Default for StaticEvaluator {
    fn default() -> Self {
        Self { pass_threshold: 0.95 }
    }
}

fn counts_for(source: &str) -> Result<FindingCounts, String> {
    SymbolGraphBuilder::build_source("module", source, "module.py")
        .map(|graph| GraphAnalyzer::new(&graph).counts())
        .map_err(|e| e.to_string())
}

impl StaticEvaluator {
    pub fn new(pass_threshold: f64) -> Self {
        Self { pass_threshold }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.pass_threshold)
    }

    fn evaluation(&self, score: f64, diagnostics: Value) -> Evaluation {
        Evaluation {
            score,
            passed: score >= self.pass_threshold,
            evaluator_name: STATIC_EVALUATOR_NAME.to_string(),
            evaluator_version: STATIC_EVALUATOR_VERSION.to_string(),
            diagnostics,
        }
    }
}

impl Evaluator for StaticEvaluator {
    fn score(&self, original: &str, modified: &str) -> Evaluation {
        let counts = match counts_for(modified) {
            Ok(counts) => counts,
            Err(message) => return self.evaluation(0.0, json!({ "parse_error": message })),
        };
        let unused_penalty = (UNUSED_PENALTY * counts.unused as f64).min(UNUSED_PENALTY_CAP);
        let cycle_penalty = (CYCLE_PENALTY * counts.cycles as f64).min(CYCLE_PENALTY_CAP);
        let score = (1.0 - unused_penalty - cycle_penalty).max(0.0);

        let baseline = counts_for(original).ok();
        self.evaluation(
            score,
            json!({
                "unused": counts.unused,
                "cycles": counts.cycles,
                "original": baseline,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_code_passes() {
        let eval = StaticEvaluator::default().score("", "def main():\n    pass\n\nmain()\n");
        assert_eq!(eval.score, 1.0);
        assert!(eval.passed);
        assert_eq!(eval.evaluator_name, STATIC_EVALUATOR_NAME);
    }

    #[test]
    fn test_findings_reduce_score() {
        let modified = "import os\n\ndef a():\n    b()\n\ndef b():\n    a()\n";
        let eval = StaticEvaluator::default().score("import os\n", modified);
        assert!((eval.score - 0.75).abs() < 1e-9);
        assert!(!eval.passed);
        assert_eq!(eval.diagnostics["unused"], 1);
        assert_eq!(eval.diagnostics["cycles"], 1);
        assert_eq!(eval.diagnostics["original"]["unused"], 1);
    }

    #[test]
    fn test_configured_pass_threshold_decides_passed() {
        let modified = "import os\n\ndef main():\n    pass\n\nmain()\n";
        let baseline = StaticEvaluator::from_config(&PipelineConfig::default());
        assert_eq!(baseline.pass_threshold, 0.95);
        assert!((baseline.score("", modified).score - 0.95).abs() < 1e-9);

        let lenient = StaticEvaluator::from_config(&PipelineConfig {
            pass_threshold: 0.9,
            ..PipelineConfig::default()
        });
        assert!(lenient.score("", modified).passed);

        let demanding = StaticEvaluator::from_config(&PipelineConfig {
            pass_threshold: 0.99,
            ..PipelineConfig::default()
        });
        assert!(!demanding.score("", modified).passed);
    }

    #[test]
    fn test_unused_penalty_is_capped() {
        let modified: String = (0..20).map(|i| format!("import m{i}\n")).collect();
        let eval = StaticEvaluator::new(0.5).score("", &modified);
        assert!((eval.score - 0.7).abs() < 1e-9);
        assert!(eval.passed);
    }

    #[test]
    fn test_unparsable_code_scores_zero() {
        let eval = StaticEvaluator::default().score("def ok():\n    pass\n", "def broken(:\n");
        assert_eq!(eval.score, 0.0);
        assert!(!eval.passed);
        assert!(eval.diagnostics["parse_error"].is_string());
    }
}
