//! Structural findings over a built symbol graph.

use serde::Serialize;

use crate::indexer::pipeline::SymbolGraph;
use crate::models::Finding;
use crate::query::{cycles, unused};

/// Counts of each finding variant, used by gates and evaluators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FindingCounts {
    pub unused: usize,
    pub cycles: usize,
}

impl FindingCounts {
    pub fn from_findings(findings: &[Finding]) -> Self {
        findings.iter().fold(Self::default(), |mut counts, finding| {
            match finding {
                Finding::UnusedSymbol { .. } => counts.unused += 1,
                Finding::CircularDependency { .. } => counts.cycles += 1,
            }
            counts
        })
    }

    pub fn total(&self) -> usize {
        self.unused + self.cycles
    }
}

/// Read-only analysis view over one graph. Every call recomputes from the
/// graph; nothing is cached between calls.
pub struct GraphAnalyzer<'g> {
    graph: &'g SymbolGraph,
}

impl<'g> GraphAnalyzer<'g> {
    pub fn new(graph: &'g SymbolGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &'g SymbolGraph {
        self.graph
    }

    /// Unused-symbol findings followed by cycle findings.
    pub fn analyze(&self) -> Vec<Finding> {
        let mut findings = self.unused_symbols();
        findings.extend(self.circular_dependencies());
        findings
    }

    pub fn unused_symbols(&self) -> Vec<Finding> {
        unused::unused_symbols(self.graph)
    }

    pub fn circular_dependencies(&self) -> Vec<Finding> {
        cycles::circular_dependencies(self.graph)
    }

    pub fn counts(&self) -> FindingCounts {
        FindingCounts::from_findings(&self.analyze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::pipeline::SymbolGraphBuilder;

    #[test]
    fn test_analyze_orders_unused_before_cycles() {
        let graph = SymbolGraphBuilder::build_source(
            "module",
            "import os\n\ndef a():\n    b()\n\ndef b():\n    a()\n",
            "module.py",
        )
        .unwrap();
        let findings = GraphAnalyzer::new(&graph).analyze();
        assert_eq!(findings.len(), 2);
        assert!(findings[0].is_unused());
        assert!(findings[1].is_cycle());

        let counts = FindingCounts::from_findings(&findings);
        assert_eq!(counts, FindingCounts { unused: 1, cycles: 1 });
        assert_eq!(counts.total(), 2);
    }

    #[test]
    fn test_clean_module_has_no_findings() {
        let graph = SymbolGraphBuilder::build_source(
            "module",
            "import os\n\ndef main():\n    print(os.getcwd())\n\nmain()\n",
            "module.py",
        )
        .unwrap();
        assert_eq!(GraphAnalyzer::new(&graph).counts().total(), 0);
    }
}
