//! Unused-symbol detection over a symbol graph.
//!
//! A definition or import is unused when its bare name never shows up as a
//! called or referenced name anywhere in the graph. Name-based only: symbols
//! reached through dynamic dispatch or re-export are reported too.

use indexmap::IndexMap;

use crate::indexer::pipeline::SymbolGraph;
use crate::models::{Finding, SymbolKind, SymbolNode};

/// Called or referenced name to the scopes that use it (qualified names of
/// definitions, or module names for module-level uses).
pub fn reverse_call_index(graph: &SymbolGraph) -> IndexMap<&str, Vec<&str>> {
    let mut index: IndexMap<&str, Vec<&str>> = IndexMap::new();
    for node in graph.nodes() {
        for name in node.calls.iter().chain(node.references.iter()) {
            let callers = index.entry(name.as_str()).or_default();
            if !callers.contains(&node.qualified_name.as_str()) {
                callers.push(node.qualified_name.as_str());
            }
        }
    }
    for scope in graph.modules() {
        for name in scope.calls.iter().chain(scope.references.iter()) {
            let callers = index.entry(name.as_str()).or_default();
            if !callers.contains(&scope.module.as_str()) {
                callers.push(scope.module.as_str());
            }
        }
    }
    index
}

fn unused_reason(node: &SymbolNode) -> String {
    match node.kind {
        SymbolKind::Import => format!(
            "import '{}' of '{}' is never referenced",
            node.name,
            node.import_target.as_deref().unwrap_or(&node.name)
        ),
        kind => format!("{kind} '{}' has no callers", node.name),
    }
}

/// `UnusedSymbol` findings for every import and definition without a user, in graph order.
pub fn unused_symbols(graph: &SymbolGraph) -> Vec<Finding> {
    let index = reverse_call_index(graph);
    graph
        .nodes()
        .filter(|n| n.kind == SymbolKind::Import || n.kind.is_definition())
        .filter(|n| !index.contains_key(n.name.as_str()))
        .map(|n| Finding::UnusedSymbol {
            qualified_name: n.qualified_name.clone(),
            reason: unused_reason(n),
        })
        .collect()
}
