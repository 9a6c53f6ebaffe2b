//! Call-site resolution and call edges between definitions.
//!
//! Resolution is by name only. A direct call `f()` resolves to `f`, an
//! attribute call `a.b.f()` to its final segment `f`. Calls through computed
//! callees (`handlers[k]()`, `make()()`) are left unresolved. Edges connect a
//! definition to every definition whose bare name it calls, so overloaded or
//! shadowed names fan out to all candidates.

use std::collections::HashSet;

use indexmap::IndexMap;
use tree_sitter::Node;

use crate::indexer::parser::node_text;
use crate::indexer::pipeline::SymbolGraph;

// ---------------------------------------------------------------------------
// Call-site resolution
// ---------------------------------------------------------------------------

/// Resolved callee of a single call expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    /// Bare name or final attribute segment.
    pub name: String,
    /// Root identifier of an attribute callee (`os` in `os.path.join()`).
    pub receiver: Option<String>,
}

/// Resolve the callee of a `call` node, or `None` for dynamic callees.
pub fn resolve_callee(call: Node<'_>, source: &str) -> Option<CallTarget> {
    let function = call.child_by_field_name("function")?;
    match function.kind() {
        "identifier" => Some(CallTarget {
            name: node_text(function, source).to_string(),
            receiver: None,
        }),
        "attribute" => {
            let attribute = function.child_by_field_name("attribute")?;
            Some(CallTarget {
                name: node_text(attribute, source).to_string(),
                receiver: receiver_root(function, source),
            })
        }
        _ => None,
    }
}

/// Leftmost identifier of an attribute chain, if the chain starts with a name.
pub fn receiver_root(attribute: Node<'_>, source: &str) -> Option<String> {
    let mut current = attribute.child_by_field_name("object")?;
    loop {
        match current.kind() {
            "identifier" => return Some(node_text(current, source).to_string()),
            "attribute" => current = current.child_by_field_name("object")?,
            _ => return None,
        }
    }
}

// ---------------------------------------------------------------------------
// Definition edges
// ---------------------------------------------------------------------------

/// Bare name to qualified names, restricted to definition nodes.
pub fn definition_index(graph: &SymbolGraph) -> IndexMap<&str, Vec<&str>> {
    let mut index: IndexMap<&str, Vec<&str>> = IndexMap::new();
    for node in graph.nodes().filter(|n| n.kind.is_definition()) {
        index
            .entry(node.name.as_str())
            .or_default()
            .push(node.qualified_name.as_str());
    }
    index
}

/// Directed call edges among definitions, `caller -> callees`.
///
/// Every definition appears as a key, in graph order. Callee lists follow the
/// caller's call order and contain no duplicates.
pub fn call_edges(graph: &SymbolGraph) -> IndexMap<&str, Vec<&str>> {
    let index = definition_index(graph);
    let mut edges: IndexMap<&str, Vec<&str>> = IndexMap::new();
    for node in graph.nodes().filter(|n| n.kind.is_definition()) {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut targets = Vec::new();
        for called in &node.calls {
            if let Some(candidates) = index.get(called.as_str()) {
                for &target in candidates {
                    if seen.insert(target) {
                        targets.push(target);
                    }
                }
            }
        }
        edges.insert(node.qualified_name.as_str(), targets);
    }
    edges
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
