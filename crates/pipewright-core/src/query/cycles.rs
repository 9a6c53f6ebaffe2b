//! Circular call dependency detection.
//!
//! Depth-first search over definition call edges with an explicit frame
//! stack, started once from every node. A node still on the active path when
//! reached again closes a cycle, reported as the path slice from that node's
//! first occurrence back to itself. Each traversal keeps its own visited set,
//! so an edge into a node finished by another start is still followed. The
//! same cycle found from different starts is reported once, keyed by its
//! [`normalize_cycle`] rotation.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::indexer::callgraph::call_edges;
use crate::indexer::pipeline::SymbolGraph;
use crate::models::Finding;

/// Every distinct cycle in `edges`, in discovery order. A self-loop yields
/// a two-element cycle `[f, f]`.
pub fn find_cycles(edges: &IndexMap<&str, Vec<&str>>) -> Vec<Vec<String>> {
    let mut cycles = Vec::new();
    let mut seen: HashSet<Vec<String>> = HashSet::new();

    for &start in edges.keys() {
        let mut visited: HashSet<&str> = HashSet::from([start]);
        let mut frames: Vec<(&str, usize)> = vec![(start, 0)];
        let mut path: Vec<&str> = vec![start];
        let mut on_path: HashMap<&str, usize> = HashMap::from([(start, 0)]);

        while let Some(frame) = frames.last_mut() {
            let node = frame.0;
            let targets = edges.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if frame.1 < targets.len() {
                let next = targets[frame.1];
                frame.1 += 1;
                if let Some(&position) = on_path.get(next) {
                    let mut cycle: Vec<String> =
                        path[position..].iter().map(|s| s.to_string()).collect();
                    cycle.push(next.to_string());
                    if seen.insert(normalize_cycle(&cycle)) {
                        cycles.push(cycle);
                    }
                } else if visited.insert(next) {
                    on_path.insert(next, path.len());
                    path.push(next);
                    frames.push((next, 0));
                }
            } else {
                frames.pop();
                path.pop();
                on_path.remove(node);
            }
        }
    }
    cycles
}

/// `CircularDependency` findings among function, method, and class nodes.
pub fn circular_dependencies(graph: &SymbolGraph) -> Vec<Finding> {
    let edges = call_edges(graph);
    find_cycles(&edges)
        .into_iter()
        .map(|cycle| Finding::CircularDependency { cycle })
        .collect()
}

/// Rotate a closed cycle so it starts at its lexicographically smallest member.
pub fn normalize_cycle(cycle: &[String]) -> Vec<String> {
    if cycle.len() < 2 {
        return cycle.to_vec();
    }
    let open = &cycle[..cycle.len() - 1];
    let min_idx = open
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut normalized = Vec::with_capacity(cycle.len());
    normalized.extend_from_slice(&open[min_idx..]);
    normalized.extend_from_slice(&open[..min_idx]);
    normalized.push(open[min_idx].clone());
    normalized
}

/// Drop cycle findings that are rotations of one already kept.
pub fn dedupe_cycles(findings: Vec<Finding>) -> Vec<Finding> {
    let mut seen: HashSet<Vec<String>> = HashSet::new();
    findings
        .into_iter()
        .filter(|finding| match finding {
            Finding::CircularDependency { cycle } => seen.insert(normalize_cycle(cycle)),
            _ => true,
        })
        .collect()
}
