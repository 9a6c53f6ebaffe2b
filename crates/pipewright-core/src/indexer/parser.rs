//! Python parsing wrapper used by extraction passes.
//!
//! Uses the native tree-sitter Python grammar. tree-sitter recovers from
//! syntax errors, so a tree containing error or missing nodes is reported as a
//! parse failure; callers treat that file as unparsable.

use std::path::Path;

use tree_sitter::{Node, Parser, Tree};

use crate::errors::{PipelineError, PipelineResult};

/// Parsed source unit: the tree plus the source it borrows positions from.
#[derive(Debug)]
pub struct ParsedUnit {
    pub path: String,
    pub source: String,
    pub tree: Tree,
}

impl ParsedUnit {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }
}

fn new_parser(path: &str) -> PipelineResult<Parser> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| PipelineError::Parse {
            path: path.to_string(),
            message: format!("failed to load Python grammar: {e}"),
        })?;
    Ok(parser)
}

/// Parse in-memory Python source. `path` is only used for diagnostics.
pub fn parse_source(source: String, path: &str) -> PipelineResult<ParsedUnit> {
    let mut parser = new_parser(path)?;
    let tree = parser
        .parse(source.as_bytes(), None)
        .ok_or_else(|| PipelineError::Parse {
            path: path.to_string(),
            message: "parser produced no tree".to_string(),
        })?;

    let root = tree.root_node();
    if root.has_error() {
        let line = first_error_line(root).unwrap_or(1);
        return Err(PipelineError::Parse {
            path: path.to_string(),
            message: format!("invalid syntax near line {line}"),
        });
    }

    Ok(ParsedUnit {
        path: path.to_string(),
        source,
        tree,
    })
}

/// Read and parse a Python file.
pub fn parse_file(path: &Path) -> PipelineResult<ParsedUnit> {
    let display = path.to_string_lossy().into_owned();
    let source = std::fs::read_to_string(path).map_err(|e| PipelineError::Parse {
        path: display.clone(),
        message: format!("failed to read: {e}"),
    })?;
    parse_source(source, &display)
}

/// 1-based line of the first error or missing node, depth first.
fn first_error_line(node: Node<'_>) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row + 1);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            if let Some(line) = first_error_line(child) {
                return Some(line);
            }
        }
    }
    None
}

/// UTF-8 text of a node, empty when the slice is not valid UTF-8.
pub fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_source() {
        let unit = parse_source("def f():\n    return 1\n".to_string(), "m.py").unwrap();
        assert_eq!(unit.root().kind(), "module");
        assert_eq!(unit.path, "m.py");
    }

    #[test]
    fn test_parse_syntax_error_reports_line() {
        let err = parse_source("x = 1\ndef broken(:\n".to_string(), "bad.py").unwrap_err();
        match err {
            PipelineError::Parse { path, message } => {
                assert_eq!(path, "bad.py");
                assert!(message.contains("invalid syntax"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_file_missing_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_file(&dir.path().join("missing.py")).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }

    #[test]
    fn test_node_text() {
        let unit = parse_source("answer = 42\n".to_string(), "m.py").unwrap();
        let stmt = unit.root().named_child(0).unwrap();
        assert_eq!(node_text(stmt, &unit.source), "answer = 42");
    }
}
