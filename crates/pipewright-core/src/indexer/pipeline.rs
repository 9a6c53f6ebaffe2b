//! Symbol graph construction with Rayon-based parallel extraction.
//!
//! Files are parsed independently on a worker pool, then merged in path
//! order into one graph so repeated builds over unchanged sources produce
//! identical node sets and call lists. Qualified names that collide across
//! files resolve last-write-wins. A file that fails to read or parse is
//! skipped with a warning and the build continues.

use std::path::{Path, PathBuf};
use std::time::Instant;

use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::errors::{PipelineError, PipelineResult};
use crate::indexer::filesystem::{iter_source_files, module_name_for};
use crate::indexer::parser::{parse_file, parse_source};
use crate::indexer::symbols::{extract_symbols, FileSymbols};
use crate::models::{ModuleScope, SkippedFile, SymbolKind, SymbolNode};

pub const DEFAULT_GRAPH_WORKERS: usize = 4;

// ---------------------------------------------------------------------------
// SymbolGraph
// ---------------------------------------------------------------------------

/// Qualified name to symbol node, plus the module pseudo-scopes. Immutable
/// once built; callers only get shared references.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SymbolGraph {
    nodes: IndexMap<String, SymbolNode>,
    modules: IndexMap<String, ModuleScope>,
    skipped: Vec<SkippedFile>,
}

impl SymbolGraph {
    fn merge(&mut self, file: FileSymbols) {
        for (qualified_name, node) in file.nodes {
            self.nodes.insert(qualified_name, node);
        }
        self.modules.insert(file.module, file.module_scope);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, qualified_name: &str) -> Option<&SymbolNode> {
        self.nodes.get(qualified_name)
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.nodes.contains_key(qualified_name)
    }

    /// Nodes in build order.
    pub fn nodes(&self) -> impl Iterator<Item = &SymbolNode> {
        self.nodes.values()
    }

    pub fn qualified_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleScope> {
        self.modules.values()
    }

    pub fn module(&self, name: &str) -> Option<&ModuleScope> {
        self.modules.get(name)
    }

    /// Files left out of the build, with the reason.
    pub fn skipped(&self) -> &[SkippedFile] {
        &self.skipped
    }

    pub fn symbols_in_file<'a>(&'a self, origin_file: &'a str) -> impl Iterator<Item = &'a SymbolNode> {
        self.nodes.values().filter(move |n| n.origin_file == origin_file)
    }

    pub fn find_by_kind(&self, kind: SymbolKind) -> impl Iterator<Item = &SymbolNode> {
        self.nodes.values().filter(move |n| n.kind == kind)
    }

    /// Best match for a bare name: the first candidate whose file contains
    /// `file_hint`, else the first candidate in build order.
    pub fn lookup(&self, name: &str, file_hint: Option<&str>) -> Option<&SymbolNode> {
        let mut candidates = self.nodes.values().filter(|n| n.name == name).peekable();
        let first = candidates.peek().copied();
        match file_hint {
            Some(hint) => candidates
                .find(|n| n.origin_file.contains(hint))
                .or(first),
            None => first,
        }
    }
}

// ---------------------------------------------------------------------------
// SymbolGraphBuilder
// ---------------------------------------------------------------------------

/// Builds a [`SymbolGraph`] from a single file or a directory tree.
#[derive(Clone, Debug)]
pub struct SymbolGraphBuilder {
    root: PathBuf,
    workers: usize,
}

type Extraction = Result<FileSymbols, SkippedFile>;

fn extract_file_worker(root: &Path, path: &Path) -> Extraction {
    let module = module_name_for(root, path);
    match parse_file(path) {
        Ok(unit) => Ok(extract_symbols(&unit, &module)),
        Err(e) => Err(SkippedFile {
            path: path.to_string_lossy().into_owned(),
            reason: match e {
                PipelineError::Parse { message, .. } => message,
                other => other.to_string(),
            },
        }),
    }
}

impl SymbolGraphBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            workers: DEFAULT_GRAPH_WORKERS,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build a fresh graph over every source file under the root.
    ///
    /// Fails only when the root does not exist; unparsable files are listed
    /// in [`SymbolGraph::skipped`].
    pub fn build(&self) -> PipelineResult<SymbolGraph> {
        let started = Instant::now();
        let files = iter_source_files(&self.root)?;
        let root = self.root.as_path();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers.max(1))
            .build();
        let extractions: Vec<Extraction> = match pool {
            Ok(pool) => pool.install(|| {
                files
                    .par_iter()
                    .map(|path| extract_file_worker(root, path))
                    .collect()
            }),
            Err(_) => {
                // Fallback to sequential
                files
                    .iter()
                    .map(|path| extract_file_worker(root, path))
                    .collect()
            }
        };

        let mut graph = SymbolGraph::default();
        for extraction in extractions {
            match extraction {
                Ok(file) => graph.merge(file),
                Err(skipped) => {
                    warn!("Failed to parse {}: {}", skipped.path, skipped.reason);
                    graph.skipped.push(skipped);
                }
            }
        }

        debug!(
            "Built symbol graph for {}: {} files, {} symbols, {} skipped in {}ms",
            self.root.display(),
            files.len(),
            graph.len(),
            graph.skipped.len(),
            started.elapsed().as_millis()
        );
        Ok(graph)
    }

    /// Build a graph from one in-memory source unit. Unlike [`Self::build`],
    /// a syntax error is returned to the caller.
    pub fn build_source(module: &str, source: &str, origin_file: &str) -> PipelineResult<SymbolGraph> {
        let unit = parse_source(source.to_string(), origin_file)?;
        let mut graph = SymbolGraph::default();
        graph.merge(extract_symbols(&unit, module));
        Ok(graph)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_single_file_module_is_stem() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("module.py");
        write(&file, "def f():\n    pass\n\nclass C:\n    def f(self):\n        pass\n");

        let graph = SymbolGraphBuilder::new(&file).build().unwrap();
        assert!(graph.contains("module.f"));
        assert!(graph.contains("module.C.f"));
        assert!(graph.contains("module.C"));
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_directory_modules_are_dotted_paths() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("pkg").join("a.py"), "def run():\n    pass\n");
        write(&dir.path().join("b.py"), "def run():\n    pass\n");

        let graph = SymbolGraphBuilder::new(dir.path()).build().unwrap();
        assert!(graph.contains("pkg.a.run"));
        assert!(graph.contains("b.run"));
        assert!(graph.module("pkg.a").is_some());
    }

    #[test]
    fn test_build_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..12 {
            write(
                &dir.path().join(format!("m{i}.py")),
                &format!("import os\n\ndef f{i}():\n    g()\n    os.getcwd()\n\ndef g():\n    f{i}()\n"),
            );
        }
        let builder = SymbolGraphBuilder::new(dir.path()).with_workers(4);
        let first = builder.build().unwrap();
        let second = builder.build().unwrap();
        assert_eq!(first, second);
        let names_a: Vec<_> = first.qualified_names().collect();
        let names_b: Vec<_> = second.qualified_names().collect();
        assert_eq!(names_a, names_b);
    }

    #[test]
    fn test_parse_failure_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("good.py"), "def ok():\n    pass\n");
        write(&dir.path().join("bad.py"), "def broken(:\n");

        let graph = SymbolGraphBuilder::new(dir.path()).build().unwrap();
        assert!(graph.contains("good.ok"));
        assert_eq!(graph.skipped().len(), 1);
        assert!(graph.skipped()[0].path.ends_with("bad.py"));
    }

    #[test]
    fn test_missing_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SymbolGraphBuilder::new(dir.path().join("absent")).build().unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput(_)));
    }

    #[test]
    fn test_build_source_surfaces_syntax_errors() {
        let err = SymbolGraphBuilder::build_source("m", "class :\n", "m.py").unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }

    #[test]
    fn test_lookup_prefers_file_hint() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("alpha.py"), "def shared():\n    pass\n");
        write(&dir.path().join("beta.py"), "def shared():\n    pass\n");
        let graph = SymbolGraphBuilder::new(dir.path()).build().unwrap();

        assert_eq!(graph.lookup("shared", None).unwrap().qualified_name, "alpha.shared");
        assert_eq!(
            graph.lookup("shared", Some("beta")).unwrap().qualified_name,
            "beta.shared"
        );
        assert_eq!(
            graph.lookup("shared", Some("gamma")).unwrap().qualified_name,
            "alpha.shared"
        );
        assert!(graph.lookup("absent", None).is_none());
    }

    #[test]
    fn test_find_by_kind_and_file() {
        let graph = SymbolGraphBuilder::build_source(
            "svc",
            "import json\nclass Svc:\n    def go(self):\n        pass\n",
            "svc.py",
        )
        .unwrap();
        assert_eq!(graph.find_by_kind(SymbolKind::Import).count(), 1);
        assert_eq!(graph.find_by_kind(SymbolKind::Method).count(), 1);
        assert_eq!(graph.symbols_in_file("svc.py").count(), 3);
    }
}
