//! Symbol extraction from parsed Python source.
//!
//! One pass over the syntax tree records every function, async function,
//! class, method, simple-name variable, and imported name, qualified by the
//! module name and the chain of enclosing definitions. The scope chain is an
//! explicit stack threaded through the recursive visit, so extraction keeps
//! no state between files and independent builds never share it.
//!
//! Call sites are attributed to the innermost enclosing definition, or to the
//! module pseudo-scope when there is none. Callee names come from
//! [`crate::indexer::callgraph::resolve_callee`] and are never type-resolved.

use indexmap::IndexMap;
use tree_sitter::Node;

use crate::indexer::callgraph::{receiver_root, resolve_callee};
use crate::indexer::parser::{node_text, ParsedUnit};
use crate::models::{ModuleScope, Span, SymbolKind, SymbolNode};

// ---------------------------------------------------------------------------
// Extracted types
// ---------------------------------------------------------------------------

/// Everything extracted from one source file.
#[derive(Clone, Debug, Default)]
pub struct FileSymbols {
    pub module: String,
    pub origin_file: String,
    /// Insertion-ordered; re-declaring a name in the same scope replaces the value.
    pub nodes: IndexMap<String, SymbolNode>,
    pub module_scope: ModuleScope,
}

/// One enclosing definition on the scope stack.
#[derive(Clone, Debug)]
struct ScopeFrame {
    qualified_name: String,
    kind: SymbolKind,
}

type ScopeStack = Vec<ScopeFrame>;

/// Receivers that name the current instance or class rather than a symbol.
const IMPLICIT_RECEIVERS: &[&str] = &["self", "cls"];

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn span_of(node: Node<'_>) -> Span {
    let start = node.start_position();
    let end = node.end_position();
    Span {
        start_line: start.row as u32 + 1,
        start_column: start.column as u32,
        end_line: end.row as u32 + 1,
        end_column: end.column as u32,
    }
}

fn is_async_definition(node: Node<'_>) -> bool {
    node.child(0).map(|c| c.kind() == "async").unwrap_or(false)
}

/// Join a module-relative import source and an imported name.
fn join_target(module: &str, name: &str) -> String {
    if module.is_empty() {
        name.to_string()
    } else if module.ends_with('.') {
        format!("{module}{name}")
    } else {
        format!("{module}.{name}")
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

struct Extractor<'a> {
    source: &'a str,
    module: &'a str,
    origin_file: &'a str,
    nodes: IndexMap<String, SymbolNode>,
    module_scope: ModuleScope,
}

impl<'a> Extractor<'a> {
    fn qualify(&self, scopes: &ScopeStack, name: &str) -> String {
        let parent = self.enclosing_scope(scopes);
        if parent.is_empty() {
            name.to_string()
        } else {
            format!("{parent}.{name}")
        }
    }

    fn enclosing_scope(&self, scopes: &ScopeStack) -> String {
        scopes
            .last()
            .map(|frame| frame.qualified_name.clone())
            .unwrap_or_else(|| self.module.to_string())
    }

    fn record(&mut self, scopes: &ScopeStack, name: &str, kind: SymbolKind, node: Node<'_>) -> String {
        let qualified_name = self.qualify(scopes, name);
        let symbol = SymbolNode {
            name: name.to_string(),
            qualified_name: qualified_name.clone(),
            kind,
            origin_file: self.origin_file.to_string(),
            span: span_of(node),
            enclosing_scope: self.enclosing_scope(scopes),
            calls: Vec::new(),
            references: Vec::new(),
            import_target: None,
        };
        self.nodes.insert(qualified_name.clone(), symbol);
        qualified_name
    }

    fn push_call(&mut self, scopes: &ScopeStack, name: String) {
        match scopes.last() {
            Some(frame) => {
                if let Some(owner) = self.nodes.get_mut(&frame.qualified_name) {
                    owner.calls.push(name);
                }
            }
            None => self.module_scope.calls.push(name),
        }
    }

    fn push_reference(&mut self, scopes: &ScopeStack, name: String) {
        if IMPLICIT_RECEIVERS.contains(&name.as_str()) {
            return;
        }
        match scopes.last() {
            Some(frame) => {
                if let Some(owner) = self.nodes.get_mut(&frame.qualified_name) {
                    owner.references.push(name);
                }
            }
            None => self.module_scope.references.push(name),
        }
    }

    fn visit(&mut self, node: Node<'_>, scopes: &mut ScopeStack) {
        match node.kind() {
            "function_definition" => self.visit_function(node, scopes),
            "class_definition" => self.visit_class(node, scopes),
            "decorated_definition" => self.visit_decorated(node, scopes),
            "assignment" => self.visit_assignment(node, scopes),
            "import_statement" => self.visit_import(node, scopes),
            "import_from_statement" => self.visit_import_from(node, scopes),
            "call" => self.visit_call(node, scopes),
            _ => self.visit_children(node, scopes),
        }
    }

    fn visit_children(&mut self, node: Node<'_>, scopes: &mut ScopeStack) {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child, scopes);
        }
    }

    fn visit_field(&mut self, node: Node<'_>, field: &str, scopes: &mut ScopeStack) {
        if let Some(child) = node.child_by_field_name(field) {
            self.visit(child, scopes);
        }
    }

    fn visit_function(&mut self, node: Node<'_>, scopes: &mut ScopeStack) {
        let name = match node.child_by_field_name("name") {
            Some(n) => node_text(n, self.source).to_string(),
            None => return self.visit_children(node, scopes),
        };
        let kind = match scopes.last().map(|f| f.kind) {
            Some(SymbolKind::Class) => SymbolKind::Method,
            _ if is_async_definition(node) => SymbolKind::AsyncFunction,
            _ => SymbolKind::Function,
        };

        // Defaults and annotations evaluate in the enclosing scope.
        self.visit_field(node, "parameters", scopes);
        self.visit_field(node, "return_type", scopes);

        let qualified_name = self.record(scopes, &name, kind, node);
        scopes.push(ScopeFrame {
            qualified_name,
            kind,
        });
        self.visit_field(node, "body", scopes);
        scopes.pop();
    }

    fn visit_class(&mut self, node: Node<'_>, scopes: &mut ScopeStack) {
        let name = match node.child_by_field_name("name") {
            Some(n) => node_text(n, self.source).to_string(),
            None => return self.visit_children(node, scopes),
        };

        if let Some(bases) = node.child_by_field_name("superclasses") {
            let mut cursor = bases.walk();
            let base_nodes: Vec<Node<'_>> = bases.named_children(&mut cursor).collect();
            for base in base_nodes {
                match base.kind() {
                    "identifier" => {
                        self.push_reference(scopes, node_text(base, self.source).to_string())
                    }
                    "attribute" => {
                        if let Some(root) = receiver_root(base, self.source) {
                            self.push_reference(scopes, root);
                        }
                    }
                    _ => {}
                }
                self.visit(base, scopes);
            }
        }

        let qualified_name = self.record(scopes, &name, SymbolKind::Class, node);
        scopes.push(ScopeFrame {
            qualified_name,
            kind: SymbolKind::Class,
        });
        self.visit_field(node, "body", scopes);
        scopes.pop();
    }

    fn visit_decorated(&mut self, node: Node<'_>, scopes: &mut ScopeStack) {
        let mut cursor = node.walk();
        let decorators: Vec<Node<'_>> = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "decorator")
            .collect();
        for decorator in decorators {
            if let Some(expr) = decorator.named_child(0) {
                match expr.kind() {
                    "identifier" => {
                        self.push_reference(scopes, node_text(expr, self.source).to_string())
                    }
                    "attribute" => {
                        if let Some(root) = receiver_root(expr, self.source) {
                            self.push_reference(scopes, root);
                        }
                        if let Some(attr) = expr.child_by_field_name("attribute") {
                            self.push_reference(scopes, node_text(attr, self.source).to_string());
                        }
                    }
                    _ => {}
                }
                self.visit(expr, scopes);
            }
        }
        self.visit_field(node, "definition", scopes);
    }

    fn visit_assignment(&mut self, node: Node<'_>, scopes: &mut ScopeStack) {
        if let Some(left) = node.child_by_field_name("left") {
            if left.kind() == "identifier" {
                let name = node_text(left, self.source).to_string();
                self.record(scopes, &name, SymbolKind::Variable, node);
            } else {
                self.visit(left, scopes);
            }
        }
        self.visit_field(node, "type", scopes);
        self.visit_field(node, "right", scopes);
    }

    fn visit_import(&mut self, node: Node<'_>, scopes: &mut ScopeStack) {
        let mut cursor = node.walk();
        let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
        for imported in names {
            let (binding, target) = match imported.kind() {
                "aliased_import" => {
                    let target = imported
                        .child_by_field_name("name")
                        .map(|n| node_text(n, self.source).to_string())
                        .unwrap_or_default();
                    let alias = imported
                        .child_by_field_name("alias")
                        .map(|n| node_text(n, self.source).to_string())
                        .unwrap_or_default();
                    (alias, target)
                }
                _ => {
                    let target = node_text(imported, self.source).to_string();
                    // `import a.b.c` binds `a`.
                    let binding = target.split('.').next().unwrap_or_default().to_string();
                    (binding, target)
                }
            };
            self.record_import(scopes, &binding, target, imported);
        }
    }

    fn visit_import_from(&mut self, node: Node<'_>, scopes: &mut ScopeStack) {
        let module = node
            .child_by_field_name("module_name")
            .map(|n| node_text(n, self.source).to_string())
            .unwrap_or_default();
        let mut cursor = node.walk();
        let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
        for imported in names {
            let (binding, target) = match imported.kind() {
                "aliased_import" => {
                    let name = imported
                        .child_by_field_name("name")
                        .map(|n| node_text(n, self.source).to_string())
                        .unwrap_or_default();
                    let alias = imported
                        .child_by_field_name("alias")
                        .map(|n| node_text(n, self.source).to_string())
                        .unwrap_or_default();
                    (alias, join_target(&module, &name))
                }
                _ => {
                    let name = node_text(imported, self.source).to_string();
                    let target = join_target(&module, &name);
                    (name, target)
                }
            };
            self.record_import(scopes, &binding, target, imported);
        }
    }

    fn record_import(&mut self, scopes: &ScopeStack, binding: &str, target: String, node: Node<'_>) {
        if binding.is_empty() {
            return;
        }
        let qualified_name = self.record(scopes, binding, SymbolKind::Import, node);
        if let Some(symbol) = self.nodes.get_mut(&qualified_name) {
            symbol.import_target = Some(target);
        }
    }

    fn visit_call(&mut self, node: Node<'_>, scopes: &mut ScopeStack) {
        if let Some(callee) = resolve_callee(node, self.source) {
            self.push_call(scopes, callee.name);
            if let Some(receiver) = callee.receiver {
                self.push_reference(scopes, receiver);
            }
        }
        self.visit_children(node, scopes);
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Extract all symbols of one parsed file under the given module name.
pub fn extract_symbols(unit: &ParsedUnit, module: &str) -> FileSymbols {
    let mut extractor = Extractor {
        source: &unit.source,
        module,
        origin_file: &unit.path,
        nodes: IndexMap::new(),
        module_scope: ModuleScope {
            module: module.to_string(),
            origin_file: unit.path.clone(),
            calls: Vec::new(),
            references: Vec::new(),
        },
    };
    let mut scopes = ScopeStack::new();
    extractor.visit_children(unit.root(), &mut scopes);
    debug_assert!(scopes.is_empty());

    FileSymbols {
        module: module.to_string(),
        origin_file: unit.path.clone(),
        nodes: extractor.nodes,
        module_scope: extractor.module_scope,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
