//! Import discovery visitor that finds every import statement in a Python module,
//! including those nested within functions, classes, conditionals and `try` blocks.

use ruff_python_ast::visitor::{Visitor, walk_stmt};
use ruff_python_ast::{Alias, ModModule, Stmt, StmtImport, StmtImportFrom};
use ruff_text_size::TextRange;

use crate::util::root_module;

/// One name bound by an import statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    /// Imported name: the dotted module path for `import`, the symbol for `from`
    pub name: String,
    /// Local alias introduced with `as`
    pub asname: Option<String>,
}

impl ImportBinding {
    fn from_alias(alias: &Alias) -> Self {
        Self {
            name: alias.name.to_string(),
            asname: alias.asname.as_ref().map(ToString::to_string),
        }
    }

    /// Name this binding introduces into the module namespace
    pub fn local_name(&self) -> &str {
        match &self.asname {
            Some(asname) => asname,
            None => root_module(&self.name),
        }
    }
}

/// Shape of an import statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportKind {
    /// `import a.b as c, d`
    Direct,
    /// `from module import x as y`, with the relative `level` (number of leading dots)
    From { module: Option<String>, level: u32 },
}

/// An import statement discovered during AST traversal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredImport {
    pub kind: ImportKind,
    pub names: Vec<ImportBinding>,
    /// Source range of the whole statement
    pub range: TextRange,
}

impl DiscoveredImport {
    /// Relative imports refer to project-internal code and never name a dependency
    pub fn is_relative(&self) -> bool {
        matches!(self.kind, ImportKind::From { level, .. } if level > 0)
    }

    /// `from __future__ import ...` is a compiler directive rather than a dependency
    pub fn is_future(&self) -> bool {
        matches!(
            &self.kind,
            ImportKind::From { module: Some(module), level: 0 } if module == "__future__"
        )
    }

    pub fn is_wildcard(&self) -> bool {
        self.names.iter().any(|binding| binding.name == "*")
    }

    /// Import roots contributed by this statement.
    ///
    /// Direct imports contribute the first segment of each dotted path. A `from` import
    /// contributes its module's first segment; with neither module nor relative level, the
    /// imported symbols are themselves roots. Relative and `__future__` imports contribute
    /// nothing.
    pub fn roots(&self) -> Vec<&str> {
        if self.is_future() {
            return Vec::new();
        }
        match &self.kind {
            ImportKind::Direct => self
                .names
                .iter()
                .map(|binding| root_module(&binding.name))
                .collect(),
            ImportKind::From {
                module: Some(module),
                level: 0,
            } => vec![root_module(module)],
            ImportKind::From {
                module: None,
                level: 0,
            } => self
                .names
                .iter()
                .filter(|binding| binding.name != "*")
                .map(|binding| binding.name.as_str())
                .collect(),
            ImportKind::From { .. } => Vec::new(),
        }
    }
}

/// Visitor that discovers all imports in a Python module
#[derive(Debug, Default)]
pub struct ImportDiscoveryVisitor {
    imports: Vec<DiscoveredImport>,
}

impl ImportDiscoveryVisitor {
    /// Create a new import discovery visitor
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all discovered imports in source order
    pub fn into_imports(self) -> Vec<DiscoveredImport> {
        self.imports
    }

    /// Visit a module and discover all imports
    pub fn visit_module(&mut self, module: &ModModule) {
        for stmt in &module.body {
            self.visit_stmt(stmt);
        }
    }

    fn record_import(&mut self, stmt: &StmtImport) {
        self.imports.push(DiscoveredImport {
            kind: ImportKind::Direct,
            names: stmt.names.iter().map(ImportBinding::from_alias).collect(),
            range: stmt.range,
        });
    }

    fn record_import_from(&mut self, stmt: &StmtImportFrom) {
        self.imports.push(DiscoveredImport {
            kind: ImportKind::From {
                module: stmt.module.as_ref().map(ToString::to_string),
                level: stmt.level,
            },
            names: stmt.names.iter().map(ImportBinding::from_alias).collect(),
            range: stmt.range,
        });
    }
}

impl<'a> Visitor<'a> for ImportDiscoveryVisitor {
    fn visit_stmt(&mut self, stmt: &'a Stmt) {
        match stmt {
            Stmt::Import(import_stmt) => self.record_import(import_stmt),
            Stmt::ImportFrom(import_from) => self.record_import_from(import_from),
            _ => walk_stmt(self, stmt),
        }
    }
}

/// Discover all imports of a parsed module
pub fn discover_imports(module: &ModModule) -> Vec<DiscoveredImport> {
    let mut visitor = ImportDiscoveryVisitor::new();
    visitor.visit_module(module);
    visitor.into_imports()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruff_python_parser::parse_module;

    fn imports_of(source: &str) -> Vec<DiscoveredImport> {
        let parsed = parse_module(source).expect("Failed to parse test module");
        discover_imports(parsed.syntax())
    }

    #[test]
    fn test_module_level_import() {
        let imports = imports_of("import os\nfrom sys import path\n");

        assert_eq!(imports.len(), 2);
        assert_eq!(imports[0].kind, ImportKind::Direct);
        assert_eq!(imports[0].roots(), vec!["os"]);
        assert_eq!(
            imports[1].kind,
            ImportKind::From {
                module: Some("sys".to_owned()),
                level: 0
            }
        );
        assert_eq!(imports[1].names[0].local_name(), "path");
    }

    #[test]
    fn test_nested_imports_are_discovered() {
        let source = r#"
def my_function():
    import json
    return json.dumps({})

class MyClass:
    def method(self):
        from collections import defaultdict
        return defaultdict(list)

try:
    import ujson
except ImportError:
    ujson = None
"#;
        let roots: Vec<String> = imports_of(source)
            .iter()
            .flat_map(|import| import.roots())
            .map(ToOwned::to_owned)
            .collect();

        assert_eq!(roots, vec!["json", "collections", "ujson"]);
    }

    #[test]
    fn test_dotted_and_aliased_direct_imports() {
        let imports = imports_of("import os.path, xml.etree.ElementTree as ET\n");
        assert_eq!(imports[0].roots(), vec!["os", "xml"]);
        assert_eq!(imports[0].names[0].local_name(), "os");
        assert_eq!(imports[0].names[1].local_name(), "ET");
    }

    #[test]
    fn test_relative_and_future_imports_have_no_roots() {
        let imports = imports_of(
            "from __future__ import annotations\nfrom . import sibling\nfrom ..pkg import thing\n",
        );
        assert!(imports[0].is_future());
        assert!(imports[1].is_relative());
        assert!(imports[2].is_relative());
        assert!(imports.iter().all(|import| import.roots().is_empty()));
    }

    #[test]
    fn test_wildcard_contributes_module_root() {
        let imports = imports_of("from os.path import *\n");
        assert!(imports[0].is_wildcard());
        assert_eq!(imports[0].roots(), vec!["os"]);
    }
}
