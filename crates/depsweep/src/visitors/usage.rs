//! Usage detection over a parsed module.
//!
//! Detection runs in two passes: the first builds an alias map from every local binding an
//! import introduces to the import root it stands for, the second walks every expression and
//! resolves names, attribute chains and call targets through that map.

use std::collections::BTreeSet;

use ruff_python_ast::visitor::{Visitor, walk_expr};
use ruff_python_ast::{Expr, ModModule};
use rustc_hash::FxHashMap;

use super::import_discovery::{DiscoveredImport, ImportKind};
use crate::util::root_module;

/// Local binding name -> every import root bound to it.
///
/// A name rebound by several imports (`try: import simplejson as json` / `except: import json`)
/// keeps all of its roots, so a reference marks each of them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AliasMap {
    bindings: FxHashMap<String, BTreeSet<String>>,
}

impl AliasMap {
    /// Build the alias map for one file's imports
    pub fn from_imports(imports: &[DiscoveredImport]) -> Self {
        let mut map = Self::default();
        for import in imports {
            if import.is_relative() || import.is_future() {
                continue;
            }
            match &import.kind {
                ImportKind::Direct => {
                    for binding in &import.names {
                        let root = root_module(&binding.name);
                        map.bind(root, root);
                        if let Some(asname) = &binding.asname {
                            map.bind(asname, root);
                        }
                    }
                }
                ImportKind::From { module, .. } => {
                    for binding in import.names.iter().filter(|b| b.name != "*") {
                        let root = match module {
                            Some(module) => root_module(module),
                            None => binding.name.as_str(),
                        };
                        map.bind(binding.local_name(), root);
                    }
                }
            }
        }
        map
    }

    fn bind(&mut self, local: &str, root: &str) {
        self.bindings
            .entry(local.to_owned())
            .or_default()
            .insert(root.to_owned());
    }

    /// Import roots a local name may stand for; an unbound name stands for itself
    pub fn resolve<'a>(&'a self, name: &'a str) -> Vec<&'a str> {
        match self.bindings.get(name) {
            Some(roots) => roots.iter().map(String::as_str).collect(),
            None => vec![name],
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Left-most base name of a name, attribute chain or call target
fn base_name(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Name(name) => Some(name.id.as_str()),
        Expr::Attribute(attribute) => base_name(&attribute.value),
        Expr::Call(call) => base_name(&call.func),
        Expr::Subscript(subscript) => base_name(&subscript.value),
        _ => None,
    }
}

/// Visitor that marks import roots referenced anywhere in a module
#[derive(Debug)]
pub struct UsageVisitor<'m> {
    aliases: &'m AliasMap,
    roots: &'m BTreeSet<String>,
    used: BTreeSet<String>,
}

impl<'m> UsageVisitor<'m> {
    pub fn new(aliases: &'m AliasMap, roots: &'m BTreeSet<String>) -> Self {
        Self {
            aliases,
            roots,
            used: BTreeSet::new(),
        }
    }

    /// Visit a module and record references
    pub fn visit_module(&mut self, module: &ModModule) {
        for stmt in &module.body {
            self.visit_stmt(stmt);
        }
    }

    pub fn into_used(self) -> BTreeSet<String> {
        self.used
    }

    fn mark(&mut self, name: &str) {
        for root in self.aliases.resolve(name) {
            if self.roots.contains(root) && !self.used.contains(root) {
                self.used.insert(root.to_owned());
            }
        }
    }
}

impl<'a> Visitor<'a> for UsageVisitor<'_> {
    fn visit_expr(&mut self, expr: &'a Expr) {
        match expr {
            Expr::Name(name) => self.mark(name.id.as_str()),
            Expr::Attribute(_) | Expr::Call(_) => {
                if let Some(base) = base_name(expr) {
                    self.mark(base);
                }
            }
            _ => {}
        }
        walk_expr(self, expr);
    }
}

/// Import roots of `roots` referenced in a parsed module
pub fn detect_used_roots(
    module: &ModModule,
    imports: &[DiscoveredImport],
    roots: &BTreeSet<String>,
) -> BTreeSet<String> {
    let aliases = AliasMap::from_imports(imports);
    let mut visitor = UsageVisitor::new(&aliases, roots);
    visitor.visit_module(module);
    visitor.into_used()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visitors::discover_imports;
    use ruff_python_parser::parse_module;

    fn used_roots(source: &str) -> Vec<String> {
        let parsed = parse_module(source).expect("Failed to parse test module");
        let imports = discover_imports(parsed.syntax());
        let roots: BTreeSet<String> = imports
            .iter()
            .flat_map(|import| import.roots())
            .map(ToOwned::to_owned)
            .collect();
        detect_used_roots(parsed.syntax(), &imports, &roots)
            .into_iter()
            .collect()
    }

    #[test]
    fn test_unreferenced_import_is_unused() {
        assert!(used_roots("import os\n").is_empty());
    }

    #[test]
    fn test_attribute_reference_marks_root() {
        assert_eq!(used_roots("import os\nprint(os.name)\n"), vec!["os"]);
    }

    #[test]
    fn test_from_import_symbol_call_marks_module_root() {
        assert_eq!(
            used_roots("from numpy import array\narray([1])\n"),
            vec!["numpy"]
        );
    }

    #[test]
    fn test_aliased_chains_resolve_to_root() {
        let source = r#"
import numpy as np
import xml.etree.ElementTree as ET
from pkg import sub as s
import json

np.zeros(3)
s.func().result
"#;
        assert_eq!(used_roots(source), vec!["numpy", "pkg"]);
    }

    #[test]
    fn test_dotted_import_used_through_root_name() {
        assert_eq!(
            used_roots("import os.path\nos.path.join('a', 'b')\n"),
            vec!["os"]
        );
    }

    #[test]
    fn test_usage_inside_nested_scopes() {
        let source = r#"
import logging
import re

class Handler:
    def handle(self, value):
        if value:
            return [re.compile(v) for v in value]
"#;
        assert_eq!(used_roots(source), vec!["re"]);
    }

    #[test]
    fn test_alias_map_resolution() {
        let parsed = parse_module("import numpy as np\nfrom os import path as p\n")
            .expect("Failed to parse test module");
        let aliases = AliasMap::from_imports(&discover_imports(parsed.syntax()));
        assert_eq!(aliases.resolve("np"), vec!["numpy"]);
        assert_eq!(aliases.resolve("numpy"), vec!["numpy"]);
        assert_eq!(aliases.resolve("p"), vec!["os"]);
        assert_eq!(aliases.resolve("unbound"), vec!["unbound"]);
        assert_eq!(aliases.len(), 3);
    }

    #[test]
    fn test_rebound_name_marks_every_root() {
        let source = r#"
try:
    import simplejson as json
except ImportError:
    import json

json.dumps({})
"#;
        assert_eq!(used_roots(source), vec!["json", "simplejson"]);
    }

    #[test]
    fn test_rebound_alias_keeps_all_roots() {
        let parsed = parse_module(
            "try:\n    import ujson as fastjson\nexcept ImportError:\n    import json as fastjson\n",
        )
        .expect("Failed to parse test module");
        let aliases = AliasMap::from_imports(&discover_imports(parsed.syntax()));
        assert_eq!(aliases.resolve("fastjson"), vec!["json", "ujson"]);
    }
}
