//! Per-file import extraction and usage detection.
//!
//! Both entry points are pure functions of one file's contents so the scanner can run them
//! on a worker pool. Neither ever fails: a file that cannot be read or parsed contributes no
//! imports, and usage detection fails open by reporting every import as used.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use ruff_python_ast::ModModule;
use ruff_python_parser::{Parsed, parse_module};

use crate::util::read_source;
use crate::visitors::{DiscoveredImport, detect_used_roots, discover_imports};

/// Parse Python source into a module AST
pub fn parse_source(source: &str, path: &Path) -> Result<Parsed<ModModule>> {
    parse_module(source).with_context(|| format!("Failed to parse {:?}", path))
}

/// Import roots contributed by a list of discovered imports
pub fn import_roots(imports: &[DiscoveredImport]) -> BTreeSet<String> {
    imports
        .iter()
        .flat_map(DiscoveredImport::roots)
        .map(ToOwned::to_owned)
        .collect()
}

/// Import roots of a source string
pub fn extract_imports(source: &str, path: &Path) -> Result<BTreeSet<String>> {
    let parsed = parse_source(source, path)?;
    Ok(import_roots(&discover_imports(parsed.syntax())))
}

/// Referenced subset of `roots` in a source string
pub fn detect_usage(source: &str, path: &Path, roots: &BTreeSet<String>) -> Result<BTreeSet<String>> {
    let parsed = parse_source(source, path)?;
    let imports = discover_imports(parsed.syntax());
    Ok(detect_used_roots(parsed.syntax(), &imports, roots))
}

/// Import roots of a file; empty when the file cannot be read or parsed
pub fn extract_file_imports(path: &Path) -> BTreeSet<String> {
    let result =
        read_source(path).and_then(|source| extract_imports(&source.text, path));
    match result {
        Ok(roots) => roots,
        Err(err) => {
            log::warn!("Failed to extract imports from {}: {err:#}", path.display());
            BTreeSet::new()
        }
    }
}

/// Referenced subset of `roots` in a file; every root when the file cannot be analyzed
pub fn detect_file_usage(path: &Path, roots: &BTreeSet<String>) -> BTreeSet<String> {
    if roots.is_empty() {
        return BTreeSet::new();
    }
    let result = read_source(path).and_then(|source| detect_usage(&source.text, path, roots));
    match result {
        Ok(used) => used,
        Err(err) => {
            log::warn!(
                "Failed to analyze usage in {}, assuming all imports are used: {err:#}",
                path.display()
            );
            roots.clone()
        }
    }
}
