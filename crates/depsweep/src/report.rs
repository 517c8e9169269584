//! Scan results and their derived views.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::Glob;
use serde::Serialize;

/// Per-file import roots
pub type ImportRecords = BTreeMap<PathBuf, BTreeSet<String>>;

/// Immutable snapshot of one scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub project_path: PathBuf,
    pub scanned_files: usize,
    /// Import roots declared by each file
    pub all_imports: ImportRecords,
    /// Referenced subset of each file's import roots
    pub used_imports: ImportRecords,
    /// Normalized packages declared by the project's manifests
    pub declared_deps: BTreeSet<String>,
    /// Normalized packages the code actually uses
    pub used_deps: BTreeSet<String>,
    /// Manifests that were present but could not be parsed
    pub failed_manifests: usize,
}

/// Text rendering style
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    #[default]
    Summary,
    Detailed,
}

#[derive(Serialize)]
struct JsonSummary {
    total_files: usize,
    files_with_unused_imports: usize,
    total_unused_imports: usize,
    declared_dependencies: usize,
    used_dependencies: usize,
    unused_dependencies: usize,
    missing_dependencies: usize,
    failed_manifests: usize,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    project_path: String,
    scanned_files: usize,
    declared_dependencies: &'a BTreeSet<String>,
    used_dependencies: &'a BTreeSet<String>,
    unused_dependencies: BTreeSet<String>,
    missing_dependencies: BTreeSet<String>,
    unused_imports: BTreeMap<String, BTreeSet<String>>,
    summary: JsonSummary,
}

impl Report {
    /// Unused import roots of one file
    pub fn unused_imports_for(&self, path: &Path) -> BTreeSet<String> {
        let Some(all) = self.all_imports.get(path) else {
            return BTreeSet::new();
        };
        match self.used_imports.get(path) {
            Some(used) => all.difference(used).cloned().collect(),
            None => all.clone(),
        }
    }

    /// Files with at least one unused import root
    pub fn unused_imports(&self) -> ImportRecords {
        self.all_imports
            .keys()
            .filter_map(|path| {
                let unused = self.unused_imports_for(path);
                (!unused.is_empty()).then(|| (path.clone(), unused))
            })
            .collect()
    }

    /// Declared packages never used
    pub fn unused_packages(&self) -> BTreeSet<String> {
        self.declared_deps
            .difference(&self.used_deps)
            .cloned()
            .collect()
    }

    /// Used packages never declared
    pub fn missing_packages(&self) -> BTreeSet<String> {
        self.used_deps
            .difference(&self.declared_deps)
            .cloned()
            .collect()
    }

    pub fn total_unused_imports(&self) -> usize {
        self.unused_imports().values().map(BTreeSet::len).sum()
    }

    /// Whether there is anything to clean up
    pub fn has_issues(&self) -> bool {
        !self.unused_packages().is_empty() || self.total_unused_imports() > 0
    }

    /// Path relative to the project root, with `/` separators
    pub fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.project_path)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Keep only files whose absolute or project-relative path matches a glob pattern
    pub fn filter(&self, pattern: &str) -> Result<Self> {
        let matcher = Glob::new(pattern)
            .with_context(|| format!("Invalid file pattern: {pattern}"))?
            .compile_matcher();

        let all_imports: ImportRecords = self
            .all_imports
            .iter()
            .filter(|(path, _)| {
                matcher.is_match(path.as_path()) || matcher.is_match(self.relative_path(path))
            })
            .map(|(path, imports)| (path.clone(), imports.clone()))
            .collect();
        let used_imports = self
            .used_imports
            .iter()
            .filter(|(path, _)| all_imports.contains_key(*path))
            .map(|(path, imports)| (path.clone(), imports.clone()))
            .collect();

        Ok(Self {
            project_path: self.project_path.clone(),
            scanned_files: all_imports.len(),
            all_imports,
            used_imports,
            declared_deps: self.declared_deps.clone(),
            used_deps: self.used_deps.clone(),
            failed_manifests: self.failed_manifests,
        })
    }

    /// Machine-readable export with stable key order
    pub fn to_json(&self) -> Result<String> {
        let unused_imports: BTreeMap<String, BTreeSet<String>> = self
            .unused_imports()
            .into_iter()
            .map(|(path, imports)| (self.relative_path(&path), imports))
            .collect();
        let unused_dependencies = self.unused_packages();
        let missing_dependencies = self.missing_packages();

        let report = JsonReport {
            project_path: self.project_path.to_string_lossy().into_owned(),
            scanned_files: self.scanned_files,
            declared_dependencies: &self.declared_deps,
            used_dependencies: &self.used_deps,
            summary: JsonSummary {
                total_files: self.scanned_files,
                files_with_unused_imports: unused_imports.len(),
                total_unused_imports: unused_imports.values().map(BTreeSet::len).sum(),
                declared_dependencies: self.declared_deps.len(),
                used_dependencies: self.used_deps.len(),
                unused_dependencies: unused_dependencies.len(),
                missing_dependencies: missing_dependencies.len(),
                failed_manifests: self.failed_manifests,
            },
            unused_dependencies,
            missing_dependencies,
            unused_imports,
        };

        serde_json::to_string_pretty(&report).context("Failed to serialize report")
    }

    /// Human-readable text rendering
    pub fn render(&self, format: ReportFormat) -> String {
        let mut out = String::new();
        let unused_imports = self.unused_imports();
        let unused_packages = self.unused_packages();
        let missing_packages = self.missing_packages();

        let _ = writeln!(out, "Dependency Report");
        let _ = writeln!(out, "{}", "=".repeat(50));
        let _ = writeln!(out, "Project: {}", self.project_path.display());
        let _ = writeln!(out, "Files scanned: {}", self.scanned_files);
        if self.failed_manifests > 0 {
            let _ = writeln!(out, "Unreadable manifests: {}", self.failed_manifests);
        }
        let _ = writeln!(out);

        if unused_imports.is_empty() {
            let _ = writeln!(out, "No unused imports found");
        } else {
            let _ = writeln!(
                out,
                "Unused imports found in {} files:",
                unused_imports.len()
            );
            for (path, imports) in &unused_imports {
                let names: Vec<&str> = imports.iter().map(String::as_str).collect();
                let _ = writeln!(out, "  {}: {}", self.relative_path(path), names.join(", "));
            }
        }
        let _ = writeln!(out);

        write_package_line(&mut out, "Unused packages", &unused_packages);
        write_package_line(&mut out, "Missing packages", &missing_packages);

        if format == ReportFormat::Detailed {
            let _ = writeln!(out);
            write_package_line(&mut out, "Declared packages", &self.declared_deps);
            write_package_line(&mut out, "Used packages", &self.used_deps);
            let _ = writeln!(out);
            let _ = writeln!(out, "Imports per file:");
            for (path, imports) in &self.all_imports {
                let used = self.used_imports.get(path);
                let names: Vec<String> = imports
                    .iter()
                    .map(|name| {
                        if used.is_some_and(|used| used.contains(name)) {
                            name.clone()
                        } else {
                            format!("{name} (unused)")
                        }
                    })
                    .collect();
                let _ = writeln!(out, "  {}: {}", self.relative_path(path), names.join(", "));
            }
        }

        out
    }
}

fn write_package_line(out: &mut String, label: &str, packages: &BTreeSet<String>) {
    if packages.is_empty() {
        let _ = writeln!(out, "{label}: none");
    } else {
        let names: Vec<&str> = packages.iter().map(String::as_str).collect();
        let _ = writeln!(out, "{label}: {}", names.join(", "));
    }
}
